// parley-common: shared types and the wire protocol for the Parley workspace

pub mod error;
pub mod protocol;
pub mod types;
