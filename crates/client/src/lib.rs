// parley-client: the chat session synchronization engine.
//
// One persistent connection to the chat server, multiplexed across rooms.
// The gateway owns the connection; the session controller owns the active
// room; presence and typing are small state machines the runtime wires to
// the live event stream.

pub mod api;
pub mod config;
pub mod gateway;
pub mod presence;
pub mod runtime;
pub mod session;
pub mod typing;
