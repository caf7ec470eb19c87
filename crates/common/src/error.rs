// Error taxonomy for the sync engine.
//
// Three families with distinct propagation rules:
//   Transport  — connection drop or establishment failure; recovered locally
//                via reconnection, never fatal to the session.
//   Fetch      — history or profile request failed; surfaced to the caller
//                once, not auto-retried, does not block the live channel.
//   Validation — rejected before any network call is made.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("invalid input: {0}")]
    Validation(&'static str),
}

impl ChatError {
    /// Whether the engine recovers from this error on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
