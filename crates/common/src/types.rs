// Core domain types shared across all Parley crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated user, as returned by the profile endpoint.
///
/// Attached to the transport as connection-time credentials; also the
/// `sender` on every outbound message and typing hint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    /// Server-assigned opaque id.
    pub id: String,
    pub username: String,
}

/// A member of a room, in the room's insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMember {
    pub id: String,
    pub username: String,
}

/// A chat room as defined by the room directory.
///
/// The sync engine only ever holds one of these by value (the active room);
/// membership is owned and mutated by the directory, never by this engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<RoomMember>,
}

/// A single chat message in canonical client shape. Immutable once created.
///
/// Historical messages carry the server's `createdAt`; live messages are
/// stamped with receipt time by the engine. The wire carries no message id,
/// so ordering is by timestamp with ties broken by arrival order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self { sender: sender.into(), text: text.into(), timestamp }
    }
}
