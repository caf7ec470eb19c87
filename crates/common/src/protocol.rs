// Wire event types for the chat live channel.
//
// Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`
// with camelCase event names, matching what the server emits and expects.
// The protocol carries no message identifiers and no acknowledgements:
// outbound delivery is at-most-once, and duplicate inbound delivery after a
// reconnect-and-rejoin cannot be detected client-side.

use serde::{Deserialize, Serialize};

/// Server -> client events on the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full snapshot of currently online user ids. Replaces the previous
    /// set wholesale; never merged incrementally.
    OnlineUsers(Vec<String>),

    /// A new message in a room this connection has joined.
    NewMessage(InboundMessage),

    /// Full snapshot of user ids currently typing in the active room.
    /// Replace semantics, same as `onlineUsers`.
    UserTyping(Vec<String>),

    /// A single user stopped typing. Removes exactly that id.
    UserStopTyping(String),
}

/// Payload of a `newMessage` event. The receipt timestamp is assigned
/// client-side; the wire does not carry one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
}

/// Client -> server events on the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Subscribe this connection to a room's live events. There is no
    /// corresponding leave event; clients stop listening locally instead.
    JoinRoom(String),

    /// Fire-and-forget message send. No acknowledgement is returned.
    SendMessage(OutboundMessage),

    /// Presence hint: the local user is typing in `room_id`.
    Typing(TypingHint),

    /// Presence hint: the local user went idle in `room_id`.
    StopTyping(TypingHint),
}

/// Payload of a `sendMessage` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub text: String,
    pub sender: String,
    pub room_id: String,
}

/// Payload of `typing` / `stopTyping` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingHint {
    pub sender: String,
    pub room_id: String,
}
