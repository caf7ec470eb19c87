// Live/history reconciliation for the active room's message list.
//
// Live messages are shown the moment they arrive. The one-time historical
// fetch, whenever it resolves, is inserted ahead of them in server order —
// history never reorders relative to live messages already displayed.
// From the seed onward the list is append-only: the live channel delivers
// in server-send order for a single room, so no re-sort happens.
//
// The wire carries no message id, so duplicates (possible after a
// reconnect-triggered rejoin) are kept, not guessed at.

use parley_common::types::Message;

#[derive(Debug, Default)]
pub struct MessageStream {
    seeded: bool,
    messages: Vec<Message>,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a live message, visible immediately.
    pub fn push_live(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Install the historical batch, in server order, ahead of any live
    /// messages that raced it. A second seed is ignored: nothing may reset
    /// the list while the room stays active.
    pub fn seed(&mut self, history: Vec<Message>) {
        if self.seeded {
            return;
        }
        let live = std::mem::take(&mut self.messages);
        self.messages = history;
        self.messages.extend(live);
        self.seeded = true;
    }

    /// The fetch failed: live messages captured so far are kept and the
    /// stream behaves as seeded with empty history.
    pub fn seed_failed(&mut self) {
        self.seeded = true;
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}
