// Room session controller: the one place that orchestrates room switches.
//
// State machine over the active room:
//
//   Idle ── select_room ──▶ Switching ── history + join done ──▶ Active
//    ▲                          ▲                                  │
//    └──────── leave ───────────┴─────────── select_room ──────────┘
//
// Teardown strictly precedes setup on every switch: the previous context's
// bus subscription is dropped before the new one is stored, so at most one
// context ever receives live events. Every async completion carries a
// `SwitchTicket`; a ticket from a superseded switch is discarded on
// arrival instead of being applied to the wrong room.

pub mod stream;

use chrono::{DateTime, Utc};
use parley_common::error::ChatError;
use parley_common::protocol::ServerEvent;
use parley_common::types::{Message, Room};
use tracing::{debug, info, warn};

use self::stream::MessageStream;
use crate::gateway::bus::{EventBus, EventSubscription};
use crate::presence::{OnlineSet, TypingRoster};

/// Lifecycle of the active-room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Switching,
    Active,
}

/// Capability tying an async completion to the switch that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchTicket {
    epoch: u64,
}

/// What happened to a history result once presented.
#[derive(Debug, PartialEq, Eq)]
pub enum HistoryOutcome {
    Applied,
    /// The switch this result belonged to was superseded; nothing changed.
    Stale,
    /// The fetch failed. Surfaced once to the caller; the session still
    /// proceeds so live messages are not lost. No auto-retry.
    Failed(ChatError),
}

/// Everything scoped to the currently selected room.
///
/// Dropping it releases the bus subscription — which is all "leaving"
/// means locally, since the protocol has no leave event and server-side
/// membership persists.
pub struct ActiveRoomContext {
    room: Room,
    subscription: EventSubscription,
    stream: MessageStream,
    online: OnlineSet,
    typing: TypingRoster,
}

impl ActiveRoomContext {
    fn apply(&mut self, event: ServerEvent, now: DateTime<Utc>) {
        match event {
            ServerEvent::OnlineUsers(ids) => self.online.replace(ids),
            ServerEvent::NewMessage(inbound) => {
                // The wire carries no timestamp; receipt time is canonical.
                self.stream.push_live(Message::new(inbound.sender, inbound.text, now));
            }
            ServerEvent::UserTyping(ids) => self.typing.replace(ids),
            ServerEvent::UserStopTyping(id) => self.typing.stop(&id),
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn messages(&self) -> &[Message] {
        self.stream.messages()
    }

    pub fn online(&self) -> &OnlineSet {
        &self.online
    }

    pub fn typing(&self) -> &TypingRoster {
        &self.typing
    }
}

/// Orchestrates the connection gateway, history fetch, and presence views
/// across room switches. Driven by the runtime; contains no IO itself.
pub struct RoomSession {
    state: SessionState,
    epoch: u64,
    ctx: Option<ActiveRoomContext>,
    history_done: bool,
    join_done: bool,
    rejoin_pending: bool,
}

impl Default for RoomSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            epoch: 0,
            ctx: None,
            history_done: false,
            join_done: false,
            rejoin_pending: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> Option<&ActiveRoomContext> {
        self.ctx.as_ref()
    }

    pub fn active_room(&self) -> Option<&Room> {
        self.ctx.as_ref().map(ActiveRoomContext::room)
    }

    /// Select `room`, superseding any active context.
    ///
    /// The previous context (and with it the previous subscription) is
    /// dropped before the new subscription is even registered on the bus,
    /// so at no instant do two contexts hold live subscriptions. Returns
    /// the ticket that this switch's history and join completions must
    /// present.
    pub fn select_room(&mut self, room: Room, bus: &EventBus) -> SwitchTicket {
        self.ctx = None; // teardown must complete before setup begins
        self.epoch += 1;
        self.history_done = false;
        self.join_done = false;
        self.state = SessionState::Switching;

        info!(room_id = %room.id, room = %room.name, "switching active room");
        self.ctx = Some(ActiveRoomContext {
            room,
            subscription: bus.subscribe(),
            stream: MessageStream::new(),
            online: OnlineSet::new(),
            typing: TypingRoster::new(),
        });
        SwitchTicket { epoch: self.epoch }
    }

    /// Present the historical fetch result for the switch `ticket` belongs
    /// to. Results from superseded switches are discarded — they must not
    /// populate a newer room's list.
    pub fn apply_history(
        &mut self,
        ticket: SwitchTicket,
        result: Result<Vec<Message>, ChatError>,
    ) -> HistoryOutcome {
        if ticket.epoch != self.epoch {
            debug!("discarding history result from a superseded room switch");
            return HistoryOutcome::Stale;
        }
        let Some(ctx) = self.ctx.as_mut() else {
            return HistoryOutcome::Stale;
        };

        self.history_done = true;
        let outcome = match result {
            Ok(history) => {
                ctx.stream.seed(history);
                HistoryOutcome::Applied
            }
            Err(error) => {
                warn!(
                    room_id = %ctx.room.id,
                    error = %error,
                    "history fetch failed; continuing with live messages only"
                );
                ctx.stream.seed_failed();
                HistoryOutcome::Failed(error)
            }
        };
        self.maybe_activate();
        outcome
    }

    /// Record that the join intent for this switch reached the wire.
    pub fn mark_joined(&mut self, ticket: SwitchTicket) {
        if ticket.epoch != self.epoch {
            return;
        }
        self.join_done = true;
        self.maybe_activate();
    }

    fn maybe_activate(&mut self) {
        if self.state == SessionState::Switching && self.history_done && self.join_done {
            self.state = SessionState::Active;
            if let Some(ctx) = &self.ctx {
                info!(room_id = %ctx.room.id, "room session active");
            }
        }
    }

    /// Drain the active context's subscription, stamping live messages
    /// with `now` (receipt time). Returns how many events were applied.
    pub fn pump(&mut self, now: DateTime<Utc>) -> usize {
        let Some(ctx) = self.ctx.as_mut() else {
            return 0;
        };
        let mut applied = 0;
        while let Some(event) = ctx.subscription.try_next() {
            ctx.apply(event, now);
            applied += 1;
        }
        applied
    }

    /// The transport dropped. Membership must be re-asserted on recovery —
    /// the server does not restore per-connection room subscriptions.
    pub fn connection_lost(&mut self) {
        if self.ctx.is_some() {
            self.rejoin_pending = true;
        }
    }

    /// The transport is back. Returns the join the runtime must re-emit,
    /// at most once per recovery; without it the client silently stops
    /// receiving events for a room it still shows.
    ///
    /// Also covers a join that was dropped because the room was selected
    /// while disconnected.
    pub fn connection_restored(&mut self) -> Option<RejoinIntent> {
        let pending = self.rejoin_pending || !self.join_done;
        self.rejoin_pending = false;
        if !pending {
            return None;
        }
        self.ctx.as_ref().map(|ctx| RejoinIntent {
            ticket: SwitchTicket { epoch: self.epoch },
            room_id: ctx.room.id.clone(),
        })
    }

    /// Leave the chat surface entirely: drops the context and its
    /// subscription.
    pub fn leave(&mut self) {
        if self.ctx.take().is_some() {
            info!("left active room");
        }
        self.epoch += 1;
        self.state = SessionState::Idle;
        self.history_done = false;
        self.join_done = false;
        self.rejoin_pending = false;
    }
}

/// A join the runtime must (re-)emit after the connection came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejoinIntent {
    pub ticket: SwitchTicket,
    pub room_id: String,
}
