// The engine's event loop.
//
// Owns the connection gateway, the event bus, the room session, the typing
// debouncer, and the history collaborator, and multiplexes them on one
// tokio select loop. Commands arrive on a channel; state goes out as watch
// snapshots; fetch failures go out on a separate error channel so they are
// surfaced exactly once.
//
// History fetches run as spawned tasks reporting back through a channel —
// the session's switch ticket decides on arrival whether a result is still
// current, so a fetch superseded by a later room switch is discarded, not
// applied to the wrong room.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use parley_common::error::ChatError;
use parley_common::protocol::{ClientEvent, OutboundMessage, TypingHint};
use parley_common::types::{Message, Room, UserProfile};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::api::HistoryProvider;
use crate::gateway::bus::EventBus;
use crate::gateway::{
    ChatTransport, ConnectionManager, ConnectionState, GatewayEvent, ReconnectPolicy,
};
use crate::session::{HistoryOutcome, RoomSession, SessionState, SwitchTicket};
use crate::typing::{TypingDebouncer, TypingSignal};

// ── Commands ────────────────────────────────────────────────────────

/// Requests from the embedding application.
#[derive(Debug)]
pub enum Command {
    SelectRoom(Room),
    SendMessage(String),
    InputChanged,
    LeaveChat,
    Shutdown,
}

// ── Snapshots ───────────────────────────────────────────────────────

/// Read view of the engine, published after every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub session: SessionState,
    pub room_id: Option<String>,
    pub messages: Vec<Message>,
    pub online_users: Vec<String>,
    pub typing_users: Vec<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            session: SessionState::Idle,
            room_id: None,
            messages: Vec::new(),
            online_users: Vec::new(),
            typing_users: Vec::new(),
        }
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// The application's side of the engine.
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    errors: mpsc::UnboundedReceiver<ChatError>,
}

impl ChatHandle {
    pub fn select_room(&self, room: Room) {
        let _ = self.commands.send(Command::SelectRoom(room));
    }

    /// Queue a message send. Empty text (after trim) is rejected here,
    /// before any network traffic happens.
    pub fn send_message(&self, text: &str) -> Result<(), ChatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Validation("message text must not be empty"));
        }
        let _ = self.commands.send(Command::SendMessage(trimmed.to_string()));
        Ok(())
    }

    /// Notify the engine of local keystroke activity.
    pub fn input_changed(&self) {
        let _ = self.commands.send(Command::InputChanged);
    }

    pub fn leave_chat(&self) {
        let _ = self.commands.send(Command::LeaveChat);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait for the next state change.
    pub async fn updated(&mut self) -> SessionSnapshot {
        let _ = self.snapshot.changed().await;
        self.snapshot.borrow_and_update().clone()
    }

    /// Next surfaced error (fetch failures). Each occurrence is delivered
    /// exactly once.
    pub async fn next_error(&mut self) -> Option<ChatError> {
        self.errors.recv().await
    }
}

// ── Engine ──────────────────────────────────────────────────────────

type HistoryResult = (SwitchTicket, Result<Vec<Message>, ChatError>);

/// One step of the select loop; mutation happens after the select so no
/// branch future outlives its borrow.
enum Step {
    Command(Option<Command>),
    Gateway(Result<GatewayEvent>),
    History(Option<HistoryResult>),
    Redial,
    TypingIdle,
}

pub struct ChatEngine<T: ChatTransport, H: HistoryProvider> {
    gateway: ConnectionManager<T>,
    bus: EventBus,
    session: RoomSession,
    debouncer: TypingDebouncer,
    history: Arc<H>,
    identity: UserProfile,
    commands: mpsc::UnboundedReceiver<Command>,
    fetch_tx: mpsc::UnboundedSender<HistoryResult>,
    fetch_rx: mpsc::UnboundedReceiver<HistoryResult>,
    snapshot: watch::Sender<SessionSnapshot>,
    errors: mpsc::UnboundedSender<ChatError>,
}

impl<T: ChatTransport, H: HistoryProvider> ChatEngine<T, H> {
    pub fn new(transport: T, history: Arc<H>, identity: UserProfile) -> (Self, ChatHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let engine = Self {
            gateway: ConnectionManager::new(transport),
            bus: EventBus::new(),
            session: RoomSession::new(),
            debouncer: TypingDebouncer::new(),
            history,
            identity,
            commands: command_rx,
            fetch_tx,
            fetch_rx,
            snapshot: snapshot_tx,
            errors: error_tx,
        };
        let handle =
            ChatHandle { commands: command_tx, snapshot: snapshot_rx, errors: error_rx };
        (engine, handle)
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.gateway = self.gateway.with_reconnect_policy(policy);
        self
    }

    pub fn with_typing_window(mut self, window: Duration) -> Self {
        self.debouncer = TypingDebouncer::with_window(window);
        self
    }

    /// Drive the engine until `Shutdown` (or the handle is dropped).
    pub async fn run(mut self) -> Result<()> {
        let event = self.gateway.connect(self.identity.clone()).await;
        self.handle_gateway_event(event).await;

        loop {
            self.publish_snapshot();

            let connected = self.gateway.is_connected();
            let redial_armed = !connected && self.gateway.should_reconnect();
            let redial_delay = self.gateway.reconnect_delay();
            let typing_deadline =
                self.debouncer.next_deadline().map(tokio::time::Instant::from_std);

            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                event = self.gateway.recv_event(), if connected => Step::Gateway(event),
                result = self.fetch_rx.recv() => Step::History(result),
                () = tokio::time::sleep(redial_delay), if redial_armed => Step::Redial,
                () = tokio::time::sleep_until(
                    typing_deadline.unwrap_or_else(tokio::time::Instant::now)
                ), if typing_deadline.is_some() => Step::TypingIdle,
            };

            match step {
                Step::Command(None) | Step::Command(Some(Command::Shutdown)) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Gateway(Ok(event)) => self.handle_gateway_event(event).await,
                // recv_event is only polled while connected, so this is a
                // torn-down transport; the redial arm takes over.
                Step::Gateway(Err(error)) => warn!(error = %error, "receive aborted"),
                Step::History(Some((ticket, result))) => self.finish_history(ticket, result),
                Step::History(None) => {}
                Step::Redial => {
                    let event = self.gateway.reconnect().await?;
                    self.handle_gateway_event(event).await;
                }
                Step::TypingIdle => self.flush_typing_idle().await,
            }
        }

        self.gateway.disconnect().await;
        self.publish_snapshot();
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SelectRoom(room) => {
                // A pending stopTyping belongs to the room being left.
                self.debouncer.cancel();
                let room_id = room.id.clone();
                let ticket = self.session.select_room(room, &self.bus);
                if self.gateway.join_room(&room_id).await {
                    self.session.mark_joined(ticket);
                }
                self.spawn_history_fetch(ticket, room_id);
            }
            Command::SendMessage(text) => {
                let Some(room_id) = self.active_room_id() else {
                    warn!("sendMessage dropped; no active room");
                    return;
                };
                let event = ClientEvent::SendMessage(OutboundMessage {
                    text,
                    sender: self.identity.username.clone(),
                    room_id,
                });
                self.gateway.emit(event).await;
            }
            Command::InputChanged => {
                let Some(room_id) = self.active_room_id() else {
                    return;
                };
                // The start hint goes out on every keystroke; the receiver
                // treats the typing roster as a snapshot, so the
                // redundancy is harmless. Only the idle timer is debounced.
                self.debouncer.keystroke();
                let event = ClientEvent::Typing(TypingHint {
                    sender: self.identity.id.clone(),
                    room_id,
                });
                self.gateway.emit(event).await;
            }
            Command::LeaveChat => {
                self.debouncer.cancel();
                self.session.leave();
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Connected => {
                if let Some(intent) = self.session.connection_restored() {
                    info!(room_id = %intent.room_id, "re-joining active room after reconnect");
                    if self.gateway.join_room(&intent.room_id).await {
                        self.session.mark_joined(intent.ticket);
                    }
                }
            }
            GatewayEvent::Server(event) => {
                self.bus.publish(&event);
                self.session.pump(Utc::now());
            }
            GatewayEvent::Disconnected { reason } => {
                warn!(reason = %reason, "live channel lost");
                self.session.connection_lost();
            }
        }
    }

    fn finish_history(&mut self, ticket: SwitchTicket, result: Result<Vec<Message>, ChatError>) {
        if let HistoryOutcome::Failed(error) = self.session.apply_history(ticket, result) {
            let _ = self.errors.send(error);
        }
    }

    fn spawn_history_fetch(&self, ticket: SwitchTicket, room_id: String) {
        let provider = Arc::clone(&self.history);
        let results = self.fetch_tx.clone();
        tokio::spawn(async move {
            let result = provider.fetch_history(&room_id).await;
            // The session discards this on arrival if the switch was
            // superseded meanwhile.
            let _ = results.send((ticket, result));
        });
    }

    async fn flush_typing_idle(&mut self) {
        if self.debouncer.poll() != Some(TypingSignal::StopTyping) {
            return;
        }
        let Some(room_id) = self.active_room_id() else {
            return;
        };
        let event =
            ClientEvent::StopTyping(TypingHint { sender: self.identity.id.clone(), room_id });
        self.gateway.emit(event).await;
    }

    fn active_room_id(&self) -> Option<String> {
        self.session.active_room().map(|room| room.id.clone())
    }

    fn publish_snapshot(&self) {
        let mut snapshot = SessionSnapshot {
            connection: self.gateway.state(),
            session: self.session.state(),
            room_id: self.active_room_id(),
            ..SessionSnapshot::default()
        };
        if let Some(ctx) = self.session.context() {
            snapshot.messages = ctx.messages().to_vec();
            snapshot.online_users = ctx.online().iter().map(str::to_string).collect();
            snapshot.online_users.sort();
            snapshot.typing_users = ctx.typing().iter().map(str::to_string).collect();
            snapshot.typing_users.sort();
        }
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
