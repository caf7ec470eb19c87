// Gateway: the single live connection to the chat server.
//
// Owns the transport, authenticates it with the local user's identity, and
// exposes the primitives everything else builds on: connect, join_room,
// emit, and the inbound event stream. Reconnection backoff lives here;
// re-joining the active room after a reconnect deliberately does not — that
// is the session controller's job, which observes `Connected` and re-issues
// the join for the room it still holds.
//
// Transport is abstracted via `ChatTransport` for testability. The
// production stack prefers WebSocket and downgrades to HTTP long polling
// transparently; tests script an in-memory mock.

pub mod bus;
pub mod polling;
pub mod socket;

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parley_common::protocol::{ClientEvent, ServerEvent};
use parley_common::types::UserProfile;
use tracing::{debug, info, warn};
use url::Url;

use self::polling::PollingTransport;
use self::socket::SocketTransport;

// ── Transport trait ─────────────────────────────────────────────────

/// Abstraction over the live-channel transport.
#[async_trait]
pub trait ChatTransport: Send {
    /// Open the channel, attaching `identity` as connection-time
    /// credentials.
    async fn open(&mut self, identity: &UserProfile) -> Result<()>;

    /// Send one event. Fire-and-forget at the protocol level.
    async fn send(&mut self, event: &ClientEvent) -> Result<()>;

    /// Receive the next event. Returns `None` on clean close.
    async fn recv(&mut self) -> Result<Option<ServerEvent>>;

    /// Close the channel.
    async fn close(&mut self);
}

// ── Connection state ────────────────────────────────────────────────

/// Current state of the live connection. Only the gateway writes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ── Reconnection policy ─────────────────────────────────────────────

/// Reconnection parameters.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: u32::MAX, // retry indefinitely
        }
    }
}

// ── Gateway events ──────────────────────────────────────────────────

/// Events the gateway surfaces to its driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Transport established and authenticated.
    Connected,
    /// A live event from the server.
    Server(ServerEvent),
    /// Connection lost; the driver decides when to redial.
    Disconnected { reason: String },
}

// ── Connection manager ──────────────────────────────────────────────

/// Maintains exactly one live connection per session.
pub struct ConnectionManager<T: ChatTransport> {
    transport: T,
    policy: ReconnectPolicy,
    state: ConnectionState,
    identity: Option<UserProfile>,
    consecutive_failures: u32,
}

impl<T: ChatTransport> ConnectionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: ReconnectPolicy::default(),
            state: ConnectionState::Disconnected,
            identity: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Open the transport with `identity` as connection credentials.
    ///
    /// Idempotent: calling while already connected or connecting is a
    /// no-op. Failure to open is reported as a `Disconnected` event, not an
    /// error — the driver retries after `reconnect_delay`.
    pub async fn connect(&mut self, identity: UserProfile) -> GatewayEvent {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "connect ignored; transport already active");
            return GatewayEvent::Connected;
        }

        self.state = ConnectionState::Connecting;
        if let Err(error) = self.transport.open(&identity).await {
            self.state = ConnectionState::Disconnected;
            self.consecutive_failures += 1;
            self.identity = Some(identity);
            return GatewayEvent::Disconnected { reason: format!("connection failed: {error}") };
        }

        info!(user = %identity.username, "live channel established");
        self.identity = Some(identity);
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
        GatewayEvent::Connected
    }

    /// Redial with the identity from the last `connect` call.
    pub async fn reconnect(&mut self) -> Result<GatewayEvent> {
        let identity = self
            .identity
            .clone()
            .ok_or_else(|| anyhow!("cannot reconnect before the first connect"))?;
        Ok(self.connect(identity).await)
    }

    /// Send a join intent for `room_id`. Returns whether the intent was
    /// actually emitted.
    ///
    /// Not connected is not an error: the join is logged and dropped, and
    /// the session controller re-issues it once `Connected` is observed.
    pub async fn join_room(&mut self, room_id: &str) -> bool {
        if self.state != ConnectionState::Connected {
            warn!(room_id, "joinRoom dropped; connection not established");
            return false;
        }
        self.emit(ClientEvent::JoinRoom(room_id.to_string())).await
    }

    /// Fire-and-forget outbound event; at-most-once from this side.
    ///
    /// A send failure flips the connection to `Disconnected` (the driver
    /// will observe it and redial) but is never surfaced as an error.
    pub async fn emit(&mut self, event: ClientEvent) -> bool {
        if self.state != ConnectionState::Connected {
            debug!("outbound event dropped; connection not established");
            return false;
        }
        match self.transport.send(&event).await {
            Ok(()) => true,
            Err(error) => {
                warn!(error = %error, "send failed; marking connection lost");
                self.transport.close().await;
                self.state = ConnectionState::Disconnected;
                false
            }
        }
    }

    /// Wait for the next inbound event.
    ///
    /// Flips to `Disconnected` when the transport closes or errors; the
    /// driver applies `reconnect_delay` before redialing.
    pub async fn recv_event(&mut self) -> Result<GatewayEvent> {
        if self.state != ConnectionState::Connected {
            return Err(anyhow!("cannot receive: not connected"));
        }

        match self.transport.recv().await {
            Ok(Some(event)) => Ok(GatewayEvent::Server(event)),
            Ok(None) => {
                self.state = ConnectionState::Disconnected;
                Ok(GatewayEvent::Disconnected {
                    reason: "connection closed by server".to_string(),
                })
            }
            Err(error) => {
                self.transport.close().await;
                self.state = ConnectionState::Disconnected;
                Ok(GatewayEvent::Disconnected { reason: format!("receive failed: {error}") })
            }
        }
    }

    /// Tear the connection down locally.
    pub async fn disconnect(&mut self) {
        self.transport.close().await;
        self.state = ConnectionState::Disconnected;
    }

    /// Backoff delay before the next reconnection attempt.
    pub fn reconnect_delay(&self) -> Duration {
        let exp = self.consecutive_failures.min(7);
        self.policy.base_delay.saturating_mul(1u32 << exp).min(self.policy.max_delay)
    }

    /// Whether another attempt is allowed under `max_attempts`.
    pub fn should_reconnect(&self) -> bool {
        self.consecutive_failures < self.policy.max_attempts
    }
}

// ── Production transport stack ──────────────────────────────────────

/// Production transport: WebSocket preferred, HTTP long polling as the
/// fallback. The downgrade is invisible to callers — both speak the same
/// frames.
pub struct TransportStack {
    server_url: Url,
    active: Option<ActiveTransport>,
}

enum ActiveTransport {
    Socket(SocketTransport),
    Polling(PollingTransport),
}

impl TransportStack {
    pub fn new(server_url: Url) -> Self {
        Self { server_url, active: None }
    }
}

#[async_trait]
impl ChatTransport for TransportStack {
    async fn open(&mut self, identity: &UserProfile) -> Result<()> {
        match SocketTransport::open_channel(&self.server_url, identity).await {
            Ok(socket) => {
                self.active = Some(ActiveTransport::Socket(socket));
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "WebSocket unavailable; falling back to long polling");
                let polling = PollingTransport::open_channel(&self.server_url, identity).await?;
                self.active = Some(ActiveTransport::Polling(polling));
                Ok(())
            }
        }
    }

    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        match self.active.as_mut() {
            Some(ActiveTransport::Socket(socket)) => socket.send(event).await,
            Some(ActiveTransport::Polling(polling)) => polling.send(event).await,
            None => Err(anyhow!("transport not open")),
        }
    }

    async fn recv(&mut self) -> Result<Option<ServerEvent>> {
        match self.active.as_mut() {
            Some(ActiveTransport::Socket(socket)) => socket.recv().await,
            Some(ActiveTransport::Polling(polling)) => polling.recv().await,
            None => Err(anyhow!("transport not open")),
        }
    }

    async fn close(&mut self) {
        match self.active.take() {
            Some(ActiveTransport::Socket(mut socket)) => socket.close().await,
            Some(ActiveTransport::Polling(mut polling)) => polling.close().await,
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_common::protocol::InboundMessage;
    use std::collections::VecDeque;

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct MockTransport {
        /// Responses to be returned by recv() in order; `None` = close.
        recv_queue: VecDeque<Option<ServerEvent>>,
        /// Events sent via send().
        sent: Vec<ClientEvent>,
        /// Identities passed to open(), in order.
        opened_as: Vec<UserProfile>,
        /// Whether close was called.
        closed: bool,
        /// If set, open() fails this many times before succeeding.
        open_failures: u32,
        /// If set, the next send() returns this error.
        send_error: Option<String>,
    }

    impl MockTransport {
        fn queue_recv(&mut self, event: ServerEvent) {
            self.recv_queue.push_back(Some(event));
        }

        fn queue_close(&mut self) {
            self.recv_queue.push_back(None);
        }
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn open(&mut self, identity: &UserProfile) -> Result<()> {
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(anyhow!("dial refused"));
            }
            self.opened_as.push(identity.clone());
            Ok(())
        }

        async fn send(&mut self, event: &ClientEvent) -> Result<()> {
            if let Some(error) = self.send_error.take() {
                return Err(anyhow!("{error}"));
            }
            self.sent.push(event.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<ServerEvent>> {
            Ok(self.recv_queue.pop_front().flatten())
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn identity() -> UserProfile {
        UserProfile { id: "u-local".to_string(), username: "local".to_string() }
    }

    async fn connected_manager(transport: MockTransport) -> ConnectionManager<MockTransport> {
        let mut manager = ConnectionManager::new(transport);
        assert_eq!(manager.connect(identity()).await, GatewayEvent::Connected);
        manager
    }

    // ── Connect ────────────────────────────────────────────────────

    #[tokio::test]
    async fn connect_is_idempotent_while_connected() {
        let mut manager = connected_manager(MockTransport::default()).await;

        assert_eq!(manager.connect(identity()).await, GatewayEvent::Connected);
        assert_eq!(manager.state(), ConnectionState::Connected);
        // Only one real dial happened.
        assert_eq!(manager.transport.opened_as.len(), 1);
    }

    #[tokio::test]
    async fn failed_open_reports_disconnected_and_counts_the_failure() {
        let transport = MockTransport { open_failures: 1, ..Default::default() };
        let mut manager = ConnectionManager::new(transport);

        let event = manager.connect(identity()).await;
        assert!(matches!(event, GatewayEvent::Disconnected { .. }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.reconnect_delay() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn reconnect_redials_with_the_stored_identity() {
        let transport = MockTransport { open_failures: 1, ..Default::default() };
        let mut manager = ConnectionManager::new(transport);

        let _ = manager.connect(identity()).await;
        let event = manager.reconnect().await.expect("identity is stored");
        assert_eq!(event, GatewayEvent::Connected);
        assert_eq!(manager.transport.opened_as, vec![identity()]);
    }

    // ── join_room / emit ───────────────────────────────────────────

    #[tokio::test]
    async fn join_room_is_dropped_silently_while_disconnected() {
        let mut manager = ConnectionManager::new(MockTransport::default());

        assert!(!manager.join_room("r1").await);
        assert!(manager.transport.sent.is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn join_room_sends_the_frame_when_connected() {
        let mut manager = connected_manager(MockTransport::default()).await;

        assert!(manager.join_room("r1").await);
        assert_eq!(manager.transport.sent, vec![ClientEvent::JoinRoom("r1".to_string())]);
    }

    #[tokio::test]
    async fn send_failure_flips_to_disconnected() {
        let transport =
            MockTransport { send_error: Some("broken pipe".to_string()), ..Default::default() };
        let mut manager = connected_manager(transport).await;

        assert!(!manager.join_room("r1").await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.transport.closed);
    }

    // ── recv_event ─────────────────────────────────────────────────

    #[tokio::test]
    async fn recv_maps_server_events() {
        let mut transport = MockTransport::default();
        transport.queue_recv(ServerEvent::NewMessage(InboundMessage {
            sender: "alice".to_string(),
            text: "hi".to_string(),
        }));
        let mut manager = connected_manager(transport).await;

        let event = manager.recv_event().await.expect("connected");
        assert!(matches!(event, GatewayEvent::Server(ServerEvent::NewMessage(_))));
    }

    #[tokio::test]
    async fn recv_close_reports_disconnected() {
        let mut transport = MockTransport::default();
        transport.queue_close();
        let mut manager = connected_manager(transport).await;

        let event = manager.recv_event().await.expect("connected");
        assert!(matches!(event, GatewayEvent::Disconnected { .. }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.recv_event().await.is_err());
    }

    // ── Backoff ────────────────────────────────────────────────────

    #[tokio::test]
    async fn backoff_grows_exponentially_and_caps() {
        let transport = MockTransport { open_failures: u32::MAX, ..Default::default() };
        let mut manager = ConnectionManager::new(transport).with_reconnect_policy(ReconnectPolicy {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            max_attempts: u32::MAX,
        });

        assert_eq!(manager.reconnect_delay(), Duration::from_millis(250));
        let _ = manager.connect(identity()).await;
        assert_eq!(manager.reconnect_delay(), Duration::from_millis(500));
        let _ = manager.reconnect().await;
        assert_eq!(manager.reconnect_delay(), Duration::from_millis(1000));

        for _ in 0..10 {
            let _ = manager.reconnect().await;
        }
        assert_eq!(manager.reconnect_delay(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn reconnect_before_the_first_connect_is_an_error() {
        let mut manager = ConnectionManager::new(MockTransport::default());
        assert!(manager.reconnect().await.is_err());
    }

    #[tokio::test]
    async fn backoff_resets_after_a_successful_connect() {
        let transport = MockTransport { open_failures: 2, ..Default::default() };
        let mut manager = ConnectionManager::new(transport);

        let _ = manager.connect(identity()).await;
        let _ = manager.reconnect().await.expect("identity stored on first attempt");
        assert!(manager.reconnect_delay() > Duration::from_millis(250));

        let event = manager.reconnect().await.expect("identity stored");
        assert_eq!(event, GatewayEvent::Connected);
        assert_eq!(manager.reconnect_delay(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_policy() {
        let transport = MockTransport { open_failures: u32::MAX, ..Default::default() };
        let mut manager = ConnectionManager::new(transport).with_reconnect_policy(ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            max_attempts: 2,
        });

        let _ = manager.connect(identity()).await;
        assert!(manager.should_reconnect());
        let _ = manager.reconnect().await;
        assert!(!manager.should_reconnect());
    }
}
