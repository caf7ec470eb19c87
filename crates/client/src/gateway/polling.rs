// HTTP long-polling fallback for the live channel (reqwest).
//
// Speaks the same frames as the socket transport: outbound events are
// POSTed one at a time, inbound events arrive as JSON batches from a GET
// the server holds open until it has something to say. Used only when the
// WebSocket upgrade is unavailable; callers cannot tell the difference.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use parley_common::protocol::{ClientEvent, ServerEvent};
use parley_common::types::UserProfile;
use url::Url;
use uuid::Uuid;

pub struct PollingTransport {
    http: reqwest::Client,
    events_url: Url,
    queue: VecDeque<ServerEvent>,
    closed: bool,
}

impl PollingTransport {
    /// Open the polling channel and probe it once so an unreachable server
    /// fails at connect time, not on the first receive.
    pub(crate) async fn open_channel(server_url: &Url, identity: &UserProfile) -> Result<Self> {
        // Unlike a socket, polling has no connection for the server to key
        // its per-client event queue on; a fresh channel id stands in.
        let channel_id = Uuid::new_v4();
        let mut events_url = server_url.join("events").context("invalid server URL")?;
        events_url
            .query_pairs_mut()
            .append_pair("userId", &identity.id)
            .append_pair("username", &identity.username)
            .append_pair("channelId", &channel_id.to_string());

        let http = reqwest::Client::builder()
            .build()
            .context("failed to build the polling HTTP client")?;

        let mut transport = Self { http, events_url, queue: VecDeque::new(), closed: false };
        transport.poll(true).await.context("polling channel unavailable")?;
        Ok(transport)
    }

    pub(crate) async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        self.http
            .post(self.events_url.clone())
            .json(event)
            .send()
            .await
            .context("polling send failed")?
            .error_for_status()
            .context("server rejected the outbound event")?;
        Ok(())
    }

    pub(crate) async fn recv(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if let Some(event) = self.queue.pop_front() {
                return Ok(Some(event));
            }
            self.poll(false).await?;
        }
    }

    pub(crate) async fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
    }

    /// One poll round-trip. With `probe` set the server is asked to answer
    /// immediately instead of holding the request open.
    async fn poll(&mut self, probe: bool) -> Result<()> {
        let mut request = self.http.get(self.events_url.clone());
        if probe {
            request = request.query(&[("wait", "0")]);
        }
        let batch: Vec<ServerEvent> = request
            .send()
            .await
            .context("poll request failed")?
            .error_for_status()
            .context("server rejected the poll")?
            .json()
            .await
            .context("malformed poll payload")?;
        self.queue.extend(batch);
        Ok(())
    }
}
