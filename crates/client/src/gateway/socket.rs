// WebSocket transport for the live channel (tokio-tungstenite).
//
// The authenticated identity rides the handshake as query credentials;
// after that, frames are the JSON events from `parley_common::protocol`.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use parley_common::protocol::{ClientEvent, ServerEvent};
use parley_common::types::UserProfile;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

pub struct SocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SocketTransport {
    /// Dial the server's socket endpoint.
    pub(crate) async fn open_channel(server_url: &Url, identity: &UserProfile) -> Result<Self> {
        let url = socket_url(server_url, identity)?;
        let (stream, _response) =
            connect_async(url.as_str()).await.context("WebSocket handshake failed")?;
        Ok(Self { stream })
    }

    pub(crate) async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        let encoded = serde_json::to_string(event).context("failed to encode outbound frame")?;
        self.stream
            .send(WsFrame::Text(encoded.into()))
            .await
            .context("WebSocket send failed")
    }

    pub(crate) async fn recv(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            let Some(frame) = self.stream.next().await else {
                return Ok(None);
            };
            match frame.context("WebSocket receive failed")? {
                WsFrame::Text(text) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => return Ok(Some(event)),
                    // Unknown event names are forward-compatible noise.
                    Err(error) => debug!(error = %error, "ignoring unrecognized frame"),
                },
                WsFrame::Ping(payload) => {
                    self.stream
                        .send(WsFrame::Pong(payload))
                        .await
                        .context("WebSocket pong failed")?;
                }
                WsFrame::Close(_) => return Ok(None),
                _ => {}
            }
        }
    }

    pub(crate) async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Derive the ws(s) endpoint from the server's base URL, with the identity
/// attached as handshake credentials.
fn socket_url(server_url: &Url, identity: &UserProfile) -> Result<Url> {
    let mut url = server_url.join("ws").context("invalid server URL")?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(anyhow!("unsupported server URL scheme `{other}`")),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow!("could not derive a WebSocket URL from the server URL"))?;
    url.query_pairs_mut()
        .append_pair("userId", &identity.id)
        .append_pair("username", &identity.username);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> UserProfile {
        UserProfile { id: "u1".to_string(), username: "alice".to_string() }
    }

    #[test]
    fn socket_url_switches_scheme_and_carries_credentials() {
        let base = Url::parse("https://chat.example.com").expect("valid url");
        let url = socket_url(&base, &identity()).expect("derivable");

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws");
        let query: Vec<_> = url.query_pairs().collect();
        assert!(query.iter().any(|(k, v)| k == "userId" && v == "u1"));
        assert!(query.iter().any(|(k, v)| k == "username" && v == "alice"));
    }

    #[test]
    fn plain_http_downgrades_to_ws() {
        let base = Url::parse("http://localhost:5000").expect("valid url");
        let url = socket_url(&base, &identity()).expect("derivable");
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn exotic_schemes_are_rejected() {
        let base = Url::parse("ftp://chat.example.com").expect("valid url");
        assert!(socket_url(&base, &identity()).is_err());
    }
}
