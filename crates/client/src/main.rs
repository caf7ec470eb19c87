// parley: standalone headless chat client.
//
// Connects with the configured identity, optionally selects a room, and
// logs state changes until ctrl-c. The interesting machinery lives in the
// library; this is just the bootstrap.

use std::sync::Arc;

use anyhow::Context;
use parley_client::api::ChatApi;
use parley_client::config::ClientConfig;
use parley_client::gateway::TransportStack;
use parley_client::runtime::ChatEngine;
use parley_common::types::Room;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::load();
    let server_url = config
        .server_url
        .as_deref()
        .context("server_url missing from ~/.parley/config.toml")?;
    let server_url = url::Url::parse(server_url).context("invalid server_url")?;

    let api = ChatApi::new(server_url.clone(), config.auth_token.clone());
    let identity = api.fetch_profile().await.context("could not fetch the user profile")?;
    info!(user = %identity.username, "starting parley client");

    let transport = TransportStack::new(server_url);
    let (engine, mut handle) = ChatEngine::new(transport, Arc::new(api), identity);
    let engine_task = tokio::spawn(engine.run());

    if let Some(room_id) = config.room.clone() {
        handle.select_room(Room {
            id: room_id.clone(),
            name: room_id,
            description: String::new(),
            members: Vec::new(),
        });
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = handle.updated() => {
                info!(
                    connection = ?snapshot.connection,
                    session = ?snapshot.session,
                    room = snapshot.room_id.as_deref().unwrap_or("-"),
                    messages = snapshot.messages.len(),
                    online = snapshot.online_users.len(),
                    typing = snapshot.typing_users.len(),
                    "state changed"
                );
            }
        }
    }

    info!("shutting down");
    handle.shutdown();
    engine_task
        .await
        .context("engine task panicked")?
        .context("engine terminated unexpectedly")
}
