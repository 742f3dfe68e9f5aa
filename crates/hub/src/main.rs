//! The EventSub Hub: the fleet's sole connection to Twitch's EventSub
//! service, fanning out notifications to bot processes over a local IPC
//! socket and reconciling subscriptions against what each bot has asked
//! for.

mod ipc_server;
mod reconcile;
mod router;
mod sessions;
mod state;
mod token_refresh;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fleet_config::FleetConfig;
use token_store::{Database, TokenKind};
use twitch_client::auth::TokenRefresher;
use twitch_client::eventsub::{EventSubClient, EventSubConfig};

use sessions::Sessions;
use state::HubState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("KISSBOT_CONFIG").unwrap_or_else(|_| "fleet.toml".to_string());
    let config = FleetConfig::load(&config_path)?;

    let db = Database::open(&config.store.database_path, &config.store.key_path)?;

    if config.twitch.bot_user_id.is_empty() {
        anyhow::bail!("twitch.bot_user_id must be set: the hub has no identity to authenticate EventSub with");
    }

    let record = db
        .get_tokens(&config.twitch.bot_user_id, TokenKind::Bot)?
        .ok_or_else(|| anyhow::anyhow!("no stored token for bot user {}", config.twitch.bot_user_id))?;
    if record.needs_reauth || record.revoked {
        anyhow::bail!("bot token for {} needs reauthorization, refusing to start", config.twitch.bot_user_id);
    }

    let token = twitch_client::Token {
        access_token: record.access_token,
        refresh_token: record.refresh_token,
        scope: record.scopes.join(" "),
        expires_at: record.expires_at.timestamp(),
    };

    let eventsub = EventSubClient::connect(EventSubConfig { client_id: config.twitch.client_id.clone() }, token);

    let shutdown = CancellationToken::new();
    let (reconcile_tx, reconcile_rx) = mpsc::channel::<()>(8);

    let state = Arc::new(HubState {
        db: db.clone(),
        sessions: Sessions::new(),
        eventsub_commands: eventsub.commands.clone(),
        reconcile_trigger: reconcile_tx,
        shutdown: shutdown.clone(),
    });

    let reconcile_config = reconcile::ReconcileConfig {
        interval: std::time::Duration::from_secs(config.hub.reconcile_interval_secs),
        rate_limit_per_sec: config.hub.rate_limit_per_sec,
        jitter_ms: config.hub.jitter_ms,
    };

    let refresher = TokenRefresher::new(config.twitch.client_id.clone(), config.twitch.client_secret.clone());

    let ipc_state = state.clone();
    let socket_path = config.hub.socket_path.clone();
    let ipc_task = tokio::spawn(async move {
        if let Err(e) = ipc_server::run(ipc_state, &socket_path).await {
            tracing::error!(error = %e, "IPC server exited with error");
        }
    });

    let reconcile_state = state.clone();
    let reconcile_task = tokio::spawn(reconcile::run(reconcile_state, reconcile_rx, eventsub.status, reconcile_config));

    let router_state = state.clone();
    let router_task = tokio::spawn(router::run(router_state, eventsub.events));

    let refresh_task = tokio::spawn(token_refresh::run(
        db,
        refresher,
        config.twitch.bot_user_id.clone(),
        config.timeouts.refresh_margin_mins,
        eventsub.commands,
        shutdown.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
    let _ = eventsub.shutdown.send(()).await;

    let _ = tokio::join!(ipc_task, reconcile_task, router_task, refresh_task);
    tracing::info!("hub stopped");
    Ok(())
}
