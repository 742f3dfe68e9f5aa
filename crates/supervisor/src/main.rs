//! The fleet Supervisor: starts the Hub, spawns one bot process per
//! configured channel, restarts whatever crashes, and mediates an
//! orderly shutdown (bots first, Hub last).

mod console;
mod error;
mod handover;
mod health;
mod process;
mod state;

use std::sync::Arc;
use std::time::Duration;

use token_store::{Database, InstanceRole, Severity, TokenKind};

use fleet_config::FleetConfig;

use error::SupervisorError;
use process::{spawn_bot, spawn_hub, wait_for_hub_socket};
use state::{Fleet, TrackedProcess};

const HUB_INSTANCE_ID: &str = "hub";

fn bot_instance_id(channel: &str) -> String {
    format!("bot-{channel}")
}

/// How many times the Supervisor tries to bring the Hub up before giving
/// up and exiting non-zero.
const HUB_START_ATTEMPTS: u32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("KISSBOT_CONFIG").unwrap_or_else(|_| "fleet.toml".to_string());
    let config = FleetConfig::load(&config_path)?;

    // Step 1: open the Token Store. Fatal if the decryption key is absent
    // or unreadable — there is nothing useful the Supervisor can do
    // without it.
    let db = Database::open(&config.store.database_path, &config.store.key_path)?;

    let fleet = Arc::new(Fleet::new(db, config));

    // Step 2: bring the Hub up before any bot.
    let hub_child = start_hub_with_retries(&fleet, &config_path).await?;
    let hub_pid = hub_child.id().map(i64::from);
    if let Err(e) = fleet.db.register_instance(HUB_INSTANCE_ID, InstanceRole::Hub, None, hub_pid) {
        tracing::warn!(error = %e, "failed to register hub instance");
    }
    *fleet.hub.lock().await = Some(TrackedProcess::new(hub_child));
    tracing::info!("hub is up");

    // Step 3 & 4: for each configured channel, skip ones whose token
    // needs reauthorization, then spawn a bot per the rest.
    let channels = fleet.config.channels.clone();
    for channel in &channels {
        if !channel_is_ready(&fleet, channel) {
            let _ = fleet.db.audit(Severity::Warn, Some(channel), "channel skipped at startup: needs reauthorization");
            tracing::warn!(channel, "skipping channel: needs reauthorization");
            continue;
        }
        spawn_handover_for_channel(&fleet, channel);

        match spawn_bot(std::path::Path::new(&config_path), channel) {
            Ok(child) => {
                let pid = child.id().map(i64::from);
                if let Err(e) = fleet.db.register_instance(&bot_instance_id(channel), InstanceRole::Bot, Some(channel), pid) {
                    tracing::warn!(channel, error = %e, "failed to register bot instance");
                }
                fleet.bots.lock().await.insert(channel.clone(), TrackedProcess::new(child));
                tracing::info!(channel, "bot started");
            }
            Err(e) => {
                let _ = fleet.db.audit(Severity::Error, Some(channel), &format!("failed to start bot: {e}"));
                tracing::error!(channel, error = %e, "failed to start bot");
            }
        }
    }

    let config_path_buf = std::path::PathBuf::from(&config_path);
    let health_fleet = fleet.clone();
    let health_task = tokio::spawn(health::run(health_fleet, config_path_buf.clone()));

    let console_fleet = fleet.clone();
    let console_task = tokio::spawn(console::run(console_fleet, config_path_buf));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        _ = fleet.shutdown.cancelled() => {}
    }
    fleet.shutdown.cancel();

    shutdown_fleet(&fleet).await;

    let _ = tokio::join!(health_task, console_task);
    tracing::info!("supervisor stopped");
    Ok(())
}

async fn start_hub_with_retries(fleet: &Arc<Fleet>, config_path: &str) -> Result<tokio::process::Child, SupervisorError> {
    for attempt in 1..=HUB_START_ATTEMPTS {
        let child = spawn_hub(std::path::Path::new(config_path))?;
        if wait_for_hub_socket(&fleet.config.hub.socket_path).await {
            return Ok(child);
        }
        tracing::warn!(attempt, "hub did not open its IPC socket in time, retrying");
        let _ = fleet.db.audit(Severity::Warn, None, &format!("hub start attempt {attempt} timed out"));
    }
    let _ = fleet.db.audit(Severity::Error, None, "hub failed to start within the allotted attempts");
    Err(SupervisorError::HubFailedToStart(HUB_START_ATTEMPTS))
}

/// Best-effort secret handover: if a bot dials the handover socket
/// shortly after launch, it receives the channel's broadcaster token
/// bundle without that secret ever touching an argv or environment
/// variable. Nobody connecting within the accept window is not an
/// error — the current bot entrypoint reads the Token Store directly
/// and doesn't need the handover to start.
fn spawn_handover_for_channel(fleet: &Arc<Fleet>, channel: &str) {
    let Ok(Some(user)) = fleet.db.get_user_by_login(channel) else { return };
    let Ok(Some(record)) = fleet.db.get_tokens(&user.user_id, TokenKind::Broadcaster) else { return };

    let runtime_dir = fleet.config.hub.socket_path.parent().map(std::path::Path::to_path_buf).unwrap_or_else(|| std::path::PathBuf::from("/tmp"));
    let channel = channel.to_string();
    tokio::spawn(async move {
        let path = handover::handover_socket_path(&runtime_dir, &channel);
        let bundle = handover::SecretBundle {
            access_token: &record.access_token,
            refresh_token: &record.refresh_token,
            scope: &record.scopes.join(" "),
            expires_at: record.expires_at.timestamp(),
        };
        match handover::handover(&path, &bundle).await {
            Ok(true) => tracing::debug!(channel, "secret handover claimed"),
            Ok(false) => tracing::debug!(channel, "secret handover went unclaimed"),
            Err(e) => tracing::warn!(channel, error = %e, "secret handover failed"),
        }
    });
}

fn channel_is_ready(fleet: &Fleet, channel: &str) -> bool {
    let Ok(Some(user)) = fleet.db.get_user_by_login(channel) else {
        return false;
    };
    match fleet.db.get_tokens(&user.user_id, TokenKind::Broadcaster) {
        Ok(Some(record)) => !record.needs_reauth && !record.revoked,
        _ => false,
    }
}

/// Stop every bot first, waiting up to `shutdown_grace` before
/// force-terminating laggards, then stop the Hub. Bots must never race
/// with Hub teardown.
async fn shutdown_fleet(fleet: &Arc<Fleet>) {
    let grace = fleet.config.timeouts.shutdown_grace();

    let channels: Vec<String> = fleet.bots.lock().await.keys().cloned().collect();
    for channel in &channels {
        let mut guard = fleet.bots.lock().await;
        if let Some(tracked) = guard.get_mut(channel) {
            let _ = tracked.child.start_kill();
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let all_gone = {
            let mut guard = fleet.bots.lock().await;
            let mut all_gone = true;
            for tracked in guard.values_mut() {
                if matches!(tracked.child.try_wait(), Ok(None)) {
                    all_gone = false;
                }
            }
            all_gone
        };
        if all_gone || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut guard = fleet.bots.lock().await;
    for (channel, tracked) in guard.iter_mut() {
        if matches!(tracked.child.try_wait(), Ok(None)) {
            tracing::warn!(channel, "force-terminating bot that did not stop within the shutdown grace period");
            let _ = tracked.child.kill().await;
        }
        if let Err(e) = fleet.db.deregister_instance(&bot_instance_id(channel)) {
            tracing::warn!(channel, error = %e, "failed to deregister bot instance");
        }
    }
    drop(guard);

    let mut hub_guard = fleet.hub.lock().await;
    if let Some(mut tracked) = hub_guard.take() {
        let _ = tracked.child.kill().await;
    }
    if let Err(e) = fleet.db.deregister_instance(HUB_INSTANCE_ID) {
        tracing::warn!(error = %e, "failed to deregister hub instance");
    }
}
