//! Polls every tracked child non-blockingly and restarts whatever died,
//! with the bounded-backoff schedule from `state::TrackedProcess`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use token_store::{InstanceRole, InstanceStatus, Severity, TokenKind};

use crate::process::{spawn_bot, spawn_hub, wait_for_hub_socket};
use crate::state::Fleet;
use crate::{HUB_INSTANCE_ID, bot_instance_id};

/// A bot instance is considered hung, not merely slow, once its heartbeat
/// is this many health-loop intervals old while the process hasn't exited.
const STALE_HEARTBEAT_INTERVALS: u32 = 3;

async fn sleep_or_cancel(token: &tokio_util::sync::CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return false;
    }
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

pub async fn run(fleet: Arc<Fleet>, config_path: PathBuf) {
    let interval = fleet.config.timeouts.health_interval();
    loop {
        if sleep_or_cancel(&fleet.shutdown, interval).await {
            return;
        }

        check_hub(&fleet, &config_path).await;
        check_bots(&fleet, &config_path).await;
        check_stale_heartbeats(&fleet, interval).await;
    }
}

async fn check_hub(fleet: &Arc<Fleet>, config_path: &PathBuf) {
    let exited = {
        let mut guard = fleet.hub.lock().await;
        match guard.as_mut() {
            Some(tracked) => matches!(tracked.child.try_wait(), Ok(Some(_))),
            None => false,
        }
    };
    if !exited {
        return;
    }

    let delay = {
        let mut guard = fleet.hub.lock().await;
        guard.as_mut().and_then(|t| t.record_crash())
    };
    let _ = fleet.db.audit(Severity::Warn, None, "hub process exited, scheduling restart");
    let _ = fleet.db.set_instance_status(HUB_INSTANCE_ID, InstanceStatus::Crashed);

    let Some(delay) = delay else {
        let _ = fleet.db.audit(Severity::Error, None, "hub exceeded crash budget, not restarting automatically");
        tracing::error!("hub exceeded crash budget; use the console to restart it manually");
        return;
    };
    if sleep_or_cancel(&fleet.shutdown, delay).await {
        return;
    }

    match spawn_hub(config_path) {
        Ok(child) => {
            if !wait_for_hub_socket(&fleet.config.hub.socket_path).await {
                tracing::warn!("restarted hub did not open its IPC socket in time");
            }
            let pid = child.id().map(i64::from);
            if let Err(e) = fleet.db.register_instance(HUB_INSTANCE_ID, InstanceRole::Hub, None, pid) {
                tracing::warn!(error = %e, "failed to re-register hub instance");
            }
            let mut guard = fleet.hub.lock().await;
            if let Some(tracked) = guard.as_mut() {
                tracked.child = child;
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to respawn hub"),
    }
}

async fn check_bots(fleet: &Arc<Fleet>, config_path: &PathBuf) {
    let exited_channels: Vec<String> = {
        let mut guard = fleet.bots.lock().await;
        guard
            .iter_mut()
            .filter(|(_, tracked)| matches!(tracked.child.try_wait(), Ok(Some(_))))
            .map(|(channel, _)| channel.clone())
            .collect()
    };

    for channel in exited_channels {
        let delay = {
            let mut guard = fleet.bots.lock().await;
            guard.get_mut(&channel).and_then(|t| t.record_crash())
        };
        let _ = fleet.db.audit(Severity::Warn, Some(&channel), "bot process exited, scheduling restart");
        let _ = fleet.db.set_instance_status(&bot_instance_id(&channel), InstanceStatus::Crashed);

        let Some(delay) = delay else {
            flag_needs_reauth_if_applicable(fleet, &channel).await;
            continue;
        };
        if sleep_or_cancel(&fleet.shutdown, delay).await {
            return;
        }

        match spawn_bot(config_path, &channel) {
            Ok(child) => {
                let pid = child.id().map(i64::from);
                if let Err(e) = fleet.db.register_instance(&bot_instance_id(&channel), InstanceRole::Bot, Some(&channel), pid) {
                    tracing::warn!(channel, error = %e, "failed to re-register bot instance");
                }
                let mut guard = fleet.bots.lock().await;
                if let Some(tracked) = guard.get_mut(&channel) {
                    tracked.child = child;
                }
            }
            Err(e) => tracing::error!(channel, error = %e, "failed to respawn bot"),
        }
    }
}

async fn flag_needs_reauth_if_applicable(fleet: &Arc<Fleet>, channel: &str) {
    let Ok(Some(user)) = fleet.db.get_user_by_login(channel) else {
        let _ = fleet.db.audit(Severity::Error, Some(channel), "bot exceeded crash budget, not restarting automatically");
        return;
    };
    if let Ok(Some(record)) = fleet.db.get_tokens(&user.user_id, TokenKind::Broadcaster) {
        if !record.needs_reauth && !record.revoked {
            let _ = fleet.db.audit(Severity::Error, Some(channel), "bot exceeded crash budget under a sustained backoff, not restarting automatically");
            return;
        }
    }
    let _ = fleet.db.set_instance_status(&bot_instance_id(channel), InstanceStatus::NeedsReauth);
    let _ = fleet.db.audit(Severity::Error, Some(channel), "bot held in needs_reauth, not restarting automatically");
}

/// Supplements the `try_wait`-based checks above: a bot process can still
/// be alive but wedged (event loop stuck, transport dead without exiting),
/// which `try_wait` can't see. A stale heartbeat on a bot we still believe
/// is `running` is treated as hung, and the process is killed outright so
/// the next cycle's exit check restarts it through the normal crash path.
async fn check_stale_heartbeats(fleet: &Arc<Fleet>, interval: Duration) {
    let max_age = chrono::Duration::from_std(interval * STALE_HEARTBEAT_INTERVALS).unwrap_or(chrono::Duration::minutes(5));
    let Ok(stale) = fleet.db.stale_instances(max_age) else {
        return;
    };

    for instance in stale {
        let Some(channel) = instance.channel_id else { continue };
        let mut guard = fleet.bots.lock().await;
        let Some(tracked) = guard.get_mut(&channel) else { continue };
        if !matches!(tracked.child.try_wait(), Ok(None)) {
            continue;
        }
        tracing::warn!(channel, "bot heartbeat is stale, treating as hung and killing it");
        let _ = fleet.db.audit(Severity::Warn, Some(&channel), "bot heartbeat stale, killing hung process");
        let _ = tracked.child.start_kill();
    }
}
