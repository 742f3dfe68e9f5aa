//! Reconciliation: diff desired subscriptions against active ones and
//! converge the remote service toward the desired set, rate-limited with
//! jitter. Also applies status updates from the running EventSub client
//! back onto the subscription tables.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::interval;

use token_store::{Severity, subscriptions};
use twitch_client::eventsub::{EventSubCommand, EventSubStatus};

use crate::state::HubState;

pub struct ReconcileConfig {
    pub interval: Duration,
    pub rate_limit_per_sec: f64,
    pub jitter_ms: u64,
}

pub async fn run(
    state: Arc<HubState>,
    mut trigger_rx: mpsc::Receiver<()>,
    mut status_rx: mpsc::Receiver<EventSubStatus>,
    config: ReconcileConfig,
) {
    let mut tick = interval(config.interval);
    tick.tick().await; // first tick fires immediately; consume it, the welcome triggers the real first run

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                tracing::info!("reconciliation loop stopping (shutdown)");
                return;
            }
            _ = tick.tick() => {
                reconcile_once(&state, &config).await;
            }
            Some(()) = trigger_rx.recv() => {
                reconcile_once(&state, &config).await;
            }
            Some(status) = status_rx.recv() => {
                apply_status(&state, status, &config).await;
            }
        }
    }
}

async fn reconcile_once(state: &HubState, config: &ReconcileConfig) {
    let desired = match state.db.list_desired_subscriptions() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list desired subscriptions");
            return;
        }
    };
    let active = match state.db.list_active_subscriptions() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list active subscriptions");
            return;
        }
    };

    let (to_subscribe, to_unsubscribe) = subscriptions::diff(&desired, &active);
    if to_subscribe.is_empty() && to_unsubscribe.is_empty() {
        return;
    }
    tracing::info!(to_subscribe = to_subscribe.len(), to_unsubscribe = to_unsubscribe.len(), "reconciling subscriptions");

    let spacing = Duration::from_secs_f64(1.0 / config.rate_limit_per_sec.max(0.001));

    for (channel_id, topic) in to_subscribe {
        let _ = state
            .eventsub_commands
            .send(EventSubCommand::Subscribe { channel_id, topic })
            .await;
        sleep_with_jitter(spacing, config.jitter_ms).await;
    }

    for stale in to_unsubscribe {
        let _ = state
            .eventsub_commands
            .send(EventSubCommand::Unsubscribe { channel_id: stale.channel_id, topic: stale.topic })
            .await;
        sleep_with_jitter(spacing, config.jitter_ms).await;
    }
}

async fn sleep_with_jitter(base: Duration, jitter_ms: u64) {
    let jitter = if jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..jitter_ms) };
    tokio::time::sleep(base + Duration::from_millis(jitter)).await;
}

async fn apply_status(state: &HubState, status: EventSubStatus, config: &ReconcileConfig) {
    match status {
        EventSubStatus::SessionEstablished { session_id } => {
            if let Err(e) = state.db.set_hub_state("eventsub_session_id", &session_id) {
                tracing::warn!(error = %e, "failed to persist eventsub session id");
            }
            // Creates the first subscription within the remote service's
            // grace window rather than waiting for the next scheduled tick.
            reconcile_once(state, config).await;
        }
        EventSubStatus::SubscriptionCreated { channel_id, topic, subscription_id } => {
            if let Err(e) = state.db.record_active_subscription(&channel_id, &topic, &subscription_id) {
                tracing::warn!(channel_id, topic, error = %e, "failed to record active subscription");
            }
        }
        EventSubStatus::SubscriptionFailed { channel_id, topic, status, message } => {
            let severity = if (400..500).contains(&(status as i32)) { Severity::Warn } else { Severity::Error };
            let _ = state.db.audit(
                severity,
                Some(&channel_id),
                &format!("subscription {topic} failed (status {status}): {message}"),
            );
        }
        EventSubStatus::SubscriptionDeleted { channel_id, topic } => {
            if let Err(e) = state.db.forget_active_subscription(&channel_id, &topic) {
                tracing::warn!(channel_id, topic, error = %e, "failed to forget deleted subscription");
            }
        }
        EventSubStatus::SubscriptionRevoked { channel_id, topic } => {
            if let Err(e) = state.db.forget_active_subscription(&channel_id, &topic) {
                tracing::warn!(channel_id, topic, error = %e, "failed to forget revoked subscription");
            }
            let _ = state.db.audit(Severity::Warn, Some(&channel_id), &format!("subscription {topic} revoked upstream"));
        }
    }
}
