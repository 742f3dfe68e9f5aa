//! Drains `chat.outbound`, applies a per-channel moving-window rate
//! budget, and sends through the active transport with a bounded
//! timeout. A send that can't clear the budget or the transport in time
//! is dropped rather than blocking the rest of the runtime.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use fleet_ipc::Bus;

use crate::chat::OutboundMessage;
use crate::transport::Transport;

/// Twitch's standard moving-window chat budget for an unprivileged bot
/// account: 20 messages per 30-second window.
const WINDOW: Duration = Duration::from_secs(30);
const BUDGET: usize = 20;

pub struct RateLimiter {
    sent_at: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { sent_at: VecDeque::new() }
    }

    /// Blocks (by sleeping) until the window has room, up to `deadline`
    /// worth of total patience. Returns `false` if the deadline passed
    /// first.
    async fn wait_for_room(&mut self, deadline: Instant) -> bool {
        loop {
            let now = Instant::now();
            while self.sent_at.front().is_some_and(|t| now.duration_since(*t) > WINDOW) {
                self.sent_at.pop_front();
            }
            if self.sent_at.len() < BUDGET {
                self.sent_at.push_back(now);
                return true;
            }
            if now >= deadline {
                return false;
            }
            let oldest = *self.sent_at.front().unwrap();
            let wait = WINDOW.saturating_sub(now.duration_since(oldest)).min(deadline.saturating_duration_since(now));
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run(
    bus: Arc<Bus<crate::state::Topic, crate::state::BusMessage>>,
    transport: Arc<Mutex<Transport>>,
    send_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut sub = bus.subscribe(crate::state::Topic::ChatOutbound).await;
    let mut limiter = RateLimiter::new();

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return,
            message = sub.recv() => message,
        };
        let Some(crate::state::BusMessage::Outbound(OutboundMessage { channel, text })) = message else {
            continue;
        };

        let deadline = Instant::now() + send_timeout;
        if !limiter.wait_for_room(deadline).await {
            tracing::warn!(channel, "outbound message dropped: rate budget exhausted before send timeout");
            bus.publish(&crate::state::Topic::MetricsUpdate, crate::state::BusMessage::Metric { name: "outbound_dropped_rate_limit".into(), value: 1.0 }).await;
            continue;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let result = {
            let guard = transport.lock().await;
            guard.send(&channel, &text, remaining).await
        };
        if let Err(e) = result {
            tracing::warn!(channel, error = %e, "outbound send failed, dropping message");
            bus.publish(&crate::state::Topic::MetricsUpdate, crate::state::BusMessage::Metric { name: "outbound_dropped_send_error".into(), value: 1.0 }).await;
        }
    }
}
