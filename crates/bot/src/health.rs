//! Three-signal health check: transport connectivity, keepalive
//! recency, and channel membership. First failure triggers a native
//! reconnect; a second consecutive failure tears the transport down and
//! rebuilds it from scratch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatRecord;
use crate::transport::Transport;

async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

fn check_once(transport: &Transport, channel: &str) -> bool {
    let connected = transport.is_connected();
    let in_room = transport.is_in_room(channel);
    connected && in_room
}

async fn keepalive_ok(transport: &Transport) -> bool {
    match transport.last_keepalive_at().await {
        Some(at) => at.elapsed() < transport.keepalive_threshold(),
        None => false,
    }
}

pub async fn run(
    transport: Arc<Mutex<Transport>>,
    channel: String,
    interval: Duration,
    shutdown: CancellationToken,
    on_chat: Arc<dyn Fn(ChatRecord) + Send + Sync>,
) {
    let mut consecutive_failures = 0u32;

    loop {
        if sleep_or_cancel(&shutdown, interval).await {
            return;
        }

        let healthy = {
            let guard = transport.lock().await;
            check_once(&guard, &channel) && keepalive_ok(&guard).await
        };

        if healthy {
            consecutive_failures = 0;
            continue;
        }

        consecutive_failures += 1;
        tracing::warn!(channel, consecutive_failures, "health check failed");

        if consecutive_failures == 1 {
            let mut guard = transport.lock().await;
            guard.disconnect().await;
            if let Err(e) = guard.connect(on_chat.clone()).await {
                tracing::warn!(channel, error = %e, "native reconnect failed");
            }
        } else {
            tracing::warn!(channel, "second consecutive health failure, rebuilding transport");
            let mut guard = transport.lock().await;
            guard.disconnect().await;
            if let Err(e) = guard.connect(on_chat.clone()).await {
                tracing::error!(channel, error = %e, "transport rebuild failed");
            } else {
                consecutive_failures = 0;
            }
        }
    }
}
