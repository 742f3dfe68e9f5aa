//! Connects to the Hub's IPC socket, sends `hello` and `subscribe` for
//! the topics this bot needs, and converts inbound `event` frames into
//! bus messages. Reconnects with capped exponential backoff on
//! disconnect; once that window elapses it keeps retrying at a fixed,
//! slower interval rather than giving up, so chat keeps working with no
//! push events in the meantime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

use fleet_ipc::{BotFrame, HubFrame, read_frame, write_frame};

const RECONNECT_BACKOFFS: &[u64] = &[1, 2, 4, 8, 16];
const DEGRADED_RETRY_INTERVAL: Duration = Duration::from_secs(60);

pub struct HelloInfo {
    pub channel_id: String,
    pub channel_name: String,
    pub topics: Vec<String>,
}

async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

pub async fn run(
    socket_path: PathBuf,
    hello: HelloInfo,
    on_event: Arc<dyn Fn(String, serde_json::Value) + Send + Sync>,
    on_connection_change: Arc<dyn Fn(bool) + Send + Sync>,
    shutdown: CancellationToken,
) {
    let mut attempt = 0usize;
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match run_session(&socket_path, &hello, &on_event, &on_connection_change, &shutdown).await {
            Ok(()) => attempt = 0,
            Err(e) => tracing::warn!(error = %e, "hub IPC session ended"),
        }
        on_connection_change(false);

        if shutdown.is_cancelled() {
            return;
        }

        let delay = match RECONNECT_BACKOFFS.get(attempt) {
            Some(secs) => {
                attempt += 1;
                Duration::from_secs(*secs)
            }
            None => {
                tracing::warn!("hub IPC unreachable after backoff window, continuing in degraded mode");
                DEGRADED_RETRY_INTERVAL
            }
        };
        if sleep_or_cancel(&shutdown, delay).await {
            return;
        }
    }
}

async fn run_session(
    socket_path: &PathBuf,
    hello: &HelloInfo,
    on_event: &Arc<dyn Fn(String, serde_json::Value) + Send + Sync>,
    on_connection_change: &Arc<dyn Fn(bool) + Send + Sync>,
    shutdown: &CancellationToken,
) -> Result<(), fleet_ipc::IpcError> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| fleet_ipc::IpcError::Io(e.to_string()))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_frame(
        &mut write_half,
        &BotFrame::Hello { channel_id: hello.channel_id.clone(), channel_name: hello.channel_name.clone(), topics: hello.topics.clone() },
    )
    .await?;

    for topic in &hello.topics {
        write_frame(&mut write_half, &BotFrame::Subscribe { channel_id: hello.channel_id.clone(), topic: topic.clone() }).await?;
    }

    on_connection_change(true);
    tracing::info!(channel_id = %hello.channel_id, "connected to hub IPC");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = read_frame::<HubFrame, _>(&mut reader) => {
                match frame? {
                    Some(HubFrame::Event { topic, data, .. }) => on_event(topic, data),
                    Some(HubFrame::Ack { .. }) | Some(HubFrame::Pong) => {}
                    Some(HubFrame::Error { code, message }) => {
                        tracing::warn!(code, message, "hub reported an error");
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}
