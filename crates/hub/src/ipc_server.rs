//! The Hub's local IPC socket: one bot session per accepted connection.
//!
//! The accept loop races a cancellation token against `listener.accept()`
//! so shutdown propagates without waiting on an in-flight connection.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use fleet_ipc::{BotFrame, HubFrame, IpcError, read_frame, write_frame};

use crate::state::HubState;

/// `hello` must arrive within this long of connecting, per the IPC
/// session-lifecycle contract.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(state: Arc<HubState>, socket_path: &Path) -> anyhow::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    restrict_permissions(socket_path)?;
    tracing::info!(path = %socket_path.display(), "hub IPC socket listening");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                tracing::info!("IPC server stopping (shutdown)");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_session(state, stream).await {
                                tracing::warn!(error = %e, "IPC session ended with error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "IPC accept failed"),
                }
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn handle_session(state: Arc<HubState>, stream: UnixStream) -> Result<(), IpcError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let hello = match tokio::time::timeout(HELLO_TIMEOUT, read_frame::<BotFrame, _>(&mut reader)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            tracing::warn!("IPC session closed: no hello within timeout");
            return Ok(());
        }
    };

    let BotFrame::Hello { channel_id, channel_name, topics } = hello else {
        let mut write_half = write_half;
        let _ = write_frame(&mut write_half, &HubFrame::error("protocol", "first frame must be hello")).await;
        return Ok(());
    };

    tracing::info!(channel_id, channel_name, "bot session established");

    let (frame_tx, mut frame_rx) = mpsc::channel::<HubFrame>(64);
    state.sessions.register(channel_id.clone(), frame_tx.clone()).await;
    let _ = frame_tx.send(HubFrame::ack("hello")).await;

    for topic in topics {
        if let Err(e) = state.db.put_desired_subscription(&channel_id, &topic) {
            tracing::warn!(channel_id, topic, error = %e, "failed to record desired subscription from hello");
        }
    }
    let _ = state.reconcile_trigger.try_send(());

    let mut write_half = write_half;
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            frame = read_frame::<BotFrame, _>(&mut reader) => {
                match frame {
                    Ok(Some(BotFrame::Subscribe { channel_id: cid, topic })) => {
                        if let Err(e) = state.db.put_desired_subscription(&cid, &topic) {
                            tracing::warn!(channel_id = %cid, topic, error = %e, "failed to record desired subscription");
                        }
                        let _ = state.reconcile_trigger.try_send(());
                        let _ = frame_tx.send(HubFrame::ack("subscribe")).await;
                    }
                    Ok(Some(BotFrame::Unsubscribe { channel_id: cid, topic })) => {
                        if let Err(e) = state.db.remove_desired_subscription(&cid, &topic) {
                            tracing::warn!(channel_id = %cid, topic, error = %e, "failed to remove desired subscription");
                        }
                        let _ = state.reconcile_trigger.try_send(());
                        let _ = frame_tx.send(HubFrame::ack("unsubscribe")).await;
                    }
                    Ok(Some(BotFrame::Ping)) => {
                        let _ = frame_tx.send(HubFrame::Pong).await;
                    }
                    Ok(Some(BotFrame::Hello { .. })) => {
                        let _ = frame_tx.send(HubFrame::error("protocol", "hello must be the first frame")).await;
                    }
                    Ok(None) => {
                        tracing::info!(channel_id, "bot session closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(channel_id, error = %e, "IPC protocol error, closing session");
                        break;
                    }
                }
            }
        }
    }

    state.sessions.remove(&channel_id).await;
    writer.abort();
    Ok(())
}
