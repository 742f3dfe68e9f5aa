//! Registry of connected bot IPC sessions, keyed by channel id.
//!
//! The Hub never holds a bot object, only a sender half of its frame
//! channel — sessions are dropped on disconnect, no shared ownership is
//! needed (per the cyclic-reference design note).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

use fleet_ipc::HubFrame;

#[derive(Clone)]
pub struct Sessions {
    inner: Arc<Mutex<HashMap<String, mpsc::Sender<HubFrame>>>>,
    dropped_events: Arc<AtomicU64>,
}

impl Sessions {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn register(&self, channel_id: String, tx: mpsc::Sender<HubFrame>) {
        self.inner.lock().await.insert(channel_id, tx);
    }

    pub async fn remove(&self, channel_id: &str) {
        self.inner.lock().await.remove(channel_id);
    }

    /// Forward a frame to the session for `channel_id`. If no session is
    /// registered (the bot may be restarting), the event is dropped and
    /// the drop counter is incremented.
    pub async fn route(&self, channel_id: &str, frame: HubFrame) {
        let sessions = self.inner.lock().await;
        match sessions.get(channel_id) {
            Some(tx) => {
                if tx.send(frame).await.is_err() {
                    tracing::warn!(channel_id, "session channel closed while routing event");
                }
            }
            None => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(channel_id, "event dropped: no connected session for channel");
            }
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn route_delivers_to_registered_channel() {
        let sessions = Sessions::new();
        let (tx, mut rx) = mpsc::channel(4);
        sessions.register("10".into(), tx).await;

        sessions
            .route("10", HubFrame::Event { channel_id: "10".into(), topic: "stream.online".into(), data: serde_json::json!({}) })
            .await;

        assert!(rx.recv().await.is_some());
        assert_eq!(sessions.dropped_events(), 0);
    }

    #[tokio::test]
    async fn route_to_unknown_channel_increments_drop_counter() {
        let sessions = Sessions::new();
        sessions
            .route("missing", HubFrame::Event { channel_id: "missing".into(), topic: "stream.online".into(), data: serde_json::json!({}) })
            .await;
        assert_eq!(sessions.dropped_events(), 1);
    }

    #[tokio::test]
    async fn removed_session_stops_receiving() {
        let sessions = Sessions::new();
        let (tx, _rx) = mpsc::channel(4);
        sessions.register("10".into(), tx).await;
        sessions.remove("10").await;

        sessions
            .route("10", HubFrame::Event { channel_id: "10".into(), topic: "stream.online".into(), data: serde_json::json!({}) })
            .await;
        assert_eq!(sessions.dropped_events(), 1);
    }
}
