//! EventSub WebSocket client for real-time Twitch events.
//!
//! Connects to wss://eventsub.wss.twitch.tv/ws, handles welcome/keepalive/
//! notification/session_reconnect/revocation messages, and owns automatic
//! reconnection with exponential backoff. Unlike a one-shot subscriber,
//! this client tracks every subscription it has created in the current
//! session so a reconnect can replay them against the new session id
//! without help from the caller.

mod connection;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::Token;
use crate::api::TwitchApiClient;

const EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const FAILURE_RESET_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Event types this client knows how to build a subscription condition
/// and version for. Any other topic falls back to the default condition
/// shape (`broadcaster_user_id` only) and version `"1"`.
pub const EVENT_CHANNEL_FOLLOW: &str = "channel.follow";
pub const EVENT_CHANNEL_SUBSCRIBE: &str = "channel.subscribe";
pub const EVENT_CHANNEL_CHEER: &str = "channel.cheer";
pub const EVENT_CHANNEL_RAID: &str = "channel.raid";
pub const EVENT_STREAM_ONLINE: &str = "stream.online";
pub const EVENT_STREAM_OFFLINE: &str = "stream.offline";
pub const EVENT_CHAT_MESSAGE: &str = "channel.chat.message";
pub const EVENT_SHOUTOUT_RECEIVE: &str = "channel.shoutout.receive";

/// A `(channel id, topic)` pair, the unit the rest of the fleet reasons
/// about desired and active subscriptions in.
pub type ChannelTopic = (String, String);

/// An event notification received from EventSub, already matched back to
/// the channel that produced it.
#[derive(Debug, Clone)]
pub struct EventSubEvent {
    pub channel_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Out-of-band status updates the caller needs in order to keep the
/// active-subscription table in sync and to drive its own reconciliation.
#[derive(Debug, Clone)]
pub enum EventSubStatus {
    SessionEstablished { session_id: String },
    SubscriptionCreated { channel_id: String, topic: String, subscription_id: String },
    SubscriptionFailed { channel_id: String, topic: String, status: u16, message: String },
    SubscriptionDeleted { channel_id: String, topic: String },
    SubscriptionRevoked { channel_id: String, topic: String },
}

/// Commands the caller (the Hub's reconciliation loop) sends to a running
/// client.
#[derive(Debug, Clone)]
pub enum EventSubCommand {
    Subscribe { channel_id: String, topic: String },
    Unsubscribe { channel_id: String, topic: String },
    /// Swap in a freshly refreshed access token after a 401.
    UpdateToken(Token),
}

/// Configuration for connecting to EventSub.
#[derive(Debug, Clone)]
pub struct EventSubConfig {
    pub client_id: String,
}

/// Handle to a running EventSub client task.
pub struct EventSubHandle {
    pub events: mpsc::Receiver<EventSubEvent>,
    pub status: mpsc::Receiver<EventSubStatus>,
    pub commands: mpsc::Sender<EventSubCommand>,
    pub shutdown: mpsc::Sender<()>,
}

/// EventSub WebSocket client with auto-reconnect and subscription
/// replay-on-reconnect.
pub struct EventSubClient;

impl EventSubClient {
    /// Start the EventSub loop for one upstream session. Returns a handle
    /// the caller uses to receive events/status and send commands.
    pub fn connect(config: EventSubConfig, token: Token) -> EventSubHandle {
        let (event_tx, event_rx) = mpsc::channel::<EventSubEvent>(256);
        let (status_tx, status_rx) = mpsc::channel::<EventSubStatus>(64);
        let (command_tx, command_rx) = mpsc::channel::<EventSubCommand>(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(Self::run_loop(
            config,
            token,
            event_tx,
            status_tx,
            command_rx,
            shutdown_rx,
        ));

        EventSubHandle {
            events: event_rx,
            status: status_rx,
            commands: command_tx,
            shutdown: shutdown_tx,
        }
    }

    async fn run_loop(
        config: EventSubConfig,
        mut token: Token,
        event_tx: mpsc::Sender<EventSubEvent>,
        status_tx: mpsc::Sender<EventSubStatus>,
        mut command_rx: mpsc::Receiver<EventSubCommand>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let api = TwitchApiClient::new(config.client_id.clone());
        let mut tracker: HashMap<ChannelTopic, String> = HashMap::new();
        let mut failures: u32 = 0;
        let mut last_failure_at: Option<Instant> = None;
        let mut ws_url = EVENTSUB_URL.to_string();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                tracing::info!("EventSub shutdown requested");
                return;
            }
            if let Some(last_failure) = last_failure_at {
                if last_failure.elapsed() >= FAILURE_RESET_WINDOW && failures > 0 {
                    tracing::info!(failures, "EventSub failures reset after stable interval");
                    failures = 0;
                    last_failure_at = None;
                }
            }

            let outcome = Self::connect_once(
                &api,
                &mut token,
                &ws_url,
                &mut tracker,
                &event_tx,
                &status_tx,
                &mut command_rx,
                &mut shutdown_rx,
            )
            .await;

            match outcome {
                Ok(Some(next_url)) => {
                    failures = 0;
                    ws_url = next_url;
                    tracing::info!(ws_url = %ws_url, "EventSub reconnect URL accepted");
                }
                Ok(None) => {
                    tracing::info!("EventSub connection closed cleanly");
                    return;
                }
                Err(e) => {
                    failures += 1;
                    last_failure_at = Some(Instant::now());
                    if ws_url != EVENTSUB_URL {
                        tracing::warn!("EventSub reconnect URL failed, falling back to default URL");
                        ws_url = EVENTSUB_URL.to_string();
                    }
                    let backoff = Self::backoff_duration(failures);
                    tracing::warn!(
                        error = %e, attempt = failures,
                        backoff_secs = backoff.as_secs(),
                        "EventSub connection failed, will reconnect"
                    );
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!("EventSub shutdown requested during reconnect backoff");
                            return;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    fn backoff_duration(failures: u32) -> Duration {
        let d = BASE_BACKOFF * 2u32.saturating_pow(failures.saturating_sub(1));
        d.min(MAX_BACKOFF)
    }

    pub(crate) fn event_version(event_type: &str) -> &'static str {
        match event_type {
            EVENT_CHANNEL_FOLLOW => "2",
            _ => "1",
        }
    }

    pub(crate) fn build_condition(event_type: &str, channel_id: &str) -> serde_json::Value {
        match event_type {
            EVENT_CHANNEL_FOLLOW => serde_json::json!({
                "broadcaster_user_id": channel_id,
                "moderator_user_id": channel_id,
            }),
            EVENT_CHAT_MESSAGE => serde_json::json!({
                "broadcaster_user_id": channel_id,
                "user_id": channel_id,
            }),
            EVENT_CHANNEL_RAID => serde_json::json!({
                "to_broadcaster_user_id": channel_id,
            }),
            EVENT_SHOUTOUT_RECEIVE => serde_json::json!({
                "broadcaster_user_id": channel_id,
                "moderator_user_id": channel_id,
            }),
            _ => serde_json::json!({
                "broadcaster_user_id": channel_id,
            }),
        }
    }
}
