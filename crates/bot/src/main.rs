//! The Bot chat runtime: maintains one channel's chat transport, feeds
//! inbound chat and upstream events onto an internal bus, and relays
//! outbound replies with rate limiting and a bounded send timeout.

mod chat;
mod dedup;
mod error;
mod health;
mod hub_client;
mod outbound;
mod state;
mod token_refresh;
mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use fleet_config::FleetConfig;
use fleet_ipc::Bus;
use token_store::{Database, InstanceStatus, TokenKind};
use twitch_client::api::TwitchApiClient;
use twitch_client::auth::TokenRefresher;

use chat::ChatRecord;
use hub_client::HelloInfo;
use state::{BotBus, BusMessage, Topic};
use transport::Transport;
use transport::eventsub_chat::EventSubChatTransport;
use transport::irc::IrcTransport;

const DESIRED_TOPICS: &[&str] = &["stream.online", "stream.offline", "channel.follow", "channel.raid"];

/// Matches the id the Supervisor registers when it spawns this bot.
fn instance_id(channel: &str) -> String {
    format!("bot-{channel}")
}

async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let channel = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KISSBOT_CHANNEL").ok())
        .ok_or_else(|| anyhow::anyhow!("usage: bot <channel-login> (or set KISSBOT_CHANNEL)"))?;

    let config_path = std::env::var("KISSBOT_CONFIG").unwrap_or_else(|_| "fleet.toml".to_string());
    let config = FleetConfig::load(&config_path)?;

    let db = Database::open(&config.store.database_path, &config.store.key_path)?;

    if config.twitch.bot_user_id.is_empty() {
        anyhow::bail!("twitch.bot_user_id must be set");
    }
    let record = db
        .get_tokens(&config.twitch.bot_user_id, TokenKind::Bot)?
        .ok_or_else(|| anyhow::anyhow!("no stored token for bot user {}", config.twitch.bot_user_id))?;
    if record.needs_reauth || record.revoked {
        anyhow::bail!("bot token needs reauthorization, refusing to start");
    }

    let api = TwitchApiClient::new(config.twitch.client_id.clone());
    let token = token_refresh::as_token(&record);
    let channel_user = match db.get_user_by_login(&channel)? {
        Some(u) => u,
        None => {
            let fetched = api.get_user_by_login(&token, &channel).await?;
            let user = token_store::User { user_id: fetched.id, login: fetched.login, display_name: fetched.display_name, is_bot: false };
            db.put_user(&user)?;
            user
        }
    };
    let bot_identity = api.get_current_user(&token).await.unwrap_or(twitch_client::api::TwitchUser {
        id: config.twitch.bot_user_id.clone(),
        login: String::new(),
        display_name: String::new(),
        user_type: String::new(),
        broadcaster_type: String::new(),
        description: String::new(),
        profile_image_url: String::new(),
        created_at: String::new(),
    });

    let use_eventsub_chat = config.feature_enabled("eventsub_chat_transport");
    let transport = if use_eventsub_chat {
        Transport::EventSubChat(EventSubChatTransport::new(
            config.twitch.client_id.clone(),
            token.clone(),
            channel_user.user_id.clone(),
            config.twitch.bot_user_id.clone(),
            channel.clone(),
        ))
    } else {
        Transport::IrcLike(IrcTransport::new(token.access_token.clone(), bot_identity.login.clone(), channel.clone()))
    };
    let transport = Arc::new(Mutex::new(transport));

    let bus: Arc<BotBus> = Arc::new(Bus::new());
    let dedup = Arc::new(Mutex::new(dedup::DedupCache::new()));

    let shutdown = CancellationToken::new();

    let on_chat_bus = bus.clone();
    let on_chat_dedup = dedup.clone();
    let on_chat: Arc<dyn Fn(ChatRecord) + Send + Sync> = Arc::new(move |record: ChatRecord| {
        let bus = on_chat_bus.clone();
        let dedup = on_chat_dedup.clone();
        tokio::spawn(async move {
            let is_dup = dedup.lock().await.is_duplicate(&record.sender_id, &record.text);
            if is_dup {
                tracing::debug!(sender = %record.sender_id, "duplicate chat message skipped");
                return;
            }
            bus.publish(&Topic::ChatInbound, BusMessage::Chat(record)).await;
        });
    });

    {
        let mut guard = transport.lock().await;
        guard.connect(on_chat.clone()).await?;
    }

    let hub_connected = Arc::new(AtomicBool::new(false));
    let hub_transport = transport.clone();
    let hub_bus = bus.clone();
    let hub_dedup = dedup.clone();
    let channel_for_events = channel.clone();
    let hub_connected_for_callback = hub_connected.clone();

    let on_event: Arc<dyn Fn(String, serde_json::Value) + Send + Sync> = Arc::new(move |topic, data| {
        let bus = hub_bus.clone();
        let dedup = hub_dedup.clone();
        let transport = hub_transport.clone();
        let channel = channel_for_events.clone();
        tokio::spawn(async move {
            if let Transport::EventSubChat(t) = &*transport.lock().await {
                t.notify_keepalive().await;
            }
            if topic == "channel.chat.message" {
                if let Some(record) = parse_eventsub_chat_message(&channel, &data) {
                    let is_dup = dedup.lock().await.is_duplicate(&record.sender_id, &record.text);
                    if !is_dup {
                        bus.publish(&Topic::ChatInbound, BusMessage::Chat(record)).await;
                    }
                    return;
                }
            }
            bus.publish(&Topic::SystemEvent, BusMessage::Event { topic, data }).await;
        });
    });

    let on_connection_change: Arc<dyn Fn(bool) + Send + Sync> = {
        let hub_connected = hub_connected_for_callback;
        let transport = transport.clone();
        Arc::new(move |connected| {
            hub_connected.store(connected, Ordering::SeqCst);
            let transport = transport.clone();
            tokio::spawn(async move {
                if let Transport::EventSubChat(t) = &*transport.lock().await {
                    t.set_connected(connected);
                }
            });
        })
    };

    let socket_path = config.hub.socket_path.clone();
    let hello = HelloInfo {
        channel_id: channel_user.user_id.clone(),
        channel_name: channel.clone(),
        topics: DESIRED_TOPICS.iter().map(|s| s.to_string()).collect(),
    };
    let hub_client_shutdown = shutdown.clone();
    let hub_client_task = tokio::spawn(hub_client::run(socket_path, hello, on_event, on_connection_change, hub_client_shutdown));

    let health_transport = transport.clone();
    let health_channel = channel.clone();
    let health_interval = config.timeouts.keepalive_interval();
    let health_shutdown = shutdown.clone();
    let health_task = tokio::spawn(health::run(health_transport, health_channel, health_interval, health_shutdown, on_chat.clone()));

    let outbound_bus = bus.clone();
    let outbound_transport = transport.clone();
    let send_timeout = config.timeouts.irc_send();
    let outbound_shutdown = shutdown.clone();
    let outbound_task = tokio::spawn(outbound::run(outbound_bus, outbound_transport, send_timeout, outbound_shutdown));

    let refresher = TokenRefresher::new(config.twitch.client_id.clone(), config.twitch.client_secret.clone());

    let heartbeat_db = db.clone();
    let heartbeat_instance_id = instance_id(&channel);
    let heartbeat_interval = config.timeouts.health_interval();
    let heartbeat_shutdown = shutdown.clone();
    let heartbeat_task = tokio::spawn(async move {
        loop {
            if let Err(e) = heartbeat_db.heartbeat(&heartbeat_instance_id, InstanceStatus::Running) {
                tracing::warn!(error = %e, "failed to record instance heartbeat");
            }
            if sleep_or_cancel(&heartbeat_shutdown, heartbeat_interval).await {
                return;
            }
        }
    });

    let auth_watch_db = db;
    let auth_watch_transport = transport.clone();
    let auth_watch_bot_user_id = config.twitch.bot_user_id.clone();
    let auth_watch_on_chat = on_chat.clone();
    let auth_watch_shutdown = shutdown.clone();
    let auth_watch_task = tokio::spawn(async move {
        loop {
            if auth_watch_shutdown.is_cancelled() {
                return;
            }
            let unauthorized = auth_watch_transport.lock().await.is_unauthorized();
            if unauthorized {
                auth_watch_transport.lock().await.clear_unauthorized();
                tracing::warn!("transport reported unauthorized, requesting token refresh");
                match token_refresh::request_refresh(&auth_watch_db, &refresher, &auth_watch_bot_user_id, TokenKind::Bot).await {
                    Ok(token_refresh::RefreshOutcome::Refreshed(new_token)) => {
                        let mut guard = auth_watch_transport.lock().await;
                        guard.update_token(new_token);
                        if matches!(&*guard, Transport::IrcLike(_)) {
                            guard.disconnect().await;
                            let _ = guard.connect(auth_watch_on_chat.clone()).await;
                        }
                    }
                    Ok(token_refresh::RefreshOutcome::NeedsReauth) => {
                        tracing::error!("bot token needs reauthorization, shutting down");
                        auth_watch_shutdown.cancel();
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "token refresh attempt failed, will retry on next unauthorized signal");
                    }
                }
            }
            if tokio::time::timeout(Duration::from_secs(5), auth_watch_shutdown.cancelled()).await.is_ok() {
                return;
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(channel, "received shutdown signal");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
    {
        let mut guard = transport.lock().await;
        guard.disconnect().await;
    }

    let _ = tokio::join!(hub_client_task, health_task, outbound_task, auth_watch_task, heartbeat_task);
    tracing::info!(channel, "bot stopped");
    Ok(())
}

fn parse_eventsub_chat_message(channel: &str, data: &serde_json::Value) -> Option<ChatRecord> {
    let sender_id = data.get("chatter_user_id")?.as_str()?.to_string();
    let sender_login = data.get("chatter_user_login").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let text = data.get("message").and_then(|m| m.get("text")).and_then(|t| t.as_str())?.to_string();

    let mut roles = chat::Roles::default();
    if let Some(badges) = data.get("badges").and_then(|b| b.as_array()) {
        for badge in badges {
            match badge.get("set_id").and_then(|v| v.as_str()) {
                Some("broadcaster") => roles.broadcaster = true,
                Some("moderator") => roles.moderator = true,
                Some("vip") => roles.vip = true,
                Some("subscriber") | Some("founder") => roles.subscriber = true,
                _ => {}
            }
        }
    }

    Some(ChatRecord { channel: channel.to_string(), sender_id, sender_login, text, roles, transport: chat::TransportKind::EventSubChat })
}
