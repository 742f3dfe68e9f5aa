//! `Transport = IrcLike | EventSubChat` behind one small interface, so the
//! health check and outbound sender don't need to know which transport a
//! given bot is running.

pub mod eventsub_chat;
pub mod irc;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chat::ChatRecord;
use crate::error::BotError;
use eventsub_chat::EventSubChatTransport;
use irc::IrcTransport;
use twitch_client::Token;

pub enum Transport {
    IrcLike(IrcTransport),
    EventSubChat(EventSubChatTransport),
}

impl Transport {
    /// `on_chat` is invoked for every inbound chat record the transport
    /// parses directly (the IRC transport only — EventSub Chat messages
    /// arrive through the Hub IPC client instead).
    pub async fn connect(&mut self, on_chat: Arc<dyn Fn(ChatRecord) + Send + Sync>) -> Result<(), BotError> {
        match self {
            Transport::IrcLike(t) => t.connect(on_chat).await,
            Transport::EventSubChat(t) => t.connect().await,
        }
    }

    pub async fn disconnect(&mut self) {
        match self {
            Transport::IrcLike(t) => t.disconnect().await,
            Transport::EventSubChat(t) => t.disconnect().await,
        }
    }

    pub async fn send(&self, channel: &str, text: &str, deadline: Duration) -> Result<(), BotError> {
        match self {
            Transport::IrcLike(t) => t.send(channel, text, deadline).await,
            Transport::EventSubChat(t) => t.send(channel, text, deadline).await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Transport::IrcLike(t) => t.is_connected(),
            Transport::EventSubChat(t) => t.is_connected(),
        }
    }

    pub fn is_in_room(&self, channel: &str) -> bool {
        match self {
            Transport::IrcLike(t) => t.is_in_room(channel),
            Transport::EventSubChat(t) => t.is_in_room(channel),
        }
    }

    pub async fn last_keepalive_at(&self) -> Option<Instant> {
        match self {
            Transport::IrcLike(t) => t.last_keepalive_at().await,
            Transport::EventSubChat(t) => t.last_keepalive_at().await,
        }
    }

    /// Threshold past which the keepalive check should consider the
    /// connection stale: IRC pings roughly every 5 minutes, EventSub
    /// Chat roughly every 10 seconds.
    pub fn keepalive_threshold(&self) -> Duration {
        match self {
            Transport::IrcLike(_) => Duration::from_secs(360),
            Transport::EventSubChat(_) => Duration::from_secs(30),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        match self {
            Transport::IrcLike(t) => t.is_unauthorized(),
            Transport::EventSubChat(t) => t.is_unauthorized(),
        }
    }

    pub fn clear_unauthorized(&self) {
        match self {
            Transport::IrcLike(t) => t.clear_unauthorized(),
            Transport::EventSubChat(t) => t.clear_unauthorized(),
        }
    }

    pub fn update_token(&mut self, token: Token) {
        match self {
            Transport::IrcLike(t) => t.update_token(token.access_token),
            Transport::EventSubChat(t) => t.update_token(token),
        }
    }
}
