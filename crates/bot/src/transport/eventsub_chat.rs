//! EventSub Chat transport: inbound messages arrive over the Hub IPC
//! client (topic `channel.chat.message`), not a websocket this process
//! owns. Outbound sends go through the Helix REST chat endpoint since
//! there is no outbound channel on an EventSub session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use twitch_client::{Token, TwitchError};
use twitch_client::api::TwitchApiClient;

use crate::error::BotError;

pub struct EventSubChatTransport {
    api: TwitchApiClient,
    token: Token,
    broadcaster_id: String,
    sender_id: String,
    channel: String,
    connected: Arc<AtomicBool>,
    last_keepalive_at: Arc<Mutex<Option<Instant>>>,
    unauthorized: Arc<AtomicBool>,
}

impl EventSubChatTransport {
    pub fn new(client_id: String, token: Token, broadcaster_id: String, sender_id: String, channel: String) -> Self {
        Self {
            api: TwitchApiClient::new(client_id),
            token,
            broadcaster_id,
            sender_id,
            channel,
            connected: Arc::new(AtomicBool::new(false)),
            last_keepalive_at: Arc::new(Mutex::new(None)),
            unauthorized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// There is no connection of our own to open; readiness tracks the
    /// Hub IPC client instead, signaled through [`Self::set_connected`].
    pub async fn connect(&mut self) -> Result<(), BotError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Called whenever the Hub IPC client receives any frame, standing in
    /// for EventSub's own ~10s keepalive since this process never sees it
    /// directly.
    pub async fn notify_keepalive(&self) {
        *self.last_keepalive_at.lock().await = Some(Instant::now());
    }

    pub fn update_token(&mut self, token: Token) {
        self.token = token;
    }

    pub fn is_unauthorized(&self) -> bool {
        self.unauthorized.load(Ordering::SeqCst)
    }

    pub fn clear_unauthorized(&self) {
        self.unauthorized.store(false, Ordering::SeqCst);
    }

    pub async fn send(&self, _channel: &str, text: &str, deadline: Duration) -> Result<(), BotError> {
        let result = tokio::time::timeout(deadline, self.api.send_chat_message(&self.token, &self.broadcaster_id, &self.sender_id, text))
            .await
            .map_err(|_| BotError::SendTimeout)?;
        if let Err(TwitchError::ApiError { status: 401, .. }) = &result {
            self.unauthorized.store(true, Ordering::SeqCst);
        }
        result?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_in_room(&self, channel: &str) -> bool {
        channel == self.channel
    }

    pub async fn last_keepalive_at(&self) -> Option<Instant> {
        *self.last_keepalive_at.lock().await
    }
}
