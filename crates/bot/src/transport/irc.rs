//! IRC-style chat transport over Twitch's IRC-over-WebSocket endpoint.
//!
//! Unlike a one-shot send (connect, authenticate, join, send, disconnect),
//! this keeps the socket open: a reader task parses every inbound line,
//! and `send` reuses the live connection instead of opening a new one per
//! message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::chat::{ChatRecord, Roles, TransportKind};
use crate::error::BotError;

const TWITCH_IRC_WS_ENDPOINT: &str = "wss://irc-ws.chat.twitch.tv:443";

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct IrcTransport {
    access_token: String,
    nick: String,
    channel: String,
    ws: Option<Arc<Mutex<WsStream>>>,
    in_room: Arc<AtomicBool>,
    last_keepalive_at: Arc<Mutex<Option<Instant>>>,
    connected: Arc<AtomicBool>,
    unauthorized: Arc<AtomicBool>,
}

impl IrcTransport {
    pub fn new(access_token: String, nick: String, channel: String) -> Self {
        Self {
            access_token,
            nick,
            channel,
            ws: None,
            in_room: Arc::new(AtomicBool::new(false)),
            last_keepalive_at: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            unauthorized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Swap in a freshly refreshed access token. Takes effect on the next
    /// `connect` — an already-open IRC session authenticated with the
    /// old token is unaffected until reconnected.
    pub fn update_token(&mut self, access_token: String) {
        self.access_token = access_token;
    }

    pub fn is_unauthorized(&self) -> bool {
        self.unauthorized.load(Ordering::SeqCst)
    }

    pub fn clear_unauthorized(&self) {
        self.unauthorized.store(false, Ordering::SeqCst);
    }

    pub async fn connect(&mut self, on_chat: Arc<dyn Fn(ChatRecord) + Send + Sync>) -> Result<(), BotError> {
        let (mut ws, _) = connect_async(TWITCH_IRC_WS_ENDPOINT).await?;
        ws.send(WsMessage::Text(format!("PASS oauth:{}", self.access_token).into())).await?;
        ws.send(WsMessage::Text(format!("NICK {}", self.nick).into())).await?;
        ws.send(WsMessage::Text("CAP REQ :twitch.tv/tags twitch.tv/commands".to_string().into())).await?;
        ws.send(WsMessage::Text(format!("JOIN #{}", self.channel).into())).await?;

        self.in_room.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        let ws = Arc::new(Mutex::new(ws));
        self.ws = Some(ws.clone());

        let nick = self.nick.clone();
        let channel = self.channel.clone();
        let in_room = self.in_room.clone();
        let last_keepalive_at = self.last_keepalive_at.clone();
        let connected = self.connected.clone();
        let unauthorized = self.unauthorized.clone();

        tokio::spawn(async move {
            loop {
                let next = { ws.lock().await.next().await };
                let Some(frame) = next else {
                    connected.store(false, Ordering::SeqCst);
                    break;
                };
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(error = %e, "IRC read error");
                        connected.store(false, Ordering::SeqCst);
                        break;
                    }
                };
                match frame {
                    WsMessage::Ping(payload) => {
                        *last_keepalive_at.lock().await = Some(Instant::now());
                        let _ = ws.lock().await.send(WsMessage::Pong(payload)).await;
                    }
                    WsMessage::Text(text) => {
                        for line in text.lines().filter(|l| !l.is_empty()) {
                            if let Some(payload) = line.strip_prefix("PING ") {
                                *last_keepalive_at.lock().await = Some(Instant::now());
                                let _ = ws.lock().await.send(WsMessage::Text(format!("PONG {payload}").into())).await;
                                continue;
                            }
                            if line.contains("Login authentication failed") {
                                unauthorized.store(true, Ordering::SeqCst);
                                connected.store(false, Ordering::SeqCst);
                                continue;
                            }
                            if !in_room.load(Ordering::SeqCst)
                                && (line.contains(&format!(" JOIN #{channel}")) || line.contains(&format!(" 366 {nick} #{channel} :")))
                            {
                                in_room.store(true, Ordering::SeqCst);
                            }
                            if let Some(record) = parse_privmsg(line, &channel) {
                                on_chat(record);
                            }
                        }
                    }
                    WsMessage::Close(_) => {
                        connected.store(false, Ordering::SeqCst);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(ws) = self.ws.take() {
            let _ = ws.lock().await.close(None).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.in_room.store(false, Ordering::SeqCst);
    }

    pub async fn send(&self, channel: &str, text: &str, deadline: Duration) -> Result<(), BotError> {
        let Some(ws) = &self.ws else { return Err(BotError::NotConnected) };
        let privmsg = WsMessage::Text(format!("PRIVMSG #{channel} :{text}").into());
        tokio::time::timeout(deadline, ws.lock().await.send(privmsg)).await.map_err(|_| BotError::SendTimeout)??;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_in_room(&self, channel: &str) -> bool {
        channel == self.channel && self.in_room.load(Ordering::SeqCst)
    }

    pub async fn last_keepalive_at(&self) -> Option<Instant> {
        *self.last_keepalive_at.lock().await
    }
}

/// Parse a raw IRC line into a chat record if it is a `PRIVMSG` to our
/// channel. Tags (if the `twitch.tv/tags` capability was granted) carry
/// `user-id`, `display-name` and `badges`.
fn parse_privmsg(line: &str, expected_channel: &str) -> Option<ChatRecord> {
    let (tags, rest) = if let Some(stripped) = line.strip_prefix('@') {
        let mut parts = stripped.splitn(2, ' ');
        (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
    } else {
        ("", line)
    };

    let mut parts = rest.splitn(2, " PRIVMSG #");
    let prefix = parts.next()?;
    let remainder = parts.next()?;
    let (channel, text) = remainder.split_once(" :")?;
    if channel != expected_channel {
        return None;
    }

    let sender_login = prefix.trim_start_matches(':').split('!').next().unwrap_or("").to_string();
    let mut sender_id = String::new();
    let mut roles = Roles::default();
    for tag in tags.split(';').filter(|t| !t.is_empty()) {
        if let Some((key, value)) = tag.split_once('=') {
            match key {
                "user-id" => sender_id = value.to_string(),
                "badges" => {
                    for badge in value.split(',') {
                        let name = badge.split('/').next().unwrap_or("");
                        match name {
                            "broadcaster" => roles.broadcaster = true,
                            "moderator" => roles.moderator = true,
                            "vip" => roles.vip = true,
                            "subscriber" | "founder" => roles.subscriber = true,
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Some(ChatRecord {
        channel: channel.to_string(),
        sender_id,
        sender_login,
        text: text.to_string(),
        roles,
        transport: TransportKind::IrcLike,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_privmsg_with_badges() {
        let line = "@badge-info=;badges=moderator/1,subscriber/12;user-id=12345;display-name=Foo :foo!foo@foo.tmi.twitch.tv PRIVMSG #barchannel :hello there";
        let record = parse_privmsg(line, "barchannel").expect("should parse");
        assert_eq!(record.sender_id, "12345");
        assert_eq!(record.sender_login, "foo");
        assert_eq!(record.text, "hello there");
        assert!(record.roles.moderator);
        assert!(record.roles.subscriber);
        assert!(!record.roles.broadcaster);
    }

    #[test]
    fn ignores_privmsg_for_a_different_channel() {
        let line = "@user-id=1 :foo!foo@foo.tmi.twitch.tv PRIVMSG #otherchannel :hi";
        assert!(parse_privmsg(line, "barchannel").is_none());
    }

    #[test]
    fn ignores_lines_without_tags() {
        let line = ":foo!foo@foo.tmi.twitch.tv PRIVMSG #barchannel :no tags here";
        let record = parse_privmsg(line, "barchannel").expect("should still parse without tags");
        assert_eq!(record.sender_id, "");
        assert_eq!(record.text, "no tags here");
    }
}
