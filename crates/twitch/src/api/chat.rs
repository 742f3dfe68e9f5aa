use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Serialize)]
struct SendChatMessageRequest<'a> {
    broadcaster_id: &'a str,
    sender_id: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendChatMessageEntry {
    #[serde(default)]
    is_sent: bool,
    #[serde(default)]
    drop_reason: Option<DropReason>,
}

#[derive(Debug, Deserialize)]
struct DropReason {
    #[serde(default)]
    message: String,
}

impl TwitchApiClient {
    /// Send a chat message through POST /helix/chat/messages, the REST
    /// fallback for bots whose outbound path isn't the IRC-style
    /// transport (e.g. the EventSub Chat transport, which has no
    /// outbound websocket of its own).
    pub async fn send_chat_message(
        &self,
        token: &Token,
        broadcaster_id: &str,
        sender_id: &str,
        message: &str,
    ) -> Result<(), TwitchError> {
        let url = format!("{HELIX_BASE}/chat/messages");
        let req = SendChatMessageRequest { broadcaster_id, sender_id, message };
        let body = self.authenticated_post(&url, token, &req).await?;
        let resp: HelixResponse<SendChatMessageEntry> = serde_json::from_str(&body)?;
        match resp.data.into_iter().next() {
            Some(entry) if entry.is_sent => Ok(()),
            Some(entry) => Err(TwitchError::ApiError {
                status: 200,
                message: entry.drop_reason.map(|d| d.message).unwrap_or_else(|| "message dropped".into()),
            }),
            None => Err(TwitchError::ApiError { status: 502, message: "chat message response carried no data".into() }),
        }
    }
}
