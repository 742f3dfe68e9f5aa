//! Wire protocol for the Hub's local IPC socket: UTF-8 JSON objects, one
//! per line, each under [`MAX_FRAME_LEN`] bytes.

use serde::{Deserialize, Serialize};

/// Frames exceeding this many bytes (before the trailing newline) are a
/// protocol error; the offending session is closed, others are unaffected.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Frames sent by a bot to the Hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotFrame {
    /// Must be the first frame on a new connection.
    Hello {
        channel_id: String,
        channel_name: String,
        #[serde(default)]
        topics: Vec<String>,
    },
    Subscribe { channel_id: String, topic: String },
    Unsubscribe { channel_id: String, topic: String },
    Ping,
}

/// Frames sent by the Hub to a bot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    Ack { ref_type: String },
    Error { code: String, message: String },
    Event { channel_id: String, topic: String, data: serde_json::Value },
    Pong,
}

impl BotFrame {
    pub fn ref_type(&self) -> &'static str {
        match self {
            BotFrame::Hello { .. } => "hello",
            BotFrame::Subscribe { .. } => "subscribe",
            BotFrame::Unsubscribe { .. } => "unsubscribe",
            BotFrame::Ping => "ping",
        }
    }
}

impl HubFrame {
    pub fn ack(ref_type: impl Into<String>) -> Self {
        HubFrame::Ack { ref_type: ref_type.into() }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        HubFrame::Error { code: code.into(), message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_through_json() {
        let frame = BotFrame::Hello {
            channel_id: "10".into(),
            channel_name: "streamer".into(),
            topics: vec!["channel.follow".into()],
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert_eq!(serde_json::from_str::<BotFrame>(&text).unwrap(), frame);
    }

    #[test]
    fn hub_frame_tag_is_snake_case_type_field() {
        let frame = HubFrame::ack("subscribe");
        let value: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "ack");
        assert_eq!(value["ref_type"], "subscribe");
    }

    #[test]
    fn event_frame_carries_opaque_json_payload() {
        let frame = HubFrame::Event {
            channel_id: "10".into(),
            topic: "stream.online".into(),
            data: serde_json::json!({"started_at": "2026-01-01T00:00:00Z"}),
        };
        let text = serde_json::to_string(&frame).unwrap();
        let back: HubFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn unknown_frame_type_fails_to_parse() {
        let result: Result<BotFrame, _> = serde_json::from_str(r#"{"type":"resync"}"#);
        assert!(result.is_err());
    }
}
