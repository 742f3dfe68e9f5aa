//! Newline-delimited JSON framing shared by both ends of the IPC socket.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::MAX_FRAME_LEN;

/// Read one frame from `reader`, enforcing [`MAX_FRAME_LEN`]. Returns
/// `Ok(None)` on a clean EOF before any bytes of a new frame arrive.
pub async fn read_frame<T, R>(reader: &mut BufReader<R>) -> Result<Option<T>, IpcError>
where
    T: DeserializeOwned,
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| IpcError::Io(e.to_string()))?;

    if bytes_read == 0 {
        return Ok(None);
    }

    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(trimmed.len()));
    }
    if trimmed.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| IpcError::Malformed(e.to_string()))
}

/// Serialize `frame` and write it terminated by `\n`.
pub async fn write_frame<T, W>(writer: &mut W, frame: &T) -> Result<(), IpcError>
where
    T: Serialize,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut text = serde_json::to_string(frame).map_err(|e| IpcError::Malformed(e.to_string()))?;
    if text.len() > MAX_FRAME_LEN {
        return Err(IpcError::FrameTooLarge(text.len()));
    }
    text.push('\n');
    writer.write_all(text.as_bytes()).await.map_err(|e| IpcError::Io(e.to_string()))?;
    writer.flush().await.map_err(|e| IpcError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BotFrame, HubFrame};
    use std::io::Cursor;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let mut buf = Vec::new();
        let frame = BotFrame::Ping;
        write_frame(&mut buf, &frame).await.unwrap();

        let mut reader = BufReader::new(Cursor::new(buf));
        let read_back: BotFrame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(read_back, frame);
    }

    #[tokio::test]
    async fn empty_stream_yields_none() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let read_back: Option<BotFrame> = read_frame(&mut reader).await.unwrap();
        assert!(read_back.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let big_channel_id = "x".repeat(MAX_FRAME_LEN);
        let mut buf = Vec::new();
        let frame = HubFrame::Event {
            channel_id: big_channel_id,
            topic: "stream.online".into(),
            data: serde_json::json!({}),
        };
        let write_result = write_frame(&mut buf, &frame).await;
        assert!(matches!(write_result, Err(IpcError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn malformed_json_is_a_protocol_error() {
        let mut reader = BufReader::new(Cursor::new(b"not json\n".to_vec()));
        let result: Result<Option<BotFrame>, _> = read_frame(&mut reader).await;
        assert!(matches!(result, Err(IpcError::Malformed(_))));
    }
}
