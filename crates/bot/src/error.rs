#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("twitch error: {0}")]
    Twitch(#[from] twitch_client::TwitchError),
    #[error("ipc error: {0}")]
    Ipc(#[from] fleet_ipc::IpcError),
    #[error("token store error: {0}")]
    Store(#[from] token_store::StoreError),
    #[error("send timed out")]
    SendTimeout,
    #[error("transport not connected")]
    NotConnected,
    #[error("needs reauthorization")]
    NeedsReauth,
}
