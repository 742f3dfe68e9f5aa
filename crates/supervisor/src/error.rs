#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ipc error: {0}")]
    Ipc(#[from] fleet_ipc::IpcError),
    #[error("hub did not come up within {0} start attempt(s)")]
    HubFailedToStart(u32),
}
