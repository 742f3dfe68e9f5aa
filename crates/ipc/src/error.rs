/// Errors from the IPC framing and session layer.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}
