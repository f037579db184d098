#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed mid-message")]
    ClosedMidMessage,
    #[error("payload length {0} exceeds the 10 MiB limit")]
    PayloadTooLarge(u32),
    #[error("exhausted {0} connection attempts to {1}:{2}")]
    ConnectRetriesExhausted(u32, String, u16),
}
