use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("timeout")]
    Timeout,
    #[error("short read at {start}: requested {requested} words, received {received}")]
    ShortRead {
        start: u16,
        requested: u16,
        received: usize,
    },
    #[error("device rejected request (exception code {0:#04x})")]
    Rejected(u8),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    /// True when the link itself is gone, as opposed to the device answering
    /// with an error or a malformed reply.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected
                | TransportError::ConnectionLost(_)
                | TransportError::Timeout
                | TransportError::Io(_)
        )
    }
}
