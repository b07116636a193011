use thiserror::Error;

/// Errors produced by links and the frame codec.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
    /// Underlying socket failure.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A field failed to decode.
    #[error("malformed message")]
    Malformed,
    /// The peer speaks a different protocol version.
    #[error("unsupported protocol version {0}")]
    Version(u8),
    /// Unknown message kind byte.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    /// A frame announced a body larger than the configured limit.
    #[error("frame of {0} bytes exceeds limit")]
    Oversize(usize),
}
