use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    /// Declared frame length is beyond what any valid record can be. The
    /// stream can no longer be trusted after this.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Body too large: {size} bytes (max {max})")]
    FieldTooLarge { size: usize, max: usize },

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Unknown record kind: {0}")]
    UnknownKind(i32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// Whether the stream is still aligned on a frame boundary after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WireError::Malformed(_) | WireError::UnknownKind(_))
    }
}
