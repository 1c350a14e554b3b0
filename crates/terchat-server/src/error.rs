use terchat_shared::WireError;
use terchat_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The session's own connection can no longer be written to.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Eviction or shutdown arrived while a reply was waiting for queue room.
    #[error("Session interrupted")]
    Interrupted,

    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl SessionError {
    /// Errors on the session's own connection end the session; everything
    /// else is reported to the client and the session carries on.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::ConnectionClosed | SessionError::Interrupted => true,
            SessionError::Wire(e) => !e.is_recoverable(),
            SessionError::Store(_) | SessionError::TaskJoin(_) => false,
        }
    }
}
