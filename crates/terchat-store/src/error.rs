use std::path::PathBuf;

use terchat_shared::UserId;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Generic I/O error while reading or writing a store file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file for an identity does not exist (identity never
    /// registered, or its directory was removed).
    #[error("Store file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Registration attempted for an identity that already has a profile.
    #[error("User {0} is already registered")]
    AlreadyRegistered(UserId),

    /// A field would break the line-oriented file format, or a record body
    /// does not have the expected shape.
    #[error("Invalid field: {0}")]
    InvalidField(String),

    /// Atomic replace of a rewritten file failed.
    #[error("Failed to persist rewritten file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
