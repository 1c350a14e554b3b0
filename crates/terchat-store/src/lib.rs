//! # terchat-store
//!
//! Persistent storage for the TerChat server, kept as plain text files under
//! a data directory.
//!
//! The crate exposes a synchronous [`Store`] handle with typed helpers for
//! the user directory, per-user contact lists and per-user message logs.
//! Operations on one identity's files are serialised through a per-identity
//! lock, and whole-file rewrites are atomic (temp file + rename).

pub mod contacts;
pub mod messages;
pub mod models;
pub mod store;
pub mod users;

mod error;
mod files;
mod locks;

pub use contacts::AddOutcome;
pub use error::{Result, StoreError};
pub use models::*;
pub use store::Store;
