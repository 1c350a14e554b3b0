//! # terchat-shared
//!
//! Types, constants and the wire record shared by the store and the server.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::WireError;
pub use protocol::{Record, RecordCodec};
pub use types::{RecordKind, UserId};
