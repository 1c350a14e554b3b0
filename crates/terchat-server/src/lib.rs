//! # terchat-server
//!
//! Multi-user messaging server for TerChat.
//!
//! - **Listener** accepts TCP clients up to a configured session cap
//! - **Sessions** run the login / registration state machine and serve
//!   contact and message requests against the text-file store
//! - **Registry** tracks which identity is online on which connection
//! - **Delivery** pushes new messages to online recipients without blocking
//!   the sender

pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;

pub use config::ServerConfig;
pub use error::SessionError;
pub use registry::Registry;
pub use server::Server;
pub use state::AppState;
