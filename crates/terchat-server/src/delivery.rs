//! Best-effort push of a freshly sent message to its recipient.
//!
//! Delivery never blocks the sending session and never fails the send: the
//! message is already persisted by the time this runs, so an offline or
//! saturated recipient simply finds it later through `CheckUnread`.

use terchat_shared::{Record, UserId};
use tracing::{debug, warn};

use crate::connection::PushError;
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    PeerUnreachable,
}

/// Queue `record` on `recipient`'s connection if it is online.
///
/// A full or closed queue counts as unreachable; the record is dropped.
pub async fn deliver(registry: &Registry, recipient: UserId, record: Record) -> DeliveryOutcome {
    let Some(handle) = registry.lookup(recipient).await else {
        debug!(to = %recipient, "Recipient offline, message left unread");
        return DeliveryOutcome::PeerUnreachable;
    };

    match handle.try_send(record) {
        Ok(()) => {
            debug!(to = %recipient, conn = %handle.id(), "Message pushed");
            DeliveryOutcome::Delivered
        }
        Err(PushError::Full) => {
            warn!(to = %recipient, conn = %handle.id(), "Recipient queue full, push dropped");
            DeliveryOutcome::PeerUnreachable
        }
        Err(PushError::Closed) => {
            debug!(to = %recipient, conn = %handle.id(), "Recipient connection closing");
            DeliveryOutcome::PeerUnreachable
        }
    }
}
