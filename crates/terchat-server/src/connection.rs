//! Per-connection outbound path.
//!
//! Each session owns one writer task that drains a bounded queue into the
//! socket. Everything else (the session itself, deliveries from other
//! sessions, shutdown) talks to the connection through a cloneable
//! [`ConnectionHandle`].

use std::sync::Arc;

use futures::SinkExt;
use terchat_shared::{Record, RecordCodec, WireError};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SessionError;

/// Item on a connection's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    Record(Record),
    /// Flush what is queued, then close the write half.
    Close,
}

/// Why a non-blocking push onto the queue failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    Full,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    outbound: mpsc::Sender<Outbound>,
    kick: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
            kick: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a record, waiting for room. Used for the session's own replies.
    pub async fn send(&self, record: Record) -> Result<(), SessionError> {
        self.outbound
            .send(Outbound::Record(record))
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }

    /// Queue a record without waiting. Used when another session pushes to
    /// this one, so a slow reader never stalls the sender.
    pub fn try_send(&self, record: Record) -> Result<(), PushError> {
        self.outbound
            .try_send(Outbound::Record(record))
            .map_err(|e| match e {
                TrySendError::Full(_) => PushError::Full,
                TrySendError::Closed(_) => PushError::Closed,
            })
    }

    /// Ask the owning session to end. Safe to call more than once and on a
    /// connection that is already gone.
    pub fn close(&self) {
        self.kick.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub(crate) async fn closed(&self) {
        self.kick.notified().await;
    }

    /// Tell the writer task to finish after the queued records.
    pub(crate) async fn finish(&self) {
        let _ = self.outbound.send(Outbound::Close).await;
    }
}

/// Drain `rx` into `sink` until the queue closes or [`Outbound::Close`].
///
/// A record whose body exceeds the codec limit is dropped with a warning;
/// any I/O failure ends the task.
pub async fn write_loop<W>(
    mut sink: FramedWrite<W, RecordCodec>,
    mut rx: mpsc::Receiver<Outbound>,
    conn_id: Uuid,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Record(record) => match sink.send(record).await {
                Ok(()) => {}
                Err(e @ WireError::FieldTooLarge { .. }) => {
                    warn!(conn = %conn_id, error = %e, "Dropping oversized outbound record");
                }
                Err(e) => {
                    debug!(conn = %conn_id, error = %e, "Write failed, closing connection");
                    return Err(e);
                }
            },
            Outbound::Close => break,
        }
    }

    sink.close().await?;
    debug!(conn = %conn_id, "Writer finished");
    Ok(())
}
