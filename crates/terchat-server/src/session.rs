//! One client connection, from first frame to close.
//!
//! A session reads frames in order and fully handles each request before
//! reading the next. Replies and pushed messages go out through the
//! connection's writer task, so the read loop never writes to the socket.
//!
//! ```text
//! Unauthenticated --login(registered)--------------> Authenticated
//! Unauthenticated --login(unknown)--> AwaitingRegistration --register--> Authenticated
//! any --disconnect / EOF / eviction / idle / shutdown--> Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use chrono::Utc;
use futures::StreamExt;
use terchat_shared::constants::replies;
use terchat_shared::{Record, RecordCodec, RecordKind, UserId, WireError};
use terchat_store::{AddOutcome, Contact, Store, StoreError, UserProfile};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::connection::{write_loop, ConnectionHandle};
use crate::delivery;
use crate::error::SessionError;
use crate::state::AppState;

/// How long a closing session waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// Login named an unknown identity; the next registration uses it.
    AwaitingRegistration(UserId),
    Authenticated(UserId),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientDisconnect,
    PeerClosed,
    ReadFailed,
    WriteFailed,
    Evicted,
    IdleTimeout,
    Shutdown,
    /// Evicted or shut down while waiting to queue a reply.
    Interrupted,
}

enum Flow {
    Continue,
    Close(CloseReason),
}

enum Inbound {
    Frame(BytesMut),
    Failed(WireError),
    Eof,
    IdleTimeout,
}

/// Serve one client over `stream` until it disconnects, is evicted, idles
/// out, or `shutdown` flips.
pub async fn run_session<S>(
    stream: S,
    app: AppState,
    shutdown: watch::Receiver<bool>,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let codec = RecordCodec::new(app.config.max_body);

    let (tx, rx) = mpsc::channel(app.config.outbound_queue);
    let conn = ConnectionHandle::new(tx);
    let mut writer = tokio::spawn(write_loop(FramedWrite::new(write_half, codec), rx, conn.id()));
    debug!(conn = %conn.id(), "Session opened");

    let mut session = Session::new(conn.clone(), app, shutdown);
    let reason = session.read_loop(FramedRead::new(read_half, codec)).await;
    session.close(reason).await;

    let drained = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, async {
        conn.finish().await;
        (&mut writer).await
    })
    .await;

    match drained {
        Ok(result) => Ok(result??),
        Err(_) => {
            warn!(conn = %conn.id(), "Writer did not drain in time, aborting");
            writer.abort();
            Ok(())
        }
    }
}

struct Session {
    conn: ConnectionHandle,
    app: AppState,
    shutdown: watch::Receiver<bool>,
    state: SessionState,
}

impl Session {
    fn new(conn: ConnectionHandle, app: AppState, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            conn,
            app,
            shutdown,
            state: SessionState::Unauthenticated,
        }
    }

    fn identity(&self) -> Option<UserId> {
        match self.state {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    async fn read_loop<R>(&mut self, mut frames: FramedRead<R, RecordCodec>) -> CloseReason
    where
        R: AsyncRead + Unpin,
    {
        if *self.shutdown.borrow() {
            return CloseReason::Shutdown;
        }
        let idle = self.app.config.idle_timeout;

        loop {
            let inbound = tokio::select! {
                inbound = next_frame(&mut frames, idle) => inbound,
                _ = self.conn.closed() => return CloseReason::Evicted,
                _ = self.shutdown.changed() => return CloseReason::Shutdown,
            };

            let flow = match inbound {
                Inbound::Frame(frame) => self.handle_frame(&frame).await,
                Inbound::Eof => Flow::Close(CloseReason::PeerClosed),
                Inbound::IdleTimeout => Flow::Close(CloseReason::IdleTimeout),
                Inbound::Failed(e) => {
                    debug!(conn = %self.conn.id(), error = %e, "Read failed");
                    if let WireError::FrameTooLarge { .. } = e {
                        let _ = self.reply(Record::confirmation(e.to_string())).await;
                    }
                    Flow::Close(CloseReason::ReadFailed)
                }
            };

            if let Flow::Close(reason) = flow {
                return reason;
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) -> Flow {
        let record = match Record::decode(frame) {
            Ok(record) => record,
            Err(e) => {
                warn!(conn = %self.conn.id(), error = %e, "Rejecting malformed record");
                return self.reply_or_close(Record::confirmation(e.to_string())).await;
            }
        };

        debug!(
            conn = %self.conn.id(),
            kind = ?record.kind,
            to = %record.to,
            from = %record.from,
            "Request"
        );

        match self.dispatch(record).await {
            Ok(flow) => flow,
            Err(SessionError::Interrupted) => Flow::Close(CloseReason::Interrupted),
            Err(e) if e.is_fatal() => {
                debug!(conn = %self.conn.id(), error = %e, "Connection lost");
                Flow::Close(CloseReason::WriteFailed)
            }
            Err(SessionError::Store(e)) => self.reply_or_close(store_error_reply(&e)).await,
            Err(e) => {
                error!(conn = %self.conn.id(), error = %e, "Request failed");
                self.reply_or_close(Record::confirmation(replies::SERVER_ERROR))
                    .await
            }
        }
    }

    async fn dispatch(&mut self, record: Record) -> Result<Flow, SessionError> {
        match record.kind {
            RecordKind::Disconnect => return Ok(Flow::Close(CloseReason::ClientDisconnect)),
            RecordKind::LoginRequest => self.login(record.from).await?,
            RecordKind::Registration => self.register(&record).await?,
            RecordKind::ServerNotice => {
                info!(conn = %self.conn.id(), text = %record.body, "Client notice");
            }
            RecordKind::Confirmation => {
                debug!(conn = %self.conn.id(), "Ignoring confirmation from client");
            }
            RecordKind::ListContacts
            | RecordKind::AddContact
            | RecordKind::RemoveContact
            | RecordKind::SendMessage
            | RecordKind::CheckUnread
            | RecordKind::MarkRead => match self.identity() {
                Some(me) => self.handle_user_request(me, record).await?,
                None => {
                    debug!(conn = %self.conn.id(), kind = ?record.kind, "Rejecting request before login");
                    self.reply(Record::confirmation(replies::UNAUTHENTICATED))
                        .await?;
                }
            },
        }
        Ok(Flow::Continue)
    }

    async fn handle_user_request(&mut self, me: UserId, record: Record) -> Result<(), SessionError> {
        match record.kind {
            RecordKind::ListContacts => self.list_contacts(me).await,
            RecordKind::AddContact => self.add_contact(me, &record.body).await,
            RecordKind::RemoveContact => self.remove_contact(me, record.to).await,
            RecordKind::SendMessage => self.send_message(me, record.to, record.body).await,
            RecordKind::CheckUnread => self.check_unread(me).await,
            RecordKind::MarkRead => self.mark_read(me, record.to).await,
            other => {
                debug!(conn = %self.conn.id(), kind = ?other, "Not a user request");
                Ok(())
            }
        }
    }

    // -- Authentication ------------------------------------------------------

    async fn login(&mut self, id: UserId) -> Result<(), SessionError> {
        if self.app.store.is_registered(id) {
            self.go_online(id).await;
            info!(user = %id, conn = %self.conn.id(), "Logged in");
            return self.reply(Record::confirmation(replies::LOGGED_IN)).await;
        }

        self.release().await;
        self.state = SessionState::AwaitingRegistration(id);
        debug!(user = %id, conn = %self.conn.id(), "Unknown identity, registration required");
        self.reply(Record::registration_required(id)).await
    }

    async fn register(&mut self, record: &Record) -> Result<(), SessionError> {
        let id = match self.state {
            SessionState::AwaitingRegistration(id) => id,
            _ => record.from,
        };
        if id.is_server() {
            return Err(StoreError::InvalidField(format!("identity {id} is reserved")).into());
        }

        let profile = UserProfile::from_registration(id, &record.body)?;
        self.blocking(move |store| store.register(&profile)).await?;

        self.go_online(id).await;
        info!(user = %id, conn = %self.conn.id(), "Registered");
        self.reply(Record::confirmation(replies::REGISTERED)).await
    }

    /// Map `id` to this connection, releasing any other identity this
    /// session held and closing any other connection that held `id`.
    async fn go_online(&mut self, id: UserId) {
        if self.identity() != Some(id) {
            self.release().await;
        }

        if let Some(evicted) = self.app.registry.set_online(id, self.conn.clone()).await {
            info!(user = %id, conn = %evicted.id(), "Evicting earlier connection");
            if evicted.try_send(Record::disconnect()).is_err() {
                debug!(user = %id, conn = %evicted.id(), "Evicted connection already closing");
            }
            evicted.close();
        }

        self.state = SessionState::Authenticated(id);
    }

    async fn release(&mut self) {
        if let SessionState::Authenticated(id) = self.state {
            self.app.registry.remove(id, self.conn.id()).await;
            self.state = SessionState::Unauthenticated;
        }
    }

    // -- Contacts ------------------------------------------------------------

    async fn list_contacts(&mut self, me: UserId) -> Result<(), SessionError> {
        let contacts = self.blocking(move |store| store.list_contacts(me)).await?;
        if contacts.is_empty() {
            return self
                .reply(Record::confirmation(replies::CONTACT_LIST_EMPTY))
                .await;
        }

        let count = UserId(i32::try_from(contacts.len()).unwrap_or(i32::MAX));
        for contact in contacts {
            self.reply(Record::new(
                RecordKind::ListContacts,
                count,
                UserId::SERVER,
                contact.to_line(),
            ))
            .await?;
        }
        Ok(())
    }

    async fn add_contact(&mut self, me: UserId, body: &str) -> Result<(), SessionError> {
        let contact: Contact = body.parse()?;
        let outcome = self
            .blocking(move |store| store.add_contact(me, &contact))
            .await?;

        let text = match outcome {
            AddOutcome::Added => replies::CONTACT_ADDED,
            AddOutcome::AlreadyExists => replies::CONTACT_EXISTS,
        };
        self.reply(Record::confirmation(text)).await
    }

    async fn remove_contact(&mut self, me: UserId, contact_id: UserId) -> Result<(), SessionError> {
        self.blocking(move |store| store.remove_contact(me, contact_id))
            .await?;
        self.reply(Record::confirmation(replies::CONTACT_REMOVED))
            .await
    }

    // -- Messages ------------------------------------------------------------

    async fn send_message(&mut self, me: UserId, to: UserId, text: String) -> Result<(), SessionError> {
        if !self.app.store.is_registered(to) {
            return self
                .reply(Record::confirmation(replies::RECIPIENT_NOT_REGISTERED))
                .await;
        }

        let stored = text.clone();
        self.blocking(move |store| store.record_exchange(me, to, &stored, Utc::now()))
            .await?;
        self.reply(Record::confirmation(replies::MESSAGE_SENT))
            .await?;

        let record = Record::new(RecordKind::SendMessage, to, me, text);
        let outcome = delivery::deliver(&self.app.registry, to, record).await;
        debug!(from = %me, to = %to, ?outcome, "Message handled");
        Ok(())
    }

    async fn check_unread(&mut self, me: UserId) -> Result<(), SessionError> {
        let counts = self
            .blocking(move |store| store.count_unread_by_sender(me))
            .await?;
        if counts.is_empty() {
            return self.reply(Record::confirmation(replies::NO_UNREAD)).await;
        }

        let summary = counts
            .iter()
            .map(|(peer, n)| format!("{n} Unread message from user {peer}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.reply(Record::new(RecordKind::CheckUnread, me, UserId::SERVER, summary))
            .await
    }

    async fn mark_read(&mut self, me: UserId, peer: UserId) -> Result<(), SessionError> {
        let rows = self.blocking(move |store| store.mark_read(me, peer)).await?;
        for row in rows {
            self.reply(Record::new(RecordKind::MarkRead, me, peer, row.to_line()))
                .await?;
        }
        self.reply(Record::confirmation(replies::MESSAGES_READ))
            .await
    }

    // -- Plumbing ------------------------------------------------------------

    /// Run a store operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&Store) -> terchat_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.app.store);
        Ok(tokio::task::spawn_blocking(move || op(&store)).await??)
    }

    /// Queue a reply. Waiting for queue room gives way to eviction and
    /// shutdown, so a client that never reads cannot pin the session.
    async fn reply(&mut self, record: Record) -> Result<(), SessionError> {
        tokio::select! {
            sent = self.conn.send(record) => sent,
            _ = self.conn.closed() => Err(SessionError::Interrupted),
            _ = self.shutdown.changed() => Err(SessionError::Interrupted),
        }
    }

    async fn reply_or_close(&mut self, record: Record) -> Flow {
        match self.reply(record).await {
            Ok(()) => Flow::Continue,
            Err(SessionError::Interrupted) => Flow::Close(CloseReason::Interrupted),
            Err(_) => Flow::Close(CloseReason::WriteFailed),
        }
    }

    async fn close(&mut self, reason: CloseReason) {
        let user = self.identity();
        self.release().await;
        self.state = SessionState::Closed;
        info!(
            conn = %self.conn.id(),
            user = ?user,
            ?reason,
            "Session closed"
        );
    }
}

async fn next_frame<R>(frames: &mut FramedRead<R, RecordCodec>, idle: Option<Duration>) -> Inbound
where
    R: AsyncRead + Unpin,
{
    let next = match idle {
        Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
            Ok(next) => next,
            Err(_) => return Inbound::IdleTimeout,
        },
        None => frames.next().await,
    };

    match next {
        Some(Ok(frame)) => Inbound::Frame(frame),
        Some(Err(e)) => Inbound::Failed(e),
        None => Inbound::Eof,
    }
}

/// Confirmation sent back when a store operation fails.
fn store_error_reply(e: &StoreError) -> Record {
    match e {
        StoreError::AlreadyRegistered(_) => Record::confirmation(replies::ALREADY_REGISTERED),
        StoreError::InvalidField(reason) => {
            Record::confirmation(WireError::Malformed(reason.clone()).to_string())
        }
        StoreError::NotFound(_) | StoreError::Io(_) | StoreError::Persist(_) => {
            warn!(error = %e, "Store operation failed");
            Record::confirmation(replies::SERVER_ERROR)
        }
    }
}
