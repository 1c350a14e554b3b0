//! End-to-end conversations with the server, driven over in-memory pipes
//! (and a real socket for the listener).

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use terchat_server::error::SessionError;
use terchat_server::session::run_session;
use terchat_server::{AppState, Server, ServerConfig};
use terchat_shared::constants::replies;
use terchat_shared::{Record, RecordCodec, RecordKind, UserId};
use terchat_store::{Store, UserProfile};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(5);

struct Client<T> {
    frames: Framed<T, RecordCodec>,
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn new(io: T) -> Self {
        Self {
            frames: Framed::new(io, RecordCodec::default()),
        }
    }

    async fn send(&mut self, record: Record) {
        self.frames.send(record).await.unwrap();
    }

    /// Next record from the server, or `None` once the server closed.
    async fn next(&mut self) -> Option<Record> {
        let frame = timeout(WAIT, self.frames.next())
            .await
            .expect("timed out waiting for the server");
        frame
            .and_then(|frame| frame.ok())
            .map(|frame| Record::decode(&frame).unwrap())
    }

    async fn recv(&mut self) -> Record {
        self.next().await.expect("server closed the connection")
    }

    async fn request(&mut self, record: Record) -> Record {
        self.send(record).await;
        self.recv().await
    }

    async fn login(&mut self, id: i32) -> Record {
        self.request(Record::new(
            RecordKind::LoginRequest,
            UserId::SERVER,
            UserId(id),
            "",
        ))
        .await
    }

    async fn send_message(&mut self, from: i32, to: i32, text: &str) -> Record {
        self.request(Record::new(RecordKind::SendMessage, UserId(to), UserId(from), text))
            .await
    }

    async fn simple(&mut self, kind: RecordKind, from: i32, to: i32) -> Record {
        self.request(Record::new(kind, UserId(to), UserId(from), ""))
            .await
    }
}

struct Harness {
    app: AppState,
    stop: watch::Sender<bool>,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let store = Store::open(dir.path()).unwrap();
        let (stop, _) = watch::channel(false);
        Self {
            app: AppState::new(store, config),
            stop,
            _dir: dir,
        }
    }

    fn connect(&self) -> (Client<DuplexStream>, JoinHandle<Result<(), SessionError>>) {
        self.connect_with_buffer(64 * 1024)
    }

    fn connect_with_buffer(
        &self,
        buffer: usize,
    ) -> (Client<DuplexStream>, JoinHandle<Result<(), SessionError>>) {
        let (client, server) = tokio::io::duplex(buffer);
        let task = tokio::spawn(run_session(server, self.app.clone(), self.stop.subscribe()));
        (Client::new(client), task)
    }

    fn register(&self, id: i32, body: &str) {
        let profile = UserProfile::from_registration(UserId(id), body).unwrap();
        self.app.store.register(&profile).unwrap();
    }
}

async fn finished(task: JoinHandle<Result<(), SessionError>>) {
    timeout(WAIT, task)
        .await
        .expect("session did not end")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_first_login_registers_then_logs_in() {
    let harness = Harness::new();
    let (mut client, task) = harness.connect();

    let reply = client.login(7).await;
    assert_eq!(reply.kind, RecordKind::Registration);
    assert_eq!(reply.to, UserId(7));

    let reply = client
        .request(Record::new(
            RecordKind::Registration,
            UserId::SERVER,
            UserId(7),
            "bob,555,Bob,Smith",
        ))
        .await;
    assert_eq!(reply, Record::confirmation(replies::REGISTERED));
    assert!(harness.app.registry.is_online(UserId(7)).await);

    client.send(Record::disconnect()).await;
    assert!(client.next().await.is_none());
    finished(task).await;
    assert!(!harness.app.registry.is_online(UserId(7)).await);

    let (mut client, _task) = harness.connect();
    assert_eq!(client.login(7).await.body, replies::LOGGED_IN);
    assert_eq!(
        client.simple(RecordKind::ListContacts, 7, -1).await.body,
        replies::CONTACT_LIST_EMPTY
    );
}

#[tokio::test]
async fn test_registration_uses_identity_from_login() {
    let harness = Harness::new();
    let (mut client, _task) = harness.connect();

    assert_eq!(client.login(9).await.kind, RecordKind::Registration);
    let reply = client
        .request(Record::new(
            RecordKind::Registration,
            UserId::SERVER,
            UserId(0),
            "nine,999,Nine,Nein",
        ))
        .await;
    assert_eq!(reply.body, replies::REGISTERED);
    assert!(harness.app.store.is_registered(UserId(9)));
    assert!(!harness.app.store.is_registered(UserId(0)));
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    let (mut client, _task) = harness.connect();

    let reply = client
        .request(Record::new(
            RecordKind::Registration,
            UserId::SERVER,
            UserId(7),
            "mallory,000,Mal,Lory",
        ))
        .await;
    assert_eq!(reply.body, replies::ALREADY_REGISTERED);
    assert_eq!(harness.app.store.profile(UserId(7)).unwrap().username, "bob");
}

#[tokio::test]
async fn test_requests_before_login_are_rejected() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    let (mut client, _task) = harness.connect();

    for kind in [
        RecordKind::ListContacts,
        RecordKind::RemoveContact,
        RecordKind::CheckUnread,
        RecordKind::MarkRead,
    ] {
        assert_eq!(client.simple(kind, 7, 8).await.body, replies::UNAUTHENTICATED);
    }
    assert_eq!(
        client.send_message(7, 7, "hi").await.body,
        replies::UNAUTHENTICATED
    );
    assert!(harness.app.store.messages(UserId(7)).unwrap().is_empty());
}

#[tokio::test]
async fn test_contact_lifecycle() {
    let harness = Harness::new();
    harness.register(1, "ann,111,Ann,Lee");
    let (mut client, _task) = harness.connect();
    client.login(1).await;

    let add = Record::new(RecordKind::AddContact, UserId::SERVER, UserId(1), "8,Alice,Jones,556");
    assert_eq!(client.request(add.clone()).await.body, replies::CONTACT_ADDED);
    assert_eq!(client.request(add).await.body, replies::CONTACT_EXISTS);

    let listed = client.simple(RecordKind::ListContacts, 1, -1).await;
    assert_eq!(
        listed,
        Record::new(RecordKind::ListContacts, UserId(1), UserId::SERVER, "8,Alice,Jones,556")
    );

    for _ in 0..2 {
        assert_eq!(
            client.simple(RecordKind::RemoveContact, 1, 8).await.body,
            replies::CONTACT_REMOVED
        );
    }
    assert_eq!(
        client.simple(RecordKind::ListContacts, 1, -1).await.body,
        replies::CONTACT_LIST_EMPTY
    );
}

#[tokio::test]
async fn test_list_contacts_sends_one_record_per_contact() {
    let harness = Harness::new();
    harness.register(1, "ann,111,Ann,Lee");
    let (mut client, _task) = harness.connect();
    client.login(1).await;

    for body in ["2,B,Two,222", "3,C,Three,333", "4,D,Four,444"] {
        client
            .request(Record::new(RecordKind::AddContact, UserId::SERVER, UserId(1), body))
            .await;
    }

    client.send(Record::new(RecordKind::ListContacts, UserId::SERVER, UserId(1), "")).await;
    let mut bodies = Vec::new();
    for _ in 0..3 {
        let record = client.recv().await;
        assert_eq!(record.kind, RecordKind::ListContacts);
        assert_eq!(record.to, UserId(3));
        bodies.push(record.body);
    }
    assert_eq!(bodies, vec!["2,B,Two,222", "3,C,Three,333", "4,D,Four,444"]);
}

#[tokio::test]
async fn test_malformed_contact_body_keeps_session() {
    let harness = Harness::new();
    harness.register(1, "ann,111,Ann,Lee");
    let (mut client, _task) = harness.connect();
    client.login(1).await;

    let reply = client
        .request(Record::new(RecordKind::AddContact, UserId::SERVER, UserId(1), "not a contact"))
        .await;
    assert_eq!(reply.kind, RecordKind::Confirmation);
    assert!(reply.body.starts_with("Malformed request"));

    assert_eq!(
        client.simple(RecordKind::ListContacts, 1, -1).await.body,
        replies::CONTACT_LIST_EMPTY
    );
}

#[tokio::test]
async fn test_message_to_offline_user_is_unread_on_login() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    harness.register(8, "alice,556,Alice,Jones");

    let (mut bob, _bob_task) = harness.connect();
    bob.login(7).await;
    assert_eq!(bob.send_message(7, 8, "hi").await.body, replies::MESSAGE_SENT);

    let (mut alice, _alice_task) = harness.connect();
    assert_eq!(alice.login(8).await.body, replies::LOGGED_IN);
    let summary = alice.simple(RecordKind::CheckUnread, 8, -1).await;
    assert_eq!(
        summary,
        Record::new(
            RecordKind::CheckUnread,
            UserId(8),
            UserId::SERVER,
            "1 Unread message from user 7"
        )
    );

    // The sender keeps an unread copy in its own log as well.
    assert_eq!(harness.app.store.messages(UserId(7)).unwrap().len(), 1);
}

#[tokio::test]
async fn test_online_recipient_gets_message_pushed() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    harness.register(8, "alice,556,Alice,Jones");

    let (mut bob, _bob_task) = harness.connect();
    let (mut alice, _alice_task) = harness.connect();
    bob.login(7).await;
    alice.login(8).await;

    assert_eq!(bob.send_message(7, 8, "hi, alice").await.body, replies::MESSAGE_SENT);
    assert_eq!(
        alice.recv().await,
        Record::new(RecordKind::SendMessage, UserId(8), UserId(7), "hi, alice")
    );

    // Pushed, but still unread until the recipient marks it.
    let unread = harness.app.store.count_unread_by_sender(UserId(8)).unwrap();
    assert_eq!(unread[&UserId(7)], 1);
}

#[tokio::test]
async fn test_message_to_unregistered_recipient_is_rejected() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    let (mut bob, _task) = harness.connect();
    bob.login(7).await;

    assert_eq!(
        bob.send_message(7, 42, "anyone?").await.body,
        replies::RECIPIENT_NOT_REGISTERED
    );
    assert!(harness.app.store.messages(UserId(7)).unwrap().is_empty());
}

#[tokio::test]
async fn test_mark_read_returns_rows_then_clears_unread() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    harness.register(8, "alice,556,Alice,Jones");

    let (mut bob, _bob_task) = harness.connect();
    bob.login(7).await;
    bob.send_message(7, 8, "first").await;
    bob.send_message(7, 8, "second").await;

    let (mut alice, _alice_task) = harness.connect();
    alice.login(8).await;
    alice
        .send(Record::new(RecordKind::MarkRead, UserId(7), UserId(8), ""))
        .await;

    for text in ["first", "second"] {
        let row = alice.recv().await;
        assert_eq!(row.kind, RecordKind::MarkRead);
        assert_eq!(row.to, UserId(8));
        assert_eq!(row.from, UserId(7));
        assert!(row.body.contains(&format!(", 7, {text}, 1")), "{}", row.body);
    }
    assert_eq!(alice.recv().await.body, replies::MESSAGES_READ);

    assert_eq!(
        alice.simple(RecordKind::CheckUnread, 8, -1).await.body,
        replies::NO_UNREAD
    );
}

#[tokio::test]
async fn test_concurrent_senders_lose_no_messages() {
    let harness = Harness::new();
    harness.register(100, "hub,100,Hub,Center");
    for id in 1..=4 {
        harness.register(id, &format!("user{id},{id},User,{id}"));
    }

    let mut senders = Vec::new();
    for id in 1..=4 {
        let (mut client, task) = harness.connect();
        senders.push(tokio::spawn(async move {
            client.login(id).await;
            for n in 0..5 {
                let reply = client.send_message(id, 100, &format!("{id}-{n}")).await;
                assert_eq!(reply.body, replies::MESSAGE_SENT);
            }
            client.send(Record::disconnect()).await;
            task
        }));
    }
    for sender in senders {
        finished(sender.await.unwrap()).await;
    }

    let counts = harness.app.store.count_unread_by_sender(UserId(100)).unwrap();
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|n| *n == 5));
    assert_eq!(harness.app.store.messages(UserId(100)).unwrap().len(), 20);
}

#[tokio::test]
async fn test_second_login_evicts_first_connection() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    harness.register(8, "alice,556,Alice,Jones");

    let (mut first, first_task) = harness.connect();
    first.login(7).await;

    let (mut second, _second_task) = harness.connect();
    assert_eq!(second.login(7).await.body, replies::LOGGED_IN);

    assert_eq!(first.recv().await.kind, RecordKind::Disconnect);
    assert!(first.next().await.is_none());
    finished(first_task).await;

    // The evicted session must not have removed its replacement.
    assert!(harness.app.registry.is_online(UserId(7)).await);
    let (mut alice, _alice_task) = harness.connect();
    alice.login(8).await;
    alice.send_message(8, 7, "still there?").await;
    assert_eq!(second.recv().await.body, "still there?");
}

#[tokio::test]
async fn test_shutdown_disconnects_every_session() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");

    let (mut bob, bob_task) = harness.connect();
    bob.login(7).await;
    let (mut anonymous, anonymous_task) = harness.connect();

    assert_eq!(harness.app.registry.shutdown_all().await, 1);
    harness.stop.send_replace(true);

    assert_eq!(bob.recv().await.kind, RecordKind::Disconnect);
    assert!(bob.next().await.is_none());
    assert!(anonymous.next().await.is_none());
    finished(bob_task).await;
    finished(anonymous_task).await;
    assert!(harness.app.registry.is_empty().await);
}

#[tokio::test]
async fn test_shutdown_ends_session_whose_client_never_reads() {
    let harness = Harness::with_config(|config| config.outbound_queue = 1);
    let (mut client, task) = harness.connect_with_buffer(64);

    // Keep requesting without reading a single reply, so the pipe and the
    // outbound queue both fill up and the session waits on its own reply.
    let flood = tokio::spawn(async move {
        for id in 0..200 {
            let login = Record::new(RecordKind::LoginRequest, UserId::SERVER, UserId(id), "");
            if client.frames.send(login).await.is_err() {
                break;
            }
        }
        client
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    harness.app.registry.shutdown_all().await;
    harness.stop.send_replace(true);

    // Allows for the writer drain timeout before the stuck writer is aborted.
    timeout(Duration::from_secs(15), task)
        .await
        .expect("session still running after shutdown")
        .unwrap()
        .unwrap();
    flood.abort();
}

#[tokio::test]
async fn test_unknown_kind_is_answered_and_session_continues() {
    let harness = Harness::new();
    harness.register(7, "bob,555,Bob,Smith");
    let (mut client, _task) = harness.connect();

    // Well-framed record with kind 42.
    let mut raw = Vec::new();
    raw.extend_from_slice(&16u32.to_be_bytes());
    raw.extend_from_slice(&42i32.to_be_bytes());
    raw.extend_from_slice(&(-1i32).to_be_bytes());
    raw.extend_from_slice(&7i32.to_be_bytes());
    raw.extend_from_slice(&0u32.to_be_bytes());
    client.frames.get_mut().write_all(&raw).await.unwrap();

    let reply = client.recv().await;
    assert_eq!(reply.kind, RecordKind::Confirmation);
    assert!(reply.body.contains("42"));

    assert_eq!(client.login(7).await.body, replies::LOGGED_IN);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let harness = Harness::new();
    let (mut client, task) = harness.connect();

    client
        .frames
        .get_mut()
        .write_all(&(1_000_000u32).to_be_bytes())
        .await
        .unwrap();

    let reply = client.recv().await;
    assert_eq!(reply.kind, RecordKind::Confirmation);
    assert!(reply.body.starts_with("Frame too large"));
    assert!(client.next().await.is_none());
    finished(task).await;
}

#[tokio::test]
async fn test_idle_session_is_closed() {
    let harness = Harness::with_config(|config| {
        config.idle_timeout = Some(Duration::from_millis(200));
    });
    harness.register(7, "bob,555,Bob,Smith");
    let (mut client, task) = harness.connect();
    client.login(7).await;

    assert!(client.next().await.is_none());
    finished(task).await;
    assert!(!harness.app.registry.is_online(UserId(7)).await);
}

#[tokio::test]
async fn test_listener_enforces_session_cap_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        data_dir: dir.path().to_path_buf(),
        max_sessions: 1,
        ..ServerConfig::default()
    };
    let store = Store::open(dir.path()).unwrap();
    let profile = UserProfile::from_registration(UserId(7), "bob,555,Bob,Smith").unwrap();
    store.register(&profile).unwrap();

    let server = Arc::new(Server::new(AppState::new(store, config)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    let mut first = Client::new(TcpStream::connect(addr).await.unwrap());
    assert_eq!(first.login(7).await.body, replies::LOGGED_IN);

    let mut second = Client::new(TcpStream::connect(addr).await.unwrap());
    assert_eq!(second.recv().await, Record::notice(replies::SERVER_FULL));
    assert!(second.next().await.is_none());

    server.shutdown().await;
    assert_eq!(first.recv().await.kind, RecordKind::Disconnect);
    assert!(first.next().await.is_none());

    timeout(WAIT, serve).await.unwrap().unwrap().unwrap();
    assert!(server.state().registry.is_empty().await);
}
