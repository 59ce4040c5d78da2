//! End-to-end tests: a real server on an ephemeral port, driven by real
//! clients over TCP.

use std::net::SocketAddr;

use bytes::Bytes;
use quill_server::{
    ClientError, Digest, DocumentId, DocumentName, InboundMessage, MemoryDocumentStore,
    MemoryUserDirectory, OutboundMessage, ServerConfig, ShutdownHandle, Status, SyncClient,
    SyncCoordinator, SyncServer, UserDirectory, UserId, UserName,
};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

struct TestServer {
    addr: SocketAddr,
    users: MemoryUserDirectory,
    shutdown: ShutdownHandle,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    async fn start_with(config: ServerConfig) -> Self {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..config
        };
        let users = MemoryUserDirectory::new();
        let mut server = SyncServer::bind(config).await.unwrap();
        server.add_handler(SyncCoordinator::new(
            MemoryDocumentStore::new(),
            users.clone(),
        ));
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move {
            server.run().await.unwrap();
        });
        Self {
            addr,
            users,
            shutdown,
            task,
        }
    }

    fn add_user(&self, name: &str) -> UserId {
        self.users
            .create_with_password(&UserName::new(name).unwrap(), "pw")
            .unwrap()
    }

    async fn connect(&self) -> SyncClient {
        SyncClient::connect(self.addr).await.unwrap()
    }

    /// Connect and log in as `name`, which must exist.
    async fn login(&self, name: &str) -> SyncClient {
        let mut client = self.connect().await;
        let status = timeout(WAIT, client.login(name, "pw")).await.unwrap().unwrap();
        assert_eq!(status, Status::Success);
        client
    }

    async fn stop(self) {
        self.shutdown.shutdown();
        timeout(WAIT, self.task).await.unwrap().unwrap();
    }
}

async fn next(client: &mut SyncClient) -> OutboundMessage {
    timeout(WAIT, client.receive())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
}

/// Next message that is not a `USER_JOIN`.
async fn next_skipping_joins(client: &mut SyncClient) -> OutboundMessage {
    loop {
        match next(client).await {
            OutboundMessage::UserJoin { .. } => continue,
            other => return other,
        }
    }
}

/// Assert nothing arrives for a short while.
async fn assert_quiet(client: &mut SyncClient) {
    if let Ok(result) = timeout(QUIET, client.receive()).await {
        panic!("expected silence, got {result:?}");
    }
}

async fn assert_closed(client: &mut SyncClient) {
    let result = timeout(WAIT, client.receive())
        .await
        .expect("connection was not closed");
    assert!(result.is_err(), "expected close, got {result:?}");
}

fn doc(name: &str) -> DocumentName {
    DocumentName::new(name).unwrap()
}

#[tokio::test]
async fn test_login_broadcasts_user_join() {
    let server = TestServer::start().await;
    server.add_user("bob");
    let alice_id = server.add_user("alice");

    let mut bob = server.login("bob").await;
    let _alice = server.login("alice").await;

    assert_eq!(
        next(&mut bob).await,
        OutboundMessage::UserJoin {
            id: alice_id,
            name: UserName::new("alice").unwrap(),
        }
    );
    server.stop().await;
}

#[tokio::test]
async fn test_bad_password_keeps_connection() {
    let server = TestServer::start().await;
    server.add_user("alice");
    let mut watcher = server.connect().await;

    let mut client = server.connect().await;
    let status = timeout(WAIT, client.login("alice", "wrong")).await.unwrap().unwrap();
    assert_eq!(status, Status::Failure);
    let status = timeout(WAIT, client.login("mallory", "pw")).await.unwrap().unwrap();
    assert_eq!(status, Status::Failure);

    // still connected, and a correct login now succeeds
    let status = timeout(WAIT, client.login("alice", "pw")).await.unwrap().unwrap();
    assert_eq!(status, Status::Success);
    assert!(matches!(next(&mut watcher).await, OutboundMessage::UserJoin { .. }));
    server.stop().await;
}

#[tokio::test]
async fn test_second_login_with_same_name_fails() {
    let server = TestServer::start().await;
    server.add_user("alice");

    let mut first = server.login("alice").await;
    let mut second = server.connect().await;
    let status = timeout(WAIT, second.login("alice", "pw")).await.unwrap().unwrap();
    assert_eq!(status, Status::Failure);

    assert_quiet(&mut first).await;
    server.stop().await;
}

#[tokio::test]
async fn test_sync_byte_reaches_everyone_but_sender() {
    let server = TestServer::start().await;
    for name in ["a", "b", "c"] {
        server.add_user(name);
    }
    let mut a = server.login("a").await;
    let mut b = server.login("b").await;
    let mut c = server.login("c").await;

    a.send(InboundMessage::SyncByte { byte: b'x' }).await.unwrap();

    let expected = OutboundMessage::SyncByte {
        position: 0,
        byte: b'x',
    };
    assert_eq!(next_skipping_joins(&mut b).await, expected);
    assert_eq!(next_skipping_joins(&mut c).await, expected);

    // a only ever sees the two joins
    assert!(matches!(next(&mut a).await, OutboundMessage::UserJoin { .. }));
    assert!(matches!(next(&mut a).await, OutboundMessage::UserJoin { .. }));
    assert_quiet(&mut a).await;
    server.stop().await;
}

#[tokio::test]
async fn test_relayed_positions_follow_the_cursor() {
    let server = TestServer::start().await;
    server.add_user("a");
    server.add_user("b");
    let mut a = server.login("a").await;
    let mut b = server.login("b").await;

    a.send(InboundMessage::SyncCursor { position: 10 }).await.unwrap();
    a.send(InboundMessage::SyncMultibyte {
        bytes: Bytes::from_static(b"abc"),
    })
    .await
    .unwrap();
    a.send(InboundMessage::SyncByte { byte: b'd' }).await.unwrap();
    a.send(InboundMessage::SyncDeletion {
        position: 2,
        length: 4,
    })
    .await
    .unwrap();

    assert_eq!(
        next_skipping_joins(&mut b).await,
        OutboundMessage::SyncCursor { position: 10 }
    );
    assert_eq!(
        next(&mut b).await,
        OutboundMessage::SyncMultibyte {
            position: 10,
            bytes: Bytes::from_static(b"abc"),
        }
    );
    assert_eq!(
        next(&mut b).await,
        OutboundMessage::SyncByte {
            position: 13,
            byte: b'd',
        }
    );
    assert_eq!(
        next(&mut b).await,
        OutboundMessage::SyncDeletion {
            position: 2,
            length: 4,
        }
    );
    server.stop().await;
}

#[tokio::test]
async fn test_empty_multibyte_is_relayed() {
    let server = TestServer::start().await;
    server.add_user("a");
    server.add_user("b");
    let mut a = server.login("a").await;
    let mut b = server.login("b").await;

    a.send(InboundMessage::SyncMultibyte { bytes: Bytes::new() })
        .await
        .unwrap();
    assert_eq!(
        next_skipping_joins(&mut b).await,
        OutboundMessage::SyncMultibyte {
            position: 0,
            bytes: Bytes::new(),
        }
    );
    server.stop().await;
}

#[tokio::test]
async fn test_stale_activate_fails_without_broadcast() {
    let server = TestServer::start().await;
    server.add_user("a");
    server.add_user("b");
    let mut a = server.login("a").await;
    let mut b = server.login("b").await;

    a.send(InboundMessage::DocCreate { name: doc("notes") }).await.unwrap();
    assert_eq!(
        next_skipping_joins(&mut a).await,
        OutboundMessage::DocCreate {
            status: Status::Success,
            name: doc("notes"),
        }
    );
    a.send(InboundMessage::DocOpen { name: doc("notes") }).await.unwrap();
    let id = match next(&mut a).await {
        OutboundMessage::DocOpen {
            status: Status::Success,
            id,
            ..
        } => id,
        other => panic!("unexpected {other:?}"),
    };
    a.send(InboundMessage::SyncMultibyte {
        bytes: Bytes::from_static(b"hello"),
    })
    .await
    .unwrap();

    // b is still in the lobby and does not see edits to the document
    b.send(InboundMessage::DocActivate {
        id,
        hash: Digest::of(b""),
    })
    .await
    .unwrap();
    assert_eq!(
        next(&mut b).await,
        OutboundMessage::DocActivate {
            status: Status::Failure,
            id,
        }
    );
    assert_quiet(&mut a).await;

    b.send(InboundMessage::DocActivate {
        id,
        hash: Digest::of(b"hello"),
    })
    .await
    .unwrap();
    assert_eq!(
        next(&mut b).await,
        OutboundMessage::DocActivate {
            status: Status::Success,
            id,
        }
    );
    b.send(InboundMessage::SyncByte { byte: b'!' }).await.unwrap();
    assert_eq!(
        next(&mut a).await,
        OutboundMessage::SyncByte {
            position: 0,
            byte: b'!',
        }
    );
    server.stop().await;
}

#[tokio::test]
async fn test_document_lifecycle() {
    let server = TestServer::start().await;
    server.add_user("a");
    let mut a = server.login("a").await;

    a.send(InboundMessage::DocOpen { name: doc("draft") }).await.unwrap();
    assert_eq!(
        next(&mut a).await,
        OutboundMessage::DocOpen {
            status: Status::Failure,
            id: DocumentId(0),
            name: doc("draft"),
        }
    );

    a.send(InboundMessage::DocCreate { name: doc("draft") }).await.unwrap();
    assert!(matches!(
        next(&mut a).await,
        OutboundMessage::DocCreate {
            status: Status::Success,
            ..
        }
    ));
    a.send(InboundMessage::DocCreate { name: doc("draft") }).await.unwrap();
    assert!(matches!(
        next(&mut a).await,
        OutboundMessage::DocCreate {
            status: Status::Failure,
            ..
        }
    ));

    a.send(InboundMessage::DocOpen { name: doc("draft") }).await.unwrap();
    let id = match next(&mut a).await {
        OutboundMessage::DocOpen { status, id, .. } if status.is_success() => id,
        other => panic!("unexpected {other:?}"),
    };
    a.send(InboundMessage::SyncMultibyte {
        bytes: Bytes::from_static(b"text"),
    })
    .await
    .unwrap();
    a.send(InboundMessage::DocSave { id }).await.unwrap();
    assert_eq!(
        next(&mut a).await,
        OutboundMessage::DocSave {
            status: Status::Success,
            id,
        }
    );

    // reopening delivers the contents
    a.send(InboundMessage::DocOpen { name: doc("draft") }).await.unwrap();
    assert!(matches!(next(&mut a).await, OutboundMessage::DocOpen { .. }));
    assert_eq!(
        next(&mut a).await,
        OutboundMessage::SyncMultibyte {
            position: 0,
            bytes: Bytes::from_static(b"text"),
        }
    );

    a.send(InboundMessage::DocDelete { name: doc("draft") }).await.unwrap();
    assert_eq!(
        next(&mut a).await,
        OutboundMessage::DocDelete {
            status: Status::Success,
            name: doc("draft"),
        }
    );
    a.send(InboundMessage::DocSave { id }).await.unwrap();
    assert_eq!(
        next(&mut a).await,
        OutboundMessage::DocSave {
            status: Status::Failure,
            id,
        }
    );
    server.stop().await;
}

#[tokio::test]
async fn test_requests_before_login_fail() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send(InboundMessage::DocCreate { name: doc("x") })
        .await
        .unwrap();
    assert_eq!(next(&mut client).await, OutboundMessage::failure());
    client.send(InboundMessage::SyncByte { byte: 1 }).await.unwrap();
    assert_eq!(next(&mut client).await, OutboundMessage::failure());
    server.stop().await;
}

#[tokio::test]
async fn test_invalid_tag_closes_connection() {
    let server = TestServer::start().await;
    server.add_user("a");
    let mut a = server.login("a").await;
    let mut bad = server.connect().await;

    bad.send_raw(&[0xFF, 0x00, 0x01]).await.unwrap();
    assert_closed(&mut bad).await;
    assert_quiet(&mut a).await;
    server.stop().await;
}

#[tokio::test]
async fn test_repeated_oversized_payloads_close_connection() {
    let server = TestServer::start_with(ServerConfig {
        max_payload_len: 8,
        ..ServerConfig::default()
    })
    .await;
    server.add_user("a");
    let mut a = server.login("a").await;
    let oversized = InboundMessage::SyncMultibyte {
        bytes: Bytes::from(vec![7u8; 16]),
    };

    // one rejection is tolerated and a valid message resets the count
    a.send(oversized.clone()).await.unwrap();
    a.send(InboundMessage::DocSave { id: DocumentId(5) }).await.unwrap();
    assert_eq!(
        next(&mut a).await,
        OutboundMessage::DocSave {
            status: Status::Failure,
            id: DocumentId(5),
        }
    );

    a.send(oversized.clone()).await.unwrap();
    a.send(oversized).await.unwrap();
    assert_closed(&mut a).await;
    server.stop().await;
}

#[tokio::test]
async fn test_logout_broadcasts_user_quit() {
    let server = TestServer::start().await;
    server.add_user("a");
    let b_id = server.add_user("b");
    let mut a = server.login("a").await;
    let mut b = server.login("b").await;

    b.logout().await.unwrap();
    assert_eq!(
        next_skipping_joins(&mut a).await,
        OutboundMessage::UserQuit { id: b_id }
    );
    assert_closed(&mut b).await;
    assert_quiet(&mut a).await;
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_broadcasts_user_quit() {
    let server = TestServer::start().await;
    server.add_user("a");
    let b_id = server.add_user("b");
    let mut a = server.login("a").await;
    let b = server.login("b").await;

    drop(b);
    assert_eq!(
        next_skipping_joins(&mut a).await,
        OutboundMessage::UserQuit { id: b_id }
    );
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::start().await;
    server.add_user("a");
    let mut a = server.login("a").await;
    let addr = server.addr;

    server.stop().await;
    assert_closed(&mut a).await;
    assert!(matches!(
        SyncClient::connect(addr).await,
        Err(ClientError::Connect(_))
    ));
}
