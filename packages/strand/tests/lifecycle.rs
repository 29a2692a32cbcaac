//! Connection lifecycle integration tests
//!
//! Exercises the full connect/read/write/close cycle against real local
//! sockets: echo round-trips, framing reassembly, peer-initiated close with
//! automatic reconnection, connect failures, idle timeouts and teardown of
//! pending writes.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use strand::{Client, ClientConfig, CloseReason, ConnectFailure, Error, Event, EventKind};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Spawn a TCP echo server on an ephemeral port and return its address.
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Register a handler that forwards every event of `kind` into a channel.
fn event_channel(client: &Client, kind: EventKind) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    client
        .on(kind, move |event| {
            let _ = tx.send(event);
        })
        .expect("register handler");
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn connect_then_echo_round_trip() {
    init_tracing();
    let addr = spawn_echo_server().await;
    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .framing(*b"\n", 64 * 1024)
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");

    let mut connects = event_channel(&client, EventKind::Connect);
    let mut reads = event_channel(&client, EventKind::Read);

    client.connect().expect("connect command");
    match next_event(&mut connects).await {
        Event::Connect(result) => result.expect("connect should succeed"),
        other => panic!("expected connect event, got {other:?}"),
    }
    assert!(client.is_connected(), "state should mirror the connect");

    client.write(&b"hello\n"[..]).expect("write");
    match next_event(&mut reads).await {
        Event::Read(frame) => assert_eq!(&frame[..], b"hello\n", "echo should round-trip"),
        other => panic!("expected read event, got {other:?}"),
    }

    let snapshot = client.stats();
    assert_eq!(snapshot.bytes_sent, 6, "stats should count sent bytes");
    assert_eq!(snapshot.bytes_received, 6, "stats should count received bytes");

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn framing_reassembles_split_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        // First chunk carries no token, second completes two frames.
        socket.write_all(b"ab").await.expect("write");
        socket.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_millis(100)).await;
        socket.write_all(b"cd\nef\n").await.expect("write");
        socket.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .framing(*b"\n", 64 * 1024)
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut reads = event_channel(&client, EventKind::Read);
    client.connect().expect("connect command");

    // One absorption cycle delivers everything through the last token.
    match next_event(&mut reads).await {
        Event::Read(frame) => assert_eq!(&frame[..], b"abcd\nef\n"),
        other => panic!("expected read event, got {other:?}"),
    }

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn peer_close_fires_close_then_reconnects() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        // Drop the first connection immediately, hold the second open.
        let (socket, _) = listener.accept().await.expect("accept");
        drop(socket);
        let (_held, _) = listener.accept().await.expect("accept again");
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut config = ClientConfig::builder("127.0.0.1", addr.port())
        .build()
        .expect("config");
    config.reconnect.on_close = true;
    config.reconnect.after_close_ms = 100;

    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);
    let mut closes = event_channel(&client, EventKind::Close);
    client.connect().expect("connect command");

    match next_event(&mut connects).await {
        Event::Connect(result) => result.expect("first connect should succeed"),
        other => panic!("expected connect event, got {other:?}"),
    }
    match next_event(&mut closes).await {
        Event::Close(reason) => assert_eq!(reason, CloseReason::Eof, "peer close is an EOF"),
        other => panic!("expected close event, got {other:?}"),
    }
    match next_event(&mut connects).await {
        Event::Connect(result) => result.expect("automatic reconnect should succeed"),
        other => panic!("expected connect event, got {other:?}"),
    }
    assert!(client.is_connected());

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn connect_refused_reports_refused() {
    // Bind then drop to obtain a port nothing is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);
    client.connect().expect("connect command");

    match next_event(&mut connects).await {
        Event::Connect(Err(failure)) => assert_eq!(failure, ConnectFailure::Refused),
        other => panic!("expected refused connect, got {other:?}"),
    }
    assert!(!client.is_connected());

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn idle_read_timeout_closes_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        // Accept and go silent.
        let (_held, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .read_timeout_ms(200)
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);
    let mut closes = event_channel(&client, EventKind::Close);
    client.connect().expect("connect command");

    match next_event(&mut connects).await {
        Event::Connect(result) => result.expect("connect should succeed"),
        other => panic!("expected connect event, got {other:?}"),
    }
    match next_event(&mut closes).await {
        Event::Close(reason) => assert_eq!(reason, CloseReason::Timeout),
        other => panic!("expected close event, got {other:?}"),
    }

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn destroy_fails_pending_writes_and_runs_destructors() {
    // Never connected, so the queued request cannot drain.
    let config = ClientConfig::builder("127.0.0.1", 9)
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");

    let (complete_tx, mut complete_rx) = mpsc::unbounded_channel();
    client
        .write_with(&b"stranded"[..], move |result| {
            let _ = complete_tx.send(result);
        })
        .expect("write");

    let (destroy_tx, mut destroy_rx) = mpsc::unbounded_channel();
    client
        .write_owned(b"owned".to_vec(), move || {
            let _ = destroy_tx.send(());
        })
        .expect("write");

    client.destroy().expect("destroy");

    let completion = timeout(Duration::from_secs(5), complete_rx.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("completion channel closed");
    assert!(
        matches!(completion, Err(Error::Closed)),
        "pending writes should fail with Closed, got {completion:?}"
    );
    timeout(Duration::from_secs(5), destroy_rx.recv())
        .await
        .expect("timed out waiting for destructor")
        .expect("destructor channel closed");
}

#[tokio::test]
async fn cancelled_request_is_never_sent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 4096];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = seen_tx.send(buf[..n].to_vec());
                }
            }
        }
    });

    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);

    // Queue both before connecting so the cancel lands while queued.
    let doomed = client.write(&b"doomed"[..]).expect("write");
    client.write(&b"kept"[..]).expect("write");
    doomed.cancel();

    client.connect().expect("connect command");
    match next_event(&mut connects).await {
        Event::Connect(result) => result.expect("connect should succeed"),
        other => panic!("expected connect event, got {other:?}"),
    }

    let seen = timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("timed out waiting for server bytes")
        .expect("server channel closed");
    assert_eq!(&seen[..], b"kept", "cancelled bytes must never hit the wire");

    client.destroy().expect("destroy");
}
