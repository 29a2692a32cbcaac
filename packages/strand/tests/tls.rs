//! TLS integration tests
//!
//! Runs the rustls handshake, echo traffic and failure classification
//! against a local tokio-rustls acceptor using the static certificates
//! under `tests/certs/`.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use strand::{Client, ClientConfig, ConnectFailure, Event, EventKind, SocketState, TlsConfig};

const CERT_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/certs");

fn cert_path(name: &str) -> PathBuf {
    PathBuf::from(CERT_DIR).join(name)
}

fn load_server_material() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let mut cert_reader =
        BufReader::new(File::open(cert_path("cert.pem")).expect("open server cert"));
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .expect("parse server certs");
    let mut key_reader = BufReader::new(File::open(cert_path("key.pem")).expect("open server key"));
    let key = rustls_pemfile::private_key(&mut key_reader)
        .expect("parse server key")
        .expect("server key present");
    (certs, key)
}

/// Spawn a TLS echo server on an ephemeral port and return its address.
async fn spawn_tls_echo_server() -> SocketAddr {
    let (certs, key) = load_server_material();
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server config");
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut stream) = acceptor.accept(socket).await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
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

/// Spawn a server that accepts TCP connections and then goes silent,
/// holding each socket open without ever speaking TLS.
async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            held.push(socket);
        }
    });
    addr
}

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
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn tls_handshake_then_echo_round_trip() {
    let addr = spawn_tls_echo_server().await;
    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .sni_hostname("localhost")
        .tls(TlsConfig {
            ca_path: Some(cert_path("ca.pem")),
            ..TlsConfig::default()
        })
        .framing(*b"\n", 64 * 1024)
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");

    let mut connects = event_channel(&client, EventKind::Connect);
    let mut reads = event_channel(&client, EventKind::Read);
    client.connect().expect("connect command");

    match next_event(&mut connects).await {
        Event::Connect(result) => result.expect("tls connect should succeed"),
        other => panic!("expected connect event, got {other:?}"),
    }
    assert!(client.is_connected());
    assert!(
        client.peer_certificate().is_some(),
        "the server's certificate should be captured at handshake"
    );

    client.write(&b"over tls\n"[..]).expect("write");
    match next_event(&mut reads).await {
        Event::Read(frame) => assert_eq!(&frame[..], b"over tls\n"),
        other => panic!("expected read event, got {other:?}"),
    }

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn missing_trust_root_fails_as_tls_context() {
    // Any port works: context construction fails before a socket is needed,
    // but classification still rides the Connect event.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _held = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .tls(TlsConfig {
            ca_path: Some(cert_path("no-such-ca.pem")),
            ..TlsConfig::default()
        })
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);
    client.connect().expect("connect command");

    match next_event(&mut connects).await {
        Event::Connect(Err(failure)) => assert_eq!(failure, ConnectFailure::TlsContext),
        other => panic!("expected tls context failure, got {other:?}"),
    }
    assert!(!client.is_connected());

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn untrusted_server_fails_as_tls_handshake() {
    // The server presents a certificate the client's trust anchors do not
    // cover, so the handshake itself is what fails.
    let addr = spawn_tls_echo_server().await;
    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .sni_hostname("localhost")
        .connect_timeout_ms(5_000)
        .tls(TlsConfig::default())
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);
    client.connect().expect("connect command");

    match next_event(&mut connects).await {
        Event::Connect(Err(failure)) => assert_eq!(failure, ConnectFailure::TlsHandshake),
        other => panic!("expected tls handshake failure, got {other:?}"),
    }

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn destroy_interrupts_a_stalled_tls_handshake() {
    // The peer accepts TCP but never answers the ClientHello; the driver
    // sits in the handshake wait. The owner must still be able to tear the
    // connection down from there.
    let addr = spawn_silent_server().await;
    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .sni_hostname("localhost")
        .connect_timeout_ms(30_000)
        .tls(TlsConfig {
            ca_path: Some(cert_path("ca.pem")),
            ..TlsConfig::default()
        })
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    client.connect().expect("connect command");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.state(), SocketState::TlsHandshake);

    client.destroy().expect("destroy");
    let settled = Duration::from_secs(2);
    let gone = timeout(settled, async {
        while client.state() != SocketState::Disconnected {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "destroy left the driver parked in the handshake");
}

#[tokio::test]
async fn stalled_handshake_fails_with_timeout() {
    let addr = spawn_silent_server().await;
    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .sni_hostname("localhost")
        .connect_timeout_ms(300)
        .tls(TlsConfig {
            ca_path: Some(cert_path("ca.pem")),
            ..TlsConfig::default()
        })
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);
    client.connect().expect("connect command");

    match next_event(&mut connects).await {
        Event::Connect(Err(failure)) => assert_eq!(failure, ConnectFailure::Timeout),
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert!(!client.is_connected());

    client.destroy().expect("destroy");
}

#[tokio::test]
async fn backpressured_tls_write_drains_after_peer_resumes() {
    // Queue far more plaintext than rustls will buffer while the peer is
    // not reading. The write must park, requeue its head and resume once
    // write readiness returns, draining to completion.
    const PAYLOAD: usize = 4 * 1024 * 1024;

    let (certs, key) = load_server_material();
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server config");
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut stream) = acceptor.accept(socket).await else {
            return;
        };
        // Let the client's queue back up before reading anything.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0usize;
        while total < PAYLOAD {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => total += n,
            }
        }
        let _ = stream.write_all(b"done\n").await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let config = ClientConfig::builder("127.0.0.1", addr.port())
        .sni_hostname("localhost")
        .tls(TlsConfig {
            ca_path: Some(cert_path("ca.pem")),
            ..TlsConfig::default()
        })
        .framing(*b"\n", 64 * 1024)
        .build()
        .expect("config");
    let client = Client::new(config).expect("client");
    let mut connects = event_channel(&client, EventKind::Connect);
    let mut reads = event_channel(&client, EventKind::Read);
    client.connect().expect("connect command");
    match next_event(&mut connects).await {
        Event::Connect(result) => result.expect("tls connect should succeed"),
        other => panic!("expected connect event, got {other:?}"),
    }

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    client
        .write_with(vec![0x5a; PAYLOAD], move |result| {
            let _ = done_tx.send(result);
        })
        .expect("write");

    let completion = timeout(Duration::from_secs(30), done_rx)
        .await
        .expect("write never completed")
        .expect("completion dropped");
    completion.expect("write should drain cleanly");

    match next_event(&mut reads).await {
        Event::Read(frame) => assert_eq!(&frame[..], b"done\n"),
        other => panic!("expected read event, got {other:?}"),
    }

    client.destroy().expect("destroy");
}
