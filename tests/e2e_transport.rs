//! End-to-end transport layer tests.
//!
//! These tests run clients and servers over real loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use sipsock::transport::{TlsSelector, TlsVersion};
use sipsock::{Client, ClientConfig, Server, ServerConfig, SipError, TlsConfig, TransportKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const GUARD: Duration = Duration::from_secs(5);

/// Server on an ephemeral loopback port with every loop disabled.
fn quiet_server(kind: TransportKind) -> Server {
    let config = ServerConfig {
        send_loop: false,
        recv_loop: false,
        ..ServerConfig::new(kind, "127.0.0.1", 0)
    };
    Server::new(config).unwrap()
}

fn client_config(kind: TransportKind, port: u16) -> ClientConfig {
    ClientConfig::new(kind, "127.0.0.1", port)
        .with_timeout(Duration::from_secs(2))
        .with_retry(3, Duration::from_millis(50))
}

#[tokio::test]
async fn test_tcp_client_server_exchange() {
    let server = quiet_server(TransportKind::Tcp);
    let local = server.start().await.unwrap();

    let mut client = Client::new(client_config(TransportKind::Tcp, local.port())).unwrap();
    let (connected, accepted) = tokio::join!(client.connect(), server.accept());
    connected.unwrap();
    let accepted = accepted.unwrap();
    assert!(accepted.fresh);
    assert_eq!(server.session_count().await, 1);

    client.send(b"OPTIONS sip:127.0.0.1 SIP/2.0\r\n\r\n").await.unwrap();
    let request = timeout(GUARD, accepted.session.recv(1024))
        .await
        .expect("server recv timed out")
        .unwrap();
    assert!(request.starts_with(b"OPTIONS"));

    accepted.session.send(b"SIP/2.0 200 OK\r\n\r\n").await.unwrap();
    let reply = timeout(GUARD, client.recv(1024)).await.unwrap().unwrap();
    assert_eq!(&reply[..], b"SIP/2.0 200 OK\r\n\r\n");

    let stats = accepted.session.stats();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.messages_sent, 1);

    client.disconnect().await.unwrap();
    server.stop().await.unwrap();
    assert_eq!(server.session_count().await, 0);
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn test_udp_session_table_idempotence() {
    let server = quiet_server(TransportKind::Udp);
    let local = server.start().await.unwrap();

    let mut alice = Client::new(client_config(TransportKind::Udp, local.port())).unwrap();
    let mut bob = Client::new(client_config(TransportKind::Udp, local.port())).unwrap();
    alice.connect().await.unwrap();
    bob.connect().await.unwrap();

    alice.send(b"one").await.unwrap();
    let first = timeout(GUARD, server.accept()).await.unwrap().unwrap();
    alice.send(b"two").await.unwrap();
    let second = timeout(GUARD, server.accept()).await.unwrap().unwrap();

    assert!(first.fresh);
    assert!(!second.fresh);
    assert!(Arc::ptr_eq(&first.session, &second.session));

    bob.send(b"three").await.unwrap();
    let third = timeout(GUARD, server.accept()).await.unwrap().unwrap();
    assert!(third.fresh);
    assert_ne!(third.session.id(), first.session.id());
    assert_eq!(server.session_count().await, 2);

    // Datagrams were queued in arrival order.
    assert_eq!(&first.session.recv(64).await.unwrap()[..], b"one");
    assert_eq!(&first.session.recv(64).await.unwrap()[..], b"two");

    // Replies travel back through the shared socket.
    third.session.send(b"hi bob").await.unwrap();
    assert_eq!(&timeout(GUARD, bob.recv(64)).await.unwrap().unwrap()[..], b"hi bob");

    alice.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_gives_up_after_max_trials() {
    // Grab a free port, then release it so the connect is refused.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut client = Client::new(client_config(TransportKind::Tcp, port)).unwrap();
    match client.connect().await {
        Err(SipError::Connect { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected connect error, got {other:?}"),
    }
    assert_eq!(client.trial_count(), 3);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_tls_rejected_for_udp() {
    let config = client_config(TransportKind::Udp, 5060).with_tls(TlsConfig::new(TlsSelector::All));
    assert!(matches!(Client::new(config), Err(SipError::Config(_))));
}

fn tls_acceptor() -> tokio_rustls::TlsAcceptor {
    tls_acceptor_for(rustls::ALL_VERSIONS)
}

fn tls_acceptor_for(versions: &[&'static rustls::SupportedProtocolVersion]) -> tokio_rustls::TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let der = cert.serialize_der().unwrap();
    let key = cert.serialize_private_key_der();

    let config = rustls::ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(versions)
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![rustls::Certificate(der)], rustls::PrivateKey(key))
        .unwrap();
    tokio_rustls::TlsAcceptor::from(Arc::new(config))
}

/// Echo one message on the first connection whose handshake succeeds.
async fn tls_echo_after_failures(listener: tokio::net::TcpListener, acceptor: tokio_rustls::TlsAcceptor) -> usize {
    let mut failed = 0;
    loop {
        let (stream, _) = listener.accept().await.unwrap();
        let mut tls = match acceptor.accept(stream).await {
            Ok(tls) => tls,
            Err(_) => {
                failed += 1;
                continue;
            },
        };
        let mut buf = vec![0u8; 1024];
        let n = tls.read(&mut buf).await.unwrap();
        tls.write_all(&buf[..n]).await.unwrap();
        tls.flush().await.unwrap();
        let _ = tls.read(&mut buf).await;
        return failed;
    }
}

async fn tls_echo_once(listener: tokio::net::TcpListener, acceptor: tokio_rustls::TlsAcceptor) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut tls = acceptor.accept(stream).await.unwrap();
    let mut buf = vec![0u8; 1024];
    let n = tls.read(&mut buf).await.unwrap();
    tls.write_all(&buf[..n]).await.unwrap();
    tls.flush().await.unwrap();
    // Wait for the client to hang up.
    let _ = tls.read(&mut buf).await;
}

#[tokio::test]
async fn test_tls_client_round_trip() {
    for selector in [
        TlsSelector::All,
        TlsSelector::Only(TlsVersion::Tls12),
        TlsSelector::Only(TlsVersion::Tls13),
    ] {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let echo = tokio::spawn(tls_echo_once(listener, tls_acceptor()));

        let config = client_config(TransportKind::Tcp, port).with_tls(TlsConfig::new(selector));
        let mut client = Client::new(config).unwrap();
        let session = client.connect().await.unwrap();
        assert_eq!(session.peer_addr().port(), port);

        client.send(b"INVITE sip:bob@localhost SIP/2.0\r\n\r\n").await.unwrap();
        let reply = timeout(GUARD, client.recv(1024)).await.unwrap().unwrap();
        assert!(reply.starts_with(b"INVITE"), "{selector:?}");

        client.disconnect().await.unwrap();
        timeout(GUARD, echo).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_tls_all_falls_back_to_tls12() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let echo = tokio::spawn(tls_echo_after_failures(
        listener,
        tls_acceptor_for(&[&rustls::version::TLS12]),
    ));

    let config = client_config(TransportKind::Tcp, port).with_tls(TlsConfig::new(TlsSelector::All));
    let mut client = Client::new(config).unwrap();
    client.connect().await.unwrap();

    client.send(b"OPTIONS sip:localhost SIP/2.0\r\n\r\n").await.unwrap();
    let reply = timeout(GUARD, client.recv(1024)).await.unwrap().unwrap();
    assert!(reply.starts_with(b"OPTIONS"));

    client.disconnect().await.unwrap();
    // The TLS 1.3 attempt was refused before 1.2 got through.
    let refused = timeout(GUARD, echo).await.unwrap().unwrap();
    assert_eq!(refused, 1);
}

#[tokio::test]
async fn test_tls13_only_against_tls12_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let echo = tokio::spawn(tls_echo_after_failures(
        listener,
        tls_acceptor_for(&[&rustls::version::TLS12]),
    ));

    let config = TlsConfig::new(TlsSelector::Only(TlsVersion::Tls13));
    let result = sipsock::transport::connect_tls("localhost", addr, Duration::from_secs(2), &config).await;
    match result {
        Err(SipError::Tls(reason)) => assert!(reason.contains("handshake"), "{reason}"),
        Err(other) => panic!("expected TLS error, got {other}"),
        Ok(_) => panic!("TLS 1.3 handshake should not succeed"),
    }

    echo.abort();
}

#[tokio::test]
async fn test_tls_handshake_failure_reports_tls_error() {
    // A plain TCP peer that answers the ClientHello with garbage.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(b"SIP/2.0 400 Bad Request\r\n\r\n").await;
        }
    });

    let config = client_config(TransportKind::Tcp, port)
        .with_retry(1, Duration::from_millis(10))
        .with_tls(TlsConfig::new(TlsSelector::All));
    let mut client = Client::new(config).unwrap();
    let err = client.connect().await.unwrap_err();
    assert!(err.to_string().to_lowercase().contains("tls"), "{err}");
}
