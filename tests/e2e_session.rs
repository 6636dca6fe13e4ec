//! End-to-end session management tests.
//!
//! These tests verify session loops, the exit token and teardown over real
//! connections.

use std::sync::Arc;
use std::time::Duration;

use sipsock::notifier::{Event, EventKind, Observer};
use sipsock::session::{LoopKind, LoopSettings, SessionState};
use sipsock::transport::{Link, TcpLink};
use sipsock::{Client, ClientConfig, Server, ServerConfig, Session, TransportKind};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;

const GUARD: Duration = Duration::from_secs(5);

async fn tcp_pair() -> (TcpLink, TcpLink) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let near = TcpLink::tcp(client.unwrap()).unwrap();
    let far = TcpLink::tcp(accepted.unwrap().0).unwrap();
    (near, far)
}

/// Observer forwarding every event of `kind` into a channel.
fn forward(kind: EventKind) -> (Arc<Observer>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer = Observer::new()
        .on(kind, move |_, event| {
            let _ = tx.send(event.clone());
        })
        .into_shared();
    (observer, rx)
}

async fn wait_for_sessions(server: &Server, expected: usize) {
    timeout(GUARD, async {
        while server.session_count().await != expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session count never settled");
}

#[tokio::test]
async fn test_loops_fork_join_on_flag_drop() {
    let (near, far) = tcp_pair().await;
    let period = Duration::from_millis(200);
    let settings = LoopSettings::server().with_period(period);

    let session = Arc::new(Session::new(Arc::new(near), settings));
    let (observer, mut closed) = forward(EventKind::CloseSuccess);
    session.register(&observer);
    session.activate().unwrap();
    session.set_loop(LoopKind::Send, true);
    session.set_loop(LoopKind::Recv, true);

    let driver = tokio::spawn(session.clone().run_loops());

    // The send loop fires immediately.
    let first = timeout(GUARD, far.recv(1024)).await.unwrap().unwrap();
    assert!(first.starts_with(b"I am the server"));

    session.set_loop(LoopKind::Send, false);
    session.set_loop(LoopKind::Recv, false);

    let event = timeout(period * 2, closed.recv())
        .await
        .expect("loops did not join within one period")
        .unwrap();
    assert!(matches!(event, Event::CloseSuccess));
    timeout(GUARD, driver).await.unwrap().unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    // The far side sees the shutdown.
    let rest = timeout(GUARD, far.recv(1024)).await.unwrap().unwrap();
    assert!(rest.is_empty() || rest.starts_with(b"I am the server"));
}

#[tokio::test]
async fn test_exit_token_ends_server_session() {
    let config = ServerConfig {
        recv_loop: true,
        send_loop: false,
        ..ServerConfig::new(TransportKind::Tcp, "127.0.0.1", 0)
            .with_loops(LoopSettings::server().with_period(Duration::from_millis(50)))
    };
    let server = Arc::new(Server::new(config).unwrap());
    let local = server.start().await.unwrap();
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    let config = ClientConfig::new(TransportKind::Tcp, "127.0.0.1", local.port());
    let mut client = Client::new(config).unwrap();
    client.connect().await.unwrap();
    wait_for_sessions(&server, 1).await;

    client.send(b"exit\r\n").await.unwrap();
    wait_for_sessions(&server, 0).await;

    client.disconnect().await.unwrap();
    serving.abort();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_peer_close_ends_server_session() {
    let server = Arc::new(Server::new(ServerConfig::new(TransportKind::Tcp, "127.0.0.1", 0)).unwrap());
    let local = server.start().await.unwrap();
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    let mut client =
        Client::new(ClientConfig::new(TransportKind::Tcp, "127.0.0.1", local.port())).unwrap();
    client.connect().await.unwrap();
    wait_for_sessions(&server, 1).await;

    client.disconnect().await.unwrap();
    wait_for_sessions(&server, 0).await;

    serving.abort();
    server.stop().await.unwrap();
}

/// Start `config` on an ephemeral port and serve it in the background.
async fn serving(config: ServerConfig) -> (Arc<Server>, std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let server = Arc::new(Server::new(config.without_logging()).unwrap());
    let local = server.start().await.unwrap();
    let handle = tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.serve().await;
        }
    });
    (server, local, handle)
}

#[tokio::test]
async fn test_exit_datagram_ends_udp_session() {
    let config = ServerConfig {
        send_loop: true,
        ..ServerConfig::new(TransportKind::Udp, "127.0.0.1", 0)
            .with_loops(LoopSettings::server().with_period(Duration::from_millis(50)))
            .with_idle_timeout(None)
    };
    let (server, local, handle) = serving(config).await;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"hello", local).await.unwrap();
    wait_for_sessions(&server, 1).await;
    let session = server.session(&peer.local_addr().unwrap()).await.unwrap();

    // The send loop is running.
    let mut buf = [0u8; 64];
    let (n, _) = timeout(GUARD, peer.recv_from(&mut buf)).await.unwrap().unwrap();
    assert!(buf[..n].starts_with(b"I am the server"));

    peer.send_to(b"exit\r\n", local).await.unwrap();
    wait_for_sessions(&server, 0).await;
    assert_eq!(session.state(), SessionState::Closed);

    handle.abort();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_exit_datagram_without_loops() {
    let config = ServerConfig::new(TransportKind::Udp, "127.0.0.1", 0).with_idle_timeout(None);
    let (server, local, handle) = serving(config).await;

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"OPTIONS sip:127.0.0.1 SIP/2.0", local).await.unwrap();
    wait_for_sessions(&server, 1).await;

    peer.send_to(b"exit", local).await.unwrap();
    wait_for_sessions(&server, 0).await;

    // The same address starts over with a new session.
    peer.send_to(b"again", local).await.unwrap();
    wait_for_sessions(&server, 1).await;

    handle.abort();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_idle_udp_peers_are_evicted() {
    let config = ServerConfig::new(TransportKind::Udp, "127.0.0.1", 0)
        .with_idle_timeout(Some(Duration::from_millis(200)));
    let server = Arc::new(Server::new(config.without_logging()).unwrap());
    let (observer, mut accepted) = forward(EventKind::DidAccept);
    server.register(&observer);
    let local = server.start().await.unwrap();
    let handle = tokio::spawn({
        let server = server.clone();
        async move {
            let _ = server.serve().await;
        }
    });

    let mut peers = Vec::new();
    for _ in 0..5 {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"REGISTER sip:127.0.0.1 SIP/2.0", local).await.unwrap();
        peers.push(peer);
    }
    for _ in 0..5 {
        timeout(GUARD, accepted.recv()).await.unwrap().unwrap();
    }

    wait_for_sessions(&server, 0).await;

    handle.abort();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_tcp_session_without_recv_loop_is_evicted() {
    let config = ServerConfig {
        recv_loop: false,
        ..ServerConfig::new(TransportKind::Tcp, "127.0.0.1", 0)
            .with_idle_timeout(Some(Duration::from_millis(200)))
    };
    let (server, local, handle) = serving(config).await;

    let mut client =
        Client::new(ClientConfig::new(TransportKind::Tcp, "127.0.0.1", local.port())).unwrap();
    client.connect().await.unwrap();
    wait_for_sessions(&server, 1).await;
    wait_for_sessions(&server, 0).await;

    // The eviction closed the connection.
    let rest = timeout(GUARD, client.recv(64)).await.unwrap();
    assert!(rest.is_err());

    handle.abort();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_send_loop_reaches_client() {
    let config = ServerConfig {
        send_loop: true,
        recv_loop: false,
        ..ServerConfig::new(TransportKind::Tcp, "127.0.0.1", 0)
            .with_loops(LoopSettings::server().with_period(Duration::from_millis(100)))
    };
    let server = Arc::new(Server::new(config).unwrap());
    let local = server.start().await.unwrap();
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    let mut client =
        Client::new(ClientConfig::new(TransportKind::Tcp, "127.0.0.1", local.port())).unwrap();
    client.connect().await.unwrap();

    let greeting = timeout(GUARD, client.recv(1024)).await.unwrap().unwrap();
    assert!(greeting.starts_with(b"I am the server"));

    client.disconnect().await.unwrap();
    serving.abort();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_sendrecv_loop_against_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let link = TcpLink::tcp(stream).unwrap();
        loop {
            match link.recv(1024).await {
                Ok(data) if !data.is_empty() => {
                    if link.send(&data).await.is_err() {
                        break;
                    }
                },
                _ => break,
            }
        }
    });

    let config = ClientConfig::new(TransportKind::Tcp, "127.0.0.1", port)
        .with_loops(
            LoopSettings::client()
                .with_message("OPTIONS sip:127.0.0.1 SIP/2.0")
                .with_period(Duration::from_millis(50)),
        )
        .with_loop(LoopKind::SendRecv, true);
    let mut client = Client::new(config).unwrap();
    let (observer, mut received) = forward(EventKind::RecvSuccess);
    client.register(&observer);

    let session = client.connect().await.unwrap();
    let driver = tokio::spawn(session.clone().run_loops());

    for _ in 0..2 {
        let event = timeout(GUARD, received.recv()).await.unwrap().unwrap();
        match event {
            Event::RecvSuccess { message, .. } => {
                assert_eq!(&message[..], b"OPTIONS sip:127.0.0.1 SIP/2.0");
            },
            other => panic!("unexpected event {other:?}"),
        }
    }

    session.set_loop(LoopKind::SendRecv, false);
    timeout(GUARD, driver).await.unwrap().unwrap().unwrap();
    assert!(!session.is_alive());
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_server_run_until_shutdown() {
    let server = Server::new(ServerConfig::new(TransportKind::Udp, "127.0.0.1", 0)).unwrap();
    let (observer, mut events) = forward(EventKind::DidRun);
    server.register(&observer);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let run = server.run(async {
        let _ = stop_rx.await;
    });
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = stop_tx.send(());
    };

    let (result, ()) = tokio::join!(run, trigger);
    result.unwrap();
    assert!(matches!(events.recv().await, Some(Event::DidRun)));
    assert!(server.local_addr().is_none());
}
