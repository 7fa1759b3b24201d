//! Raw TCP server/client end-to-end scenarios (spec.md §8).

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use stormsocket::config::{TcpClientOptions, TcpServerOptions};
use stormsocket::framing::LengthPrefixedFramer;
use stormsocket::session::SessionLike;
use stormsocket::{TcpClient, TcpClientEvents, TcpServer, TcpServerEvents};

const BASE_PORT: u16 = 19100;

async fn recv_within(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

#[tokio::test]
async fn echoes_data_back_to_the_sender() {
    let endpoint = common::endpoint(BASE_PORT);

    let mut server = TcpServer::new(TcpServerOptions::new(&endpoint));
    server.set_events(TcpServerEvents {
        on_data_received: Some(Arc::new(|session, data| {
            tokio::spawn(async move {
                let _ = session.send(&data).await;
            });
        })),
        ..Default::default()
    });
    let server = Arc::new(server);
    server.clone().start().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = TcpClient::new(TcpClientOptions::new(&endpoint));
    client.set_events(TcpClientEvents {
        on_data_received: Some(Arc::new(move |_session, data| {
            let _ = tx.send(data);
        })),
        ..Default::default()
    });
    let client = Arc::new(client);
    client.clone().connect().await.unwrap();

    client.send(b"hello storm").await.unwrap();
    assert_eq!(recv_within(&mut rx).await, b"hello storm");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn length_prefixed_framer_preserves_message_boundaries() {
    let endpoint = common::endpoint(BASE_PORT);

    let mut server = TcpServer::new(TcpServerOptions::new(&endpoint));
    server.set_framer(Arc::new(LengthPrefixedFramer));
    server.set_events(TcpServerEvents {
        on_data_received: Some(Arc::new(|session, data| {
            tokio::spawn(async move {
                let _ = session.send(&data).await;
            });
        })),
        ..Default::default()
    });
    let server = Arc::new(server);
    server.clone().start().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = TcpClient::new(TcpClientOptions::new(&endpoint));
    client.set_framer(Arc::new(LengthPrefixedFramer));
    client.set_events(TcpClientEvents {
        on_data_received: Some(Arc::new(move |_session, data| {
            let _ = tx.send(data);
        })),
        ..Default::default()
    });
    let client = Arc::new(client);
    client.clone().connect().await.unwrap();

    client.send(b"first").await.unwrap();
    client.send(b"second").await.unwrap();

    assert_eq!(recv_within(&mut rx).await, b"first");
    assert_eq!(recv_within(&mut rx).await, b"second");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn max_connections_rejects_sockets_past_the_limit() {
    let endpoint = common::endpoint(BASE_PORT);

    let mut options = TcpServerOptions::new(&endpoint);
    options.max_connections = 1;
    let server = Arc::new(TcpServer::new(options));
    server.clone().start().await.unwrap();

    let first = Arc::new(TcpClient::new(TcpClientOptions::new(&endpoint)));
    first.clone().connect().await.unwrap();
    assert_eq!(server.manager().count(), 1);

    // The second raw connection is accepted at the TCP layer (it's in
    // the listen backlog) but dropped before any session is created,
    // so it observes an immediate EOF.
    let mut rejected = TcpStream::connect(&endpoint).await.unwrap();
    let mut buf = [0u8; 8];
    let n = rejected.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
    assert_eq!(server.manager().count(), 1);

    first.close().await;
    server.stop().await;
}

#[tokio::test]
async fn broadcast_excludes_the_given_session() {
    let endpoint = common::endpoint(BASE_PORT);
    let server = Arc::new(TcpServer::new(TcpServerOptions::new(&endpoint)));
    server.clone().start().await.unwrap();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let mut client_a = TcpClient::new(TcpClientOptions::new(&endpoint));
    client_a.set_events(TcpClientEvents {
        on_data_received: Some(Arc::new(move |_s, data| {
            let _ = tx_a.send(data);
        })),
        ..Default::default()
    });
    let client_a = Arc::new(client_a);
    client_a.clone().connect().await.unwrap();

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let mut client_b = TcpClient::new(TcpClientOptions::new(&endpoint));
    client_b.set_events(TcpClientEvents {
        on_data_received: Some(Arc::new(move |_s, data| {
            let _ = tx_b.send(data);
        })),
        ..Default::default()
    });
    let client_b = Arc::new(client_b);
    client_b.clone().connect().await.unwrap();

    // Give both accept-side sessions a moment to register.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.manager().count(), 2);

    // Exclude one of the two accept-side sessions by id (client ids are
    // assigned independently, so the matching server-side session has
    // to be found by its own id, not correlated to the client's).
    let server_sessions = server.manager().snapshot();
    let exclude = server_sessions[0].id();
    server.broadcast(b"announcement", Some(exclude)).await;

    // One of the two clients receives it, the other does not; which
    // one depends on accept order, so just assert exactly one fires.
    let a_result = timeout(Duration::from_millis(300), rx_a.recv()).await;
    let b_result = timeout(Duration::from_millis(300), rx_b.recv()).await;
    let a_got = matches!(a_result, Ok(Some(_)));
    let b_got = matches!(b_result, Ok(Some(_)));
    assert!(a_got != b_got, "exactly one client should receive the broadcast");

    client_a.close().await;
    client_b.close().await;
    server.stop().await;
}
