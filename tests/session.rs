//! Session-level scenarios exercised through real accepted connections:
//! group membership/broadcast and the slow-consumer Drop policy
//! (spec.md §4.7, §4.8, §8).

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use stormsocket::config::TcpServerOptions;
use stormsocket::session::{SendOutcome, SessionLike, TcpSession};
use stormsocket::{SlowConsumerPolicy, TcpClient, TcpClientEvents, TcpServer, TcpServerEvents};

const BASE_PORT: u16 = 19300;

#[tokio::test]
async fn group_broadcast_reaches_only_current_members() {
    let endpoint = common::endpoint(BASE_PORT);

    let mut server = TcpServer::new(TcpServerOptions::new(&endpoint));
    let groups = server.groups().clone();
    server.set_events(TcpServerEvents {
        on_connected: Some(Arc::new(move |session| {
            let as_dyn: Arc<dyn SessionLike> = session;
            groups.add("lobby", as_dyn);
        })),
        ..Default::default()
    });
    let server = Arc::new(server);
    server.clone().start().await.unwrap();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let mut client_a = TcpClient::new(stormsocket::config::TcpClientOptions::new(&endpoint));
    client_a.set_events(TcpClientEvents {
        on_data_received: Some(Arc::new(move |_s, data| {
            let _ = tx_a.send(data);
        })),
        ..Default::default()
    });
    let client_a = Arc::new(client_a);
    client_a.clone().connect().await.unwrap();

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let mut client_b = TcpClient::new(stormsocket::config::TcpClientOptions::new(&endpoint));
    client_b.set_events(TcpClientEvents {
        on_data_received: Some(Arc::new(move |_s, data| {
            let _ = tx_b.send(data);
        })),
        ..Default::default()
    });
    let client_b = Arc::new(client_b);
    client_b.clone().connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.groups().member_count("lobby"), 2);

    server.groups().broadcast("lobby", b"to lobby", None).await;
    assert_eq!(timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap().unwrap(), b"to lobby");
    assert_eq!(timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap().unwrap(), b"to lobby");

    client_a.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.groups().member_count("lobby"), 1);

    client_b.close().await;
    server.stop().await;
}

#[tokio::test]
async fn slow_consumer_drop_policy_drops_sends_under_backpressure() {
    let endpoint = common::endpoint(BASE_PORT);

    let mut options = TcpServerOptions::new(&endpoint);
    options.slow_consumer_policy = SlowConsumerPolicy::Drop;
    options.max_pending_send_bytes = 4096;

    let session_slot: Arc<Mutex<Option<Arc<TcpSession>>>> = Arc::new(Mutex::new(None));
    let slot_for_hook = session_slot.clone();
    let connected = Arc::new(tokio::sync::Notify::new());
    let connected_for_hook = connected.clone();

    let mut server = TcpServer::new(options);
    server.set_events(TcpServerEvents {
        on_connected: Some(Arc::new(move |session| {
            *slot_for_hook.lock().unwrap() = Some(session);
            connected_for_hook.notify_one();
        })),
        ..Default::default()
    });
    let server = Arc::new(server);
    server.clone().start().await.unwrap();

    // A peer that connects but never reads: its OS receive window
    // fills, the write pump's socket write blocks, and the outbound
    // `PressureBuffer` backs up past `max_pending_send_bytes`.
    let _peer = TcpStream::connect(&endpoint).await.unwrap();
    connected.notified().await;

    let session = session_slot.lock().unwrap().clone().unwrap();
    let dropped = Arc::new(AtomicUsize::new(0));
    let payload = vec![7u8; 1024];

    for _ in 0..4000 {
        match session.send(&payload).await {
            Ok(SendOutcome::Dropped) => {
                dropped.fetch_add(1, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    assert!(
        dropped.load(Ordering::SeqCst) > 0,
        "expected at least one send to be dropped once the peer stopped draining the socket"
    );
    assert!(
        session.is_backpressured(),
        "is_backpressured() should reflect the live buffer state once the Drop policy starts firing"
    );

    server.stop().await;
}
