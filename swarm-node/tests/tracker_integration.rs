//! Tracker over real localhost sockets: join broadcasts, leave, duplicate joins, liveness
//! eviction and shutdown.

use std::sync::Arc;
use std::time::Duration;

use swarm_core::protocol::{self, PeerAddr, PeerRecord};
use swarm_node::transport::{self, FrameReader};
use swarm_node::Tracker;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

const STEP: Duration = Duration::from_secs(5);

struct Client {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn join(tracker: &str, join: &str) -> Self {
        let stream = TcpStream::connect(tracker).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        transport::send_frame(&mut writer, join.as_bytes()).await.unwrap();
        Self {
            reader: FrameReader::new(reader),
            writer,
        }
    }

    async fn next(&mut self) -> Option<Vec<u8>> {
        timeout(STEP, self.reader.next_frame())
            .await
            .expect("tracker went quiet")
            .ok()
            .flatten()
    }

    async fn next_registry(&mut self) -> Vec<PeerRecord> {
        let payload = self.next().await.expect("connection closed");
        protocol::decode_broadcast(&payload).unwrap()
    }

    async fn send(&mut self, payload: &[u8]) {
        transport::send_frame(&mut self.writer, payload).await.unwrap();
    }
}

fn record(port: u16, files: u64) -> PeerRecord {
    PeerRecord::new(PeerAddr::new("127.0.0.1", port).unwrap(), files)
}

async fn start(idle: Duration) -> (Arc<Tracker>, String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let tracker = Tracker::new(idle);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(tracker.clone().run(listener, async move {
        let _ = stop_rx.await;
    }));
    (tracker, addr, stop_tx)
}

#[tokio::test]
async fn join_and_leave_are_broadcast_in_order() {
    let (tracker, addr, _stop) = start(Duration::from_secs(60)).await;

    let mut a = Client::join(&addr, "127.0.0.1,5001,2").await;
    assert_eq!(a.next_registry().await, vec![record(5001, 2)]);

    let mut b = Client::join(&addr, "127.0.0.1,5002").await;
    let both = vec![record(5001, 2), record(5002, 0)];
    assert_eq!(a.next_registry().await, both);
    assert_eq!(b.next_registry().await, both);

    b.send(b"CLOSE").await;
    assert_eq!(a.next_registry().await, vec![record(5001, 2)]);
    assert_eq!(b.next().await, None);
    assert_eq!(tracker.snapshot().await, vec![record(5001, 2)]);
}

#[tokio::test]
async fn disconnect_without_close_is_removed() {
    let (tracker, addr, _stop) = start(Duration::from_secs(60)).await;

    let mut a = Client::join(&addr, "127.0.0.1,5101,0").await;
    a.next_registry().await;
    let mut b = Client::join(&addr, "127.0.0.1,5102,1").await;
    a.next_registry().await;
    b.next_registry().await;

    drop(b);
    assert_eq!(a.next_registry().await, vec![record(5101, 0)]);
    assert_eq!(tracker.snapshot().await.len(), 1);
}

#[tokio::test]
async fn duplicate_address_is_rejected() {
    let (tracker, addr, _stop) = start(Duration::from_secs(60)).await;

    let mut first = Client::join(&addr, "127.0.0.1,5201,3").await;
    assert_eq!(first.next_registry().await, vec![record(5201, 3)]);

    let mut second = Client::join(&addr, "127.0.0.1,5201,9").await;
    assert_eq!(second.next().await, None);
    assert_eq!(first.next_registry().await, vec![record(5201, 3)]);
    assert_eq!(tracker.snapshot().await, vec![record(5201, 3)]);
}

#[tokio::test]
async fn malformed_join_is_dropped() {
    let (tracker, addr, _stop) = start(Duration::from_secs(60)).await;

    let mut bad = Client::join(&addr, "not a join").await;
    assert_eq!(bad.next().await, None);
    assert!(tracker.snapshot().await.is_empty());
}

#[tokio::test]
async fn silent_peer_is_evicted_and_responsive_peer_kept() {
    let (tracker, addr, _stop) = start(Duration::from_millis(200)).await;

    let mut live = Client::join(&addr, "127.0.0.1,5301,0").await;
    assert_eq!(live.next_registry().await, vec![record(5301, 0)]);
    let _silent = Client::join(&addr, "127.0.0.1,5302,0").await;

    let mut saw_both = false;
    let mut pings = 0;
    loop {
        let payload = live.next().await.expect("tracker dropped the live peer");
        if payload == b"PING" {
            pings += 1;
            live.send(b"PONG").await;
            continue;
        }
        let registry = protocol::decode_broadcast(&payload).unwrap();
        if registry.len() == 2 {
            saw_both = true;
        } else if saw_both && registry == vec![record(5301, 0)] {
            break;
        }
    }
    assert!(pings >= 1);

    // Still answering, so still registered after a few more idle windows.
    for _ in 0..3 {
        let payload = live.next().await.expect("tracker dropped the live peer");
        assert_eq!(payload, b"PING");
        live.send(b"PONG").await;
    }
    assert_eq!(tracker.snapshot().await, vec![record(5301, 0)]);
}

#[tokio::test]
async fn wrong_probe_reply_evicts() {
    let (tracker, addr, _stop) = start(Duration::from_millis(150)).await;

    let mut peer = Client::join(&addr, "127.0.0.1,5401,0").await;
    peer.next_registry().await;
    assert_eq!(peer.next().await.as_deref(), Some(&b"PING"[..]));
    peer.send(b"PANG").await;
    assert_eq!(peer.next().await, None);
    assert!(tracker.snapshot().await.is_empty());
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let (tracker, addr, stop) = start(Duration::from_secs(60)).await;

    let mut a = Client::join(&addr, "127.0.0.1,5501,0").await;
    a.next_registry().await;
    stop.send(()).unwrap();

    while a.next().await.is_some() {}
    assert!(tracker.snapshot().await.is_empty());
}
