//! End-to-end transfers over loopback between two nodes in one process.

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdListener};
use std::path::Path;
use std::time::Duration;

use lanshare_core::{
    encode_header, Direction, TransferError, TransferEvent, TransferHeader, TransferOutcome,
};
use lanshare_node::{Config, EventReceiver, Node, NodeError, NodeEvent};
use rand::RngCore;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn config(download_dir: &Path) -> Config {
    Config {
        discovery_port: 0,
        transfer_port: 0,
        download_dir: download_dir.to_path_buf(),
        connect_timeout_ms: 2000,
        ..Config::default()
    }
}

fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
}

/// Collect transfer events until the first terminal one.
async fn until_finished(rx: &mut EventReceiver) -> (Vec<TransferEvent>, TransferOutcome) {
    let mut seen = Vec::new();
    loop {
        let ev = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        if let NodeEvent::Transfer(t) = ev {
            if let TransferEvent::Finished { outcome, .. } = &t {
                let outcome = outcome.clone();
                seen.push(t);
                return (seen, outcome);
            }
            seen.push(t);
        }
    }
}

fn progress_count(events: &[TransferEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TransferEvent::Progress { .. }))
        .count()
}

async fn roundtrip(size: usize) {
    let inbox = TempDir::new().unwrap();
    let outbox = TempDir::new().unwrap();
    let mut payload = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut payload);
    let src = outbox.path().join("report.bin");
    std::fs::write(&src, &payload).unwrap();

    let (receiver, mut rx_events) = Node::new(config(inbox.path()));
    let addr = loopback(receiver.start_acceptor().await.unwrap());
    let (sender, mut tx_events) = Node::new(config(outbox.path()));

    let handle = sender.send_file_to(addr, &src).await.unwrap();
    let (sent_events, sent) = until_finished(&mut tx_events).await;
    let (recv_events, received) = until_finished(&mut rx_events).await;
    assert_eq!(handle.wait().await, sent);

    assert!(sent.success, "send failed: {:?}", sent.error);
    assert!(received.success, "receive failed: {:?}", received.error);
    assert_eq!(sent.bytes_transferred, size as u64);
    assert_eq!(received.bytes_transferred, size as u64);
    assert_eq!(sent.sha256, received.sha256);

    let saved = inbox.path().join("report.bin");
    assert_eq!(received.saved_path.as_deref(), Some(saved.as_path()));
    assert_eq!(std::fs::read(&saved).unwrap(), payload);

    assert!(matches!(
        sent_events.first(),
        Some(TransferEvent::Started { total_bytes, .. }) if *total_bytes == size as u64
    ));
    assert!(matches!(
        recv_events.first(),
        Some(TransferEvent::Started { file_name, .. }) if file_name == "report.bin"
    ));
    // One progress event per 4096-byte chunk on the sending side.
    assert_eq!(progress_count(&sent_events), size.div_ceil(4096));
    if let Some(TransferEvent::Progress { percent, .. }) = recv_events
        .iter()
        .rev()
        .find(|e| matches!(e, TransferEvent::Progress { .. }))
    {
        assert_eq!(*percent, 100);
    }

    let sent_history = sender.transfer_history().await;
    assert_eq!(sent_history.len(), 1);
    assert_eq!(sent_history[0].direction, Direction::Outbound);
    let recv_history = receiver.transfer_history().await;
    assert_eq!(recv_history.len(), 1);
    assert_eq!(recv_history[0].direction, Direction::Inbound);
    assert_eq!(recv_history[0].bytes, size as u64);
    assert_eq!(recv_history[0].path, saved);

    assert!(sender.outbound_progress().await.is_none());
}

#[tokio::test]
async fn empty_file_transfers() {
    roundtrip(0).await;
}

#[tokio::test]
async fn ten_thousand_bytes_transfer() {
    roundtrip(10_000).await;
}

#[tokio::test]
async fn larger_file_transfers() {
    roundtrip(100_000).await;
}

#[tokio::test]
async fn refused_connection_is_one_failure_without_progress() {
    let outbox = TempDir::new().unwrap();
    let src = outbox.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();

    // Grab a free port, then close it so nothing listens there.
    let port = StdListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let (sender, mut events) = Node::new(config(outbox.path()));
    let handle = sender
        .send_file_to(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), &src)
        .await
        .unwrap();
    let (seen, outcome) = until_finished(&mut events).await;

    assert!(!outcome.success);
    assert!(matches!(outcome.error, Some(TransferError::Connect { .. })));
    assert_eq!(progress_count(&seen), 0);
    assert_eq!(seen.len(), 1);
    assert!(!handle.wait().await.success);
    assert!(sender.transfer_history().await.is_empty());
}

#[tokio::test]
async fn missing_source_file_fails_to_open() {
    let outbox = TempDir::new().unwrap();
    let (sender, mut events) = Node::new(config(outbox.path()));
    sender
        .send_file_to(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 9)),
            outbox.path().join("nope.bin"),
        )
        .await
        .unwrap();
    let (seen, outcome) = until_finished(&mut events).await;
    assert!(matches!(outcome.error, Some(TransferError::FileOpen { .. })));
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn directory_source_fails_to_open_without_connecting() {
    let outbox = TempDir::new().unwrap();
    let dir = outbox.path().join("somedir");
    std::fs::create_dir(&dir).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sender, mut events) = Node::new(config(outbox.path()));
    sender.send_file_to(addr, &dir).await.unwrap();
    let (seen, outcome) = until_finished(&mut events).await;

    assert!(matches!(outcome.error, Some(TransferError::FileOpen { .. })));
    assert_eq!(outcome.bytes_transferred, 0);
    assert_eq!(seen.len(), 1);
    // Nothing reached the peer.
    assert!(timeout(Duration::from_millis(200), listener.accept())
        .await
        .is_err());
}

#[tokio::test]
async fn unanswered_connect_times_out_without_progress() {
    let outbox = TempDir::new().unwrap();
    let src = outbox.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();

    let mut cfg = config(outbox.path());
    cfg.connect_timeout_ms = 300;
    let (sender, mut events) = Node::new(cfg);
    sender
        .send_file_to(SocketAddr::from(([10, 255, 255, 1], 8888)), &src)
        .await
        .unwrap();
    let (seen, outcome) = until_finished(&mut events).await;

    match outcome.error {
        Some(TransferError::ConnectTimeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 300),
        // Hosts without any route fail the connect immediately instead.
        Some(TransferError::Connect { .. }) => {}
        other => panic!("unexpected outcome error: {:?}", other),
    }
    assert_eq!(progress_count(&seen), 0);
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn missing_download_dir_fails_to_create_file() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("not-there");
    let (receiver, mut events) = Node::new(config(&missing));
    let addr = loopback(receiver.start_acceptor().await.unwrap());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&encode_header(&TransferHeader::new(3, "a.txt")).unwrap())
        .await
        .unwrap();
    stream.write_all(b"abc").await.unwrap();

    let (seen, outcome) = until_finished(&mut events).await;
    assert!(matches!(outcome.error, Some(TransferError::FileCreate { .. })));
    assert_eq!(outcome.bytes_transferred, 0);
    // The header decoded but no file was opened, so no Started.
    assert_eq!(seen.len(), 1);
    assert!(!missing.exists());
    assert!(receiver.transfer_history().await.is_empty());
}

#[tokio::test]
async fn second_send_while_busy_is_rejected() {
    let outbox = TempDir::new().unwrap();
    let src = outbox.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();

    // A listener that accepts but never reads keeps the first send in flight long enough.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sender, mut events) = Node::new(config(outbox.path()));
    let first = sender.send_file_to(addr, &src).await.unwrap();
    assert!(matches!(
        sender.send_file_to(addr, &src).await,
        Err(NodeError::Busy)
    ));

    let (_conn, _) = listener.accept().await.unwrap();
    let (_, outcome) = until_finished(&mut events).await;
    assert!(outcome.success);
    assert_eq!(first.wait().await, outcome);

    // Slot is free again once the terminal event is out.
    let again = sender.send_file_to(addr, &src).await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn sender_closing_mid_body_is_short_transfer() {
    let inbox = TempDir::new().unwrap();
    let (receiver, mut events) = Node::new(config(inbox.path()));
    let addr = loopback(receiver.start_acceptor().await.unwrap());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let header = encode_header(&TransferHeader::new(100, "partial.dat")).unwrap();
    stream.write_all(&header).await.unwrap();
    stream.write_all(&[7u8; 40]).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let (seen, outcome) = until_finished(&mut events).await;
    assert!(!outcome.success);
    assert_eq!(
        outcome.error,
        Some(TransferError::ShortTransfer {
            transferred: 40,
            expected: 100
        })
    );
    assert_eq!(outcome.bytes_transferred, 40);
    // The partial file is flushed before the failure is reported.
    let partial = outcome.saved_path.clone().unwrap();
    assert_eq!(std::fs::metadata(&partial).unwrap().len(), 40);
    assert!(matches!(seen.first(), Some(TransferEvent::Started { .. })));
    assert!(receiver.transfer_history().await.is_empty());
}

#[tokio::test]
async fn malformed_header_fails_the_connection() {
    let inbox = TempDir::new().unwrap();
    let (receiver, mut events) = Node::new(config(inbox.path()));
    let addr = loopback(receiver.start_acceptor().await.unwrap());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut bad = 5u64.to_be_bytes().to_vec();
    bad.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    stream.write_all(&bad).await.unwrap();

    let (seen, outcome) = until_finished(&mut events).await;
    assert!(matches!(
        outcome.error,
        Some(TransferError::MalformedHeader { .. })
    ));
    // No header, so no Started.
    assert_eq!(seen.len(), 1);
}

#[tokio::test]
async fn new_connection_supersedes_unfinished_one() {
    let inbox = TempDir::new().unwrap();
    let (receiver, mut events) = Node::new(config(inbox.path()));
    let addr = loopback(receiver.start_acceptor().await.unwrap());

    let mut first = TcpStream::connect(addr).await.unwrap();
    first
        .write_all(&encode_header(&TransferHeader::new(1000, "old.bin")).unwrap())
        .await
        .unwrap();
    first.write_all(&[1u8; 10]).await.unwrap();

    // Wait until the first transfer is underway before connecting again.
    loop {
        let ev = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if let NodeEvent::Transfer(TransferEvent::Progress { .. }) = ev {
            break;
        }
    }
    let first_id = receiver.inbound_progress().await.map(|(id, _)| id).unwrap();

    let mut second = TcpStream::connect(addr).await.unwrap();
    second
        .write_all(&encode_header(&TransferHeader::new(3, "new.bin")).unwrap())
        .await
        .unwrap();
    second.write_all(b"abc").await.unwrap();

    let (_, old_outcome) = until_finished(&mut events).await;
    assert_eq!(old_outcome.error, Some(TransferError::Superseded));
    assert_eq!(old_outcome.bytes_transferred, 10);

    let (seen, new_outcome) = until_finished(&mut events).await;
    assert!(new_outcome.success);
    assert!(seen.iter().all(|e| e.id() != first_id));
    assert_eq!(std::fs::read(inbox.path().join("new.bin")).unwrap(), b"abc");
    drop(first);
}

#[tokio::test]
async fn path_in_header_is_reduced_to_base_name() {
    let inbox = TempDir::new().unwrap();
    let (receiver, mut events) = Node::new(config(inbox.path()));
    let addr = loopback(receiver.start_acceptor().await.unwrap());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&encode_header(&TransferHeader::new(2, "../../etc/evil.txt")).unwrap())
        .await
        .unwrap();
    stream.write_all(b"ok").await.unwrap();

    let (_, outcome) = until_finished(&mut events).await;
    assert!(outcome.success);
    let saved = inbox.path().join("evil.txt");
    assert_eq!(outcome.saved_path.as_deref(), Some(saved.as_path()));
    assert_eq!(std::fs::read(saved).unwrap(), b"ok");
}
