//! Ingress -> batch writer -> store -> change notifier -> broadcast hub,
//! wired the way the binary wires them.

use chat_relay_service::{
    config::{BatchConfig, NotifierConfig},
    services::{BatchWriter, ChangeNotifier},
    store::MemoryStore,
    websocket::{BroadcastEvent, ConnectionRegistry},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

struct Pipeline {
    store: Arc<MemoryStore>,
    writer: BatchWriter,
    registry: ConnectionRegistry,
    notifier: ChangeNotifier,
}

fn pipeline() -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let registry = ConnectionRegistry::new();
    let writer = BatchWriter::new(
        store.clone(),
        BatchConfig {
            flush_interval: Duration::from_secs(60),
            ..BatchConfig::default()
        },
    )
    .expect("runtime available");
    let notifier = ChangeNotifier::new(
        store.clone(),
        Arc::new(registry.clone()),
        NotifierConfig::default(),
    );

    Pipeline {
        store,
        writer,
        registry,
        notifier,
    }
}

fn drain(rx: &mut Receiver<String>) -> Vec<String> {
    let mut contents = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        match BroadcastEvent::decode(&frame).expect("valid frame") {
            Some(BroadcastEvent::NewMessage(message)) => contents.push(message.content),
            None => panic!("unexpected event type in {frame}"),
        }
    }
    contents
}

#[tokio::test]
async fn every_subscriber_gets_each_message_exactly_once() {
    let mut p = pipeline();
    let (_a, mut rx_a) = p.registry.add_subscriber().await;
    let (_b, mut rx_b) = p.registry.add_subscriber().await;

    p.notifier.seed().await.unwrap();

    p.writer.enqueue("hello").unwrap();
    p.writer.flush_now().await.unwrap();

    assert_eq!(p.notifier.poll_once().await.unwrap(), 1);
    assert_eq!(p.notifier.poll_once().await.unwrap(), 0);

    assert_eq!(drain(&mut rx_a), ["hello"]);
    assert_eq!(drain(&mut rx_b), ["hello"]);
}

#[tokio::test]
async fn wire_frame_carries_type_and_payload() {
    let mut p = pipeline();
    let (_id, mut rx) = p.registry.add_subscriber().await;
    p.notifier.seed().await.unwrap();

    p.writer.enqueue("hi").unwrap();
    p.writer.flush_now().await.unwrap();
    p.notifier.poll_once().await.unwrap();

    let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(frame["type"], "NEW_MESSAGE");
    assert_eq!(frame["payload"]["content"], "hi");
    assert_eq!(frame["payload"]["_id"], "1");
    assert!(frame["payload"]["createdAt"].is_string());
}

#[tokio::test]
async fn events_follow_insertion_order_across_batches() {
    let mut p = pipeline();
    let (_id, mut rx) = p.registry.add_subscriber().await;
    p.notifier.seed().await.unwrap();

    for content in ["m1", "m2", "m3"] {
        p.writer.enqueue(content).unwrap();
    }
    p.writer.flush_now().await.unwrap();
    p.writer.enqueue("m4").unwrap();
    p.writer.flush_now().await.unwrap();

    assert_eq!(p.notifier.poll_once().await.unwrap(), 4);
    assert_eq!(drain(&mut rx), ["m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn closed_connection_does_not_block_the_others() {
    let mut p = pipeline();
    let (_live, mut rx_live) = p.registry.add_subscriber().await;
    let (_gone, rx_gone) = p.registry.add_subscriber().await;
    drop(rx_gone);
    p.notifier.seed().await.unwrap();

    p.writer.enqueue("still delivered").unwrap();
    p.writer.flush_now().await.unwrap();
    p.notifier.poll_once().await.unwrap();

    assert_eq!(drain(&mut rx_live), ["still delivered"]);
    assert_eq!(p.registry.subscriber_count().await, 1);
}

#[tokio::test]
async fn failed_insert_is_broadcast_only_after_retry_succeeds() {
    let mut p = pipeline();
    let (_id, mut rx) = p.registry.add_subscriber().await;
    p.notifier.seed().await.unwrap();

    p.store.fail_inserts(1);
    p.writer.enqueue("eventually").unwrap();
    assert!(p.writer.flush_now().await.is_err());

    p.notifier.poll_once().await.unwrap();
    assert!(drain(&mut rx).is_empty());

    p.writer.flush_now().await.unwrap();
    p.notifier.poll_once().await.unwrap();
    assert_eq!(drain(&mut rx), ["eventually"]);
}

#[tokio::test(start_paused = true)]
async fn message_flushed_while_store_reads_fail_is_still_broadcast() {
    let mut p = pipeline();
    let (_id, mut rx) = p.registry.add_subscriber().await;

    // high-water mark established on the second attempt
    p.store.fail_queries(1);
    p.notifier.seed_with_retry(3).await.unwrap();

    p.store.fail_queries(1);
    assert!(p.notifier.poll_once().await.is_err());

    p.writer.enqueue("posted while reads were failing").unwrap();
    p.writer.flush_now().await.unwrap();

    let emitted = [
        p.notifier.poll_once().await.unwrap(),
        p.notifier.poll_once().await.unwrap(),
    ];
    assert_eq!(emitted, [1, 0]);
    assert_eq!(drain(&mut rx), ["posted while reads were failing"]);
    assert_eq!(p.store.len().await, 1);
}

#[tokio::test]
async fn subscriber_joining_late_misses_earlier_events() {
    let mut p = pipeline();
    p.notifier.seed().await.unwrap();

    p.writer.enqueue("early").unwrap();
    p.writer.flush_now().await.unwrap();
    p.notifier.poll_once().await.unwrap();

    let (_late, mut rx) = p.registry.add_subscriber().await;
    p.writer.enqueue("late").unwrap();
    p.writer.flush_now().await.unwrap();
    p.notifier.poll_once().await.unwrap();

    assert_eq!(drain(&mut rx), ["late"]);
    assert_eq!(p.store.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn background_tasks_deliver_without_manual_ticks() {
    let p = pipeline();
    let (_id, mut rx) = p.registry.add_subscriber().await;
    let writer = BatchWriter::new(p.store.clone(), BatchConfig::default()).unwrap();
    let mut notifier = p.notifier;
    notifier.seed().await.unwrap();
    let (shutdown, handle) = notifier.spawn();

    tokio::time::sleep(Duration::from_millis(10)).await;

    writer.enqueue("timed").unwrap();
    // debounce flush at +1s, next poll tick at +2s
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(drain(&mut rx), ["timed"]);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}
