//! Cross-thread behaviour of the bounded row channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use rowflow_engine::channel::{ChannelError, RowChannel};
use rowflow_types::{Row, Value};

fn row(v: i64) -> Row {
    Row::new(vec![Value::Integer(v)])
}

fn id(row: &Row) -> i64 {
    row.get(0).and_then(Value::as_i64).unwrap()
}

/// The (C+1)-th push stalls until the consumer pops.
#[test]
fn test_backpressure_stalls_producer_until_pop() {
    const CAPACITY: i64 = 3;
    let channel = Arc::new(RowChannel::new("gen.0 - sink.0", CAPACITY as usize));
    let released = Arc::new(AtomicBool::new(false));

    let producer = {
        let channel = Arc::clone(&channel);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            for i in 0..CAPACITY {
                channel.push(row(i)).unwrap();
            }
            channel.push(row(CAPACITY)).unwrap();
            released.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!released.load(Ordering::SeqCst), "producer must block on a full channel");
    assert_eq!(channel.len(), CAPACITY as usize);

    assert_eq!(channel.pop().map(|r| id(&r)), Some(0));
    producer.join().unwrap();
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(channel.len(), CAPACITY as usize);
}

#[test]
fn test_consumer_sees_every_row_then_exhaustion() {
    let channel = Arc::new(RowChannel::new("a.0 - b.0", 4));
    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            for i in 0..1000 {
                channel.push(row(i)).unwrap();
            }
            channel.mark_done();
        })
    };

    let received: Vec<i64> = std::iter::from_fn(|| channel.pop()).map(|r| id(&r)).collect();
    producer.join().unwrap();
    assert_eq!(received, (0..1000).collect::<Vec<_>>());
    assert!(channel.pop().is_none());

    let stats = channel.stats();
    assert_eq!(stats.rows_in, 1000);
    assert_eq!(stats.rows_out, 1000);
    assert_eq!(stats.buffered, 0);
}

#[test]
fn test_abort_wakes_blocked_producer() {
    let channel = Arc::new(RowChannel::new("a.0 - b.0", 1));
    channel.push(row(0)).unwrap();
    let (tx, rx) = mpsc::channel();
    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || tx.send(channel.push(row(1))).unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(channel.abort(), 1);
    let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("producer must wake up");
    assert!(matches!(outcome, Err(ChannelError::Aborted { .. })));
    producer.join().unwrap();
}

#[test]
fn test_abort_wakes_blocked_consumer() {
    let channel = Arc::new(RowChannel::new("a.0 - b.0", 1));
    let (tx, rx) = mpsc::channel();
    let consumer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || tx.send(channel.pop()).unwrap())
    };

    thread::sleep(Duration::from_millis(50));
    channel.abort();
    let outcome = rx.recv_timeout(Duration::from_secs(5)).expect("consumer must wake up");
    assert!(outcome.is_none());
    consumer.join().unwrap();
}
