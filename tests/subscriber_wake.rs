use std::sync::mpsc;
use std::time::Duration;

use annals::Topic;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(100);

fn channel_subscriber(
    events: mpsc::Sender<(u64, Vec<u8>)>,
) -> impl FnMut(u64, &[u8]) -> annals::Result<()> + Send {
    move |next, payload: &[u8]| {
        events
            .send((next, payload.to_vec()))
            .map_err(|_| annals::Error::Closed)
    }
}

#[test]
fn a_new_subscription_catches_up_and_follows() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");
    topic.write_event(b"test").expect("write first");

    let (events_tx, events) = mpsc::channel();
    topic
        .subscribe(0, channel_subscriber(events_tx))
        .expect("subscribe");

    assert_eq!(
        events.recv_timeout(WAIT).expect("catch-up event"),
        (8, b"test".to_vec())
    );

    let address = topic.write_event(b"test2").expect("write second");
    assert_eq!(address, 8);
    assert_eq!(
        events.recv_timeout(WAIT).expect("live event"),
        (17, b"test2".to_vec())
    );
}

#[test]
fn unsubscribed_consumers_receive_nothing_further() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let (events_tx, events) = mpsc::channel();
    let subscription = topic
        .subscribe(0, channel_subscriber(events_tx))
        .expect("subscribe");
    topic.unsubscribe(subscription);

    topic.write_event(b"test3").expect("write");
    assert!(events.recv_timeout(SETTLE).is_err());
}

#[test]
fn every_record_is_delivered_once_in_order() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let (events_tx, events) = mpsc::channel();
    topic
        .subscribe(0, channel_subscriber(events_tx))
        .expect("subscribe");

    let mut expected = Vec::new();
    for i in 0u8..50 {
        let payload = vec![i; 3];
        let address = topic.write_event(&payload).expect("write");
        expected.push((address + 4 + payload.len() as u64, payload));
    }

    for expectation in expected {
        assert_eq!(events.recv_timeout(WAIT).expect("delivery"), expectation);
    }
    assert!(events.recv_timeout(SETTLE).is_err());
}

#[test]
fn subscription_from_the_middle_skips_earlier_records() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    topic.write_event(b"first").expect("write first");
    let second = topic.write_event(b"second").expect("write second");

    let (events_tx, events) = mpsc::channel();
    topic
        .subscribe(second, channel_subscriber(events_tx))
        .expect("subscribe");

    assert_eq!(
        events.recv_timeout(WAIT).expect("catch-up event").1,
        b"second".to_vec()
    );
    assert!(events.recv_timeout(SETTLE).is_err());
}

#[test]
fn two_subscriptions_receive_the_same_stream() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let (first_tx, first) = mpsc::channel();
    let (second_tx, second) = mpsc::channel();
    topic
        .subscribe(0, channel_subscriber(first_tx))
        .expect("subscribe first");
    topic
        .subscribe(0, channel_subscriber(second_tx))
        .expect("subscribe second");

    topic.write_event(b"test").expect("write");

    assert_eq!(
        first.recv_timeout(WAIT).expect("first consumer"),
        (8, b"test".to_vec())
    );
    assert_eq!(
        second.recv_timeout(WAIT).expect("second consumer"),
        (8, b"test".to_vec())
    );
}

#[test]
fn coalesced_signals_still_deliver_the_whole_backlog() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    // The first delivery parks inside the callback; wake-up signals for
    // writes landing meanwhile coalesce into the single pending slot.
    let (entered_tx, entered) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (events_tx, events) = mpsc::channel();
    let mut first = true;
    topic
        .subscribe(0, move |next: u64, payload: &[u8]| {
            if first {
                first = false;
                entered_tx.send(()).map_err(|_| annals::Error::Closed)?;
                gate_rx.recv().map_err(|_| annals::Error::Closed)?;
            }
            events_tx
                .send((next, payload.to_vec()))
                .map_err(|_| annals::Error::Closed)
        })
        .expect("subscribe");

    topic.write_event(b"one").expect("write one");
    entered.recv_timeout(WAIT).expect("delivery parked");

    topic.write_event(b"two").expect("write two");
    topic.write_event(b"three").expect("write three");
    gate_tx.send(()).expect("open gate");

    // No further writes happen; the pending signal alone must cover the
    // whole backlog.
    assert_eq!(
        events.recv_timeout(WAIT).expect("first event"),
        (7, b"one".to_vec())
    );
    assert_eq!(
        events.recv_timeout(WAIT).expect("second event"),
        (14, b"two".to_vec())
    );
    assert_eq!(
        events.recv_timeout(WAIT).expect("third event"),
        (23, b"three".to_vec())
    );
}

#[test]
fn a_failing_subscriber_is_dropped_without_affecting_peers() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let (healthy_tx, healthy) = mpsc::channel();
    topic
        .subscribe(0, channel_subscriber(healthy_tx))
        .expect("subscribe healthy");
    topic
        .subscribe(0, |_next: u64, _payload: &[u8]| -> annals::Result<()> {
            Err(annals::Error::Closed)
        })
        .expect("subscribe failing");

    topic.write_event(b"test").expect("write first");
    topic.write_event(b"test2").expect("write second");

    assert_eq!(
        healthy.recv_timeout(WAIT).expect("first delivery").1,
        b"test".to_vec()
    );
    assert_eq!(
        healthy.recv_timeout(WAIT).expect("second delivery").1,
        b"test2".to_vec()
    );
}

#[test]
fn close_ends_all_subscriptions() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let (events_tx, events) = mpsc::channel();
    topic
        .subscribe(0, channel_subscriber(events_tx))
        .expect("subscribe");

    topic.write_event(b"test").expect("write");
    assert_eq!(events.recv_timeout(WAIT).expect("delivery").1, b"test");

    topic.close().expect("close");
    // The delivery thread's sender is dropped once it exits.
    assert!(matches!(
        events.recv_timeout(WAIT),
        Err(mpsc::RecvTimeoutError::Disconnected)
    ));
    assert!(matches!(
        topic.subscribe(0, |_: u64, _: &[u8]| -> annals::Result<()> { Ok(()) }),
        Err(annals::Error::Closed)
    ));
}
