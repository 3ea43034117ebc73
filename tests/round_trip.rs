use annals::Topic;
use tempfile::tempdir;

#[test]
fn first_event_lands_at_address_zero() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let address = topic.write_event(b"test").expect("write");
    assert_eq!(address, 0);

    let (payload, next) = topic.read(0).expect("read");
    assert_eq!(payload, b"test");
    assert_eq!(next, 8);
}

#[test]
fn written_events_read_back_verbatim() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let payloads: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i; (i as usize) + 1]).collect();
    let mut written = Vec::new();
    for payload in &payloads {
        written.push(topic.write_event(payload).expect("write"));
    }

    for window in written.windows(2) {
        assert!(window[1] > window[0], "addresses must strictly increase");
    }

    for (address, payload) in written.iter().zip(&payloads) {
        let (read, next) = topic.read(*address).expect("read");
        assert_eq!(&read, payload);
        assert_eq!(next, address + 4 + payload.len() as u64);
    }
}

#[test]
fn full_scan_visits_every_event_in_write_order() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");

    let payloads = [&b"alpha"[..], b"bravo", b"charlie"];
    for payload in payloads {
        topic.write_event(payload).expect("write");
    }

    let mut seen = Vec::new();
    topic
        .read_events(|next, payload| {
            seen.push((next, payload.to_vec()));
            Ok(())
        })
        .expect("read_events");

    assert_eq!(seen.len(), payloads.len());
    for ((_, payload), expected) in seen.iter().zip(payloads) {
        assert_eq!(payload, expected);
    }
    for window in seen.windows(2) {
        assert!(window[1].0 > window[0].0, "positions must strictly increase");
    }
}

#[test]
fn read_at_a_non_record_address_fails() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");
    topic.write_event(b"test").expect("write");

    assert!(matches!(topic.read(8), Err(annals::Error::WrongAddress)));
    assert!(matches!(topic.read(9999), Err(annals::Error::WrongAddress)));
}

#[test]
fn closed_topic_rejects_every_operation() {
    let dir = tempdir().expect("tempdir");
    let topic = Topic::open(dir.path(), 1024).expect("topic open");
    topic.write_event(b"test").expect("write");
    topic.close().expect("close");

    assert!(matches!(
        topic.write_event(b"more"),
        Err(annals::Error::Closed)
    ));
    assert!(matches!(topic.read(0), Err(annals::Error::Closed)));
    assert!(matches!(
        topic.read_events(|_, _| Ok(())),
        Err(annals::Error::Closed)
    ));
    assert!(matches!(topic.close(), Err(annals::Error::Closed)));
}
