//! A durable, growing, byte-addressed event stream rooted at a directory.
//!
//! A topic owns an ordered list of segments covering one contiguous global
//! address space. Appends go to the last segment and roll over to a fresh one
//! when it is full; reads are routed to the segment owning the address. A
//! single broadcaster thread translates watermark advances into coalesced
//! per-subscription wake-up signals, and one delivery thread per subscription
//! walks the log record by record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::limiter::Limiter;
use crate::retention::{age_exceeded, RetentionConfig};
use crate::segment::{discover_segments, segment_path, Segment, LEN_PREFIX_SIZE};
use crate::subscriber::Subscriber;
use crate::{Error, Result};

/// Opaque handle identifying one subscription.
///
/// Every [`Topic::subscribe`] call yields a distinct handle; handles are never
/// reused within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct SubscriberEntry {
    /// Depth-1 doorbell; a pending signal means the end of the log moved.
    /// The delivery thread reads the live watermark when it drains it.
    signal: SyncSender<()>,
    /// Address up to which the delivery thread has consumed the log.
    cursor: Arc<AtomicU64>,
}

struct Segments {
    old: Vec<Arc<Segment>>,
    /// The only segment accepting appends; `None` once the topic is closed.
    current: Option<Arc<Segment>>,
}

struct Shared {
    dir: PathBuf,
    segment_size: u64,
    segments: RwLock<Segments>,
    limiter: Limiter,
    subscribers: Mutex<HashMap<u64, SubscriberEntry>>,
    next_subscription: AtomicU64,
}

/// An embedded, append-only, segmented event log with live subscription.
pub struct Topic {
    shared: Arc<Shared>,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("dir", &self.shared.dir)
            .finish_non_exhaustive()
    }
}

impl Topic {
    /// Opens the topic rooted at `dir`, creating the directory and the first
    /// segment when needed.
    ///
    /// Existing segment files are validated to cover one contiguous address
    /// space; a gap or overlap fails the open.
    pub fn open(dir: impl AsRef<Path>, segment_size: u64) -> Result<Self> {
        if segment_size <= LEN_PREFIX_SIZE {
            return Err(Error::Unsupported("segment size too small"));
        }
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut segments = Vec::new();
        for start in discover_segments(&dir)? {
            let segment = Segment::open(&segment_path(&dir, start), segment_size, start)?;
            segments.push(Arc::new(segment));
        }
        if segments.is_empty() {
            let segment = Segment::open(&segment_path(&dir, 0), segment_size, 0)?;
            segments.push(Arc::new(segment));
        }
        for pair in segments.windows(2) {
            if pair[0].end_address() != pair[1].start_address() {
                return Err(Error::SegmentCorrupted("segments are not contiguous"));
            }
        }

        let current = segments.pop();
        let next_address = current.as_ref().map_or(0, |segment| segment.end_address());

        let shared = Arc::new(Shared {
            dir,
            segment_size,
            segments: RwLock::new(Segments {
                old: segments,
                current,
            }),
            limiter: Limiter::new(next_address),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        });

        let broadcaster = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("annals-broadcast".into())
                .spawn(move || broadcast(shared))?
        };

        Ok(Self {
            shared,
            broadcaster: Mutex::new(Some(broadcaster)),
        })
    }

    /// Appends one event and returns its global address.
    ///
    /// Rolls over to a new segment when the current one cannot hold the
    /// record; rollover is driven purely by capacity.
    pub fn write_event(&self, payload: &[u8]) -> Result<u64> {
        self.shared.write_event(payload)
    }

    /// Reads the record at the global `address`, returning its payload and
    /// the address immediately after it.
    pub fn read(&self, address: u64) -> Result<(Vec<u8>, u64)> {
        self.shared.read(address)
    }

    /// Walks every record in the log in write order, invoking `f` with the
    /// global address immediately after each record and its payload.
    ///
    /// The range is snapshotted up front; records appended during the walk
    /// are not visited. An error from `f` aborts the walk and propagates.
    pub fn read_events<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let (mut address, last) = {
            let segments = self.shared.read_lock()?;
            let current = segments.current.as_ref().ok_or(Error::Closed)?;
            let first = segments
                .old
                .first()
                .map_or(current.start_address(), |segment| segment.start_address());
            (first, current.end_address())
        };
        while address < last {
            let (payload, next) = self.shared.read(address)?;
            f(next, &payload)?;
            address = next;
        }
        Ok(())
    }

    /// Registers `subscriber` to receive every record starting at
    /// `from_address`, which must be a record boundary.
    ///
    /// The subscriber catches up from `from_address` immediately and then
    /// follows the live log. Delivery runs on a dedicated thread; a failing
    /// subscriber is dropped without affecting the topic or its peers.
    pub fn subscribe<S>(&self, from_address: u64, subscriber: S) -> Result<Subscription>
    where
        S: Subscriber + 'static,
    {
        let shared = &self.shared;
        let segments = shared.write_lock()?;
        if segments.current.is_none() {
            return Err(Error::Closed);
        }

        let id = shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (signal, signals) = mpsc::sync_channel(1);
        // Prefill the doorbell so the new subscription wakes immediately and
        // catches up. The channel is fresh, the send cannot fail.
        let _ = signal.try_send(());
        let cursor = Arc::new(AtomicU64::new(from_address));

        shared
            .subscribers
            .lock()
            .map_err(|_| Error::SegmentCorrupted("subscriber registry lock poisoned"))?
            .insert(
                id,
                SubscriberEntry {
                    signal,
                    cursor: Arc::clone(&cursor),
                },
            );

        let worker = Arc::clone(shared);
        let spawned = std::thread::Builder::new()
            .name(format!("annals-delivery-{id}"))
            .spawn(move || deliver(worker, id, from_address, cursor, signals, subscriber));
        if let Err(err) = spawned {
            shared.remove_subscriber(id);
            return Err(err.into());
        }

        drop(segments);
        Ok(Subscription(id))
    }

    /// Removes the subscription. Its delivery thread stops before the next
    /// record and exits; events written after the removal are not delivered.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.shared.remove_subscriber(subscription.0);
    }

    /// Evicts sealed segments per `config`, deleting their files, and returns
    /// the start addresses of the evicted segments.
    ///
    /// Reads into an evicted range fail with [`Error::WrongAddress`]. The
    /// current segment is never evicted, and without live subscriptions only
    /// the age rule applies.
    pub fn cleanup(&self, config: &RetentionConfig) -> Result<Vec<u64>> {
        self.shared.cleanup(config)
    }

    /// Earliest readable global address.
    pub fn first_address(&self) -> Result<u64> {
        let segments = self.shared.read_lock()?;
        let current = segments.current.as_ref().ok_or(Error::Closed)?;
        Ok(segments
            .old
            .first()
            .map_or(current.start_address(), |segment| segment.start_address()))
    }

    /// Global address immediately after the last record.
    pub fn last_address(&self) -> Result<u64> {
        let segments = self.shared.read_lock()?;
        let current = segments.current.as_ref().ok_or(Error::Closed)?;
        Ok(current.end_address())
    }

    /// Flushes the current segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        let segments = self.shared.read_lock()?;
        segments.current.as_ref().ok_or(Error::Closed)?.sync()
    }

    /// Closes the topic: terminates the broadcaster and all delivery threads,
    /// syncs and closes every segment. Terminal; subsequent operations fail
    /// with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        self.shared.close()?;
        let broadcaster = self
            .broadcaster
            .lock()
            .map_err(|_| Error::SegmentCorrupted("broadcaster handle lock poisoned"))?
            .take();
        if let Some(broadcaster) = broadcaster {
            let _ = broadcaster.join();
        }
        Ok(())
    }
}

impl Drop for Topic {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Shared {
    fn write_event(&self, payload: &[u8]) -> Result<u64> {
        let record_len = payload.len() as u64 + LEN_PREFIX_SIZE;
        if record_len > self.segment_size {
            return Err(Error::TooLargeEvent);
        }

        let mut segments = self.write_lock()?;
        let mut current = Arc::clone(segments.current.as_ref().ok_or(Error::Closed)?);
        let (local, local_next) = match current.append(payload) {
            Ok(appended) => appended,
            Err(Error::DataTooLarge) => {
                self.roll_over(&mut segments)?;
                current = Arc::clone(segments.current.as_ref().ok_or(Error::Closed)?);
                current.append(payload)?
            }
            Err(err) => return Err(err),
        };

        self.limiter.update(current.start_address() + local_next);
        Ok(current.start_address() + local)
    }

    /// Seals the current segment and installs a fresh one starting at its
    /// end address. Caller holds the write lock.
    fn roll_over(&self, segments: &mut Segments) -> Result<()> {
        let current = segments.current.as_ref().ok_or(Error::Closed)?;
        current.sync()?;
        let start = current.end_address();
        let segment = Segment::open(&segment_path(&self.dir, start), self.segment_size, start)?;
        debug!("rolled over to segment {}", segment.path().display());
        let sealed = std::mem::replace(&mut segments.current, Some(Arc::new(segment)));
        if let Some(sealed) = sealed {
            segments.old.push(sealed);
        }
        Ok(())
    }

    fn read(&self, address: u64) -> Result<(Vec<u8>, u64)> {
        let segments = self.read_lock()?;
        let current = segments.current.as_ref().ok_or(Error::Closed)?;
        let segment = if current.contains(address) {
            current
        } else {
            // Segments are few; a linear probe is enough.
            segments
                .old
                .iter()
                .find(|segment| segment.contains(address))
                .ok_or(Error::WrongAddress)?
        };
        let (payload, local_next) = segment.read(address - segment.start_address())?;
        Ok((payload.to_vec(), segment.start_address() + local_next))
    }

    fn cleanup(&self, config: &RetentionConfig) -> Result<Vec<u64>> {
        let mut evicted = Vec::new();
        {
            let mut segments = self.write_lock()?;
            if segments.current.is_none() {
                return Err(Error::Closed);
            }
            let min_consumed = {
                let subscribers = self
                    .subscribers
                    .lock()
                    .map_err(|_| Error::SegmentCorrupted("subscriber registry lock poisoned"))?;
                subscribers
                    .values()
                    .map(|entry| entry.cursor.load(Ordering::Acquire))
                    .min()
            };
            segments.old.retain(|segment| {
                let consumed =
                    min_consumed.is_some_and(|consumed| segment.end_address() <= consumed);
                if consumed || age_exceeded(segment.path(), config.max_age) {
                    evicted.push(Arc::clone(segment));
                    false
                } else {
                    true
                }
            });
        }

        let mut starts = Vec::with_capacity(evicted.len());
        for segment in evicted {
            let start = segment.start_address();
            let path = segment.path().to_path_buf();
            drop(segment);
            std::fs::remove_file(&path)?;
            debug!("evicted segment {}", path.display());
            starts.push(start);
        }
        starts.sort_unstable();
        Ok(starts)
    }

    fn close(&self) -> Result<()> {
        let (old, current) = {
            let mut segments = self.write_lock()?;
            let current = segments.current.take().ok_or(Error::Closed)?;
            (std::mem::take(&mut segments.old), current)
        };
        self.limiter.close();
        let synced = current.sync();
        drop(old);
        drop(current);
        synced
    }

    fn remove_subscriber(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id);
        }
    }

    fn is_subscribed(&self, id: u64) -> bool {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.contains_key(&id))
            .unwrap_or(false)
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, Segments>> {
        self.segments
            .read()
            .map_err(|_| Error::SegmentCorrupted("topic lock poisoned"))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, Segments>> {
        self.segments
            .write()
            .map_err(|_| Error::SegmentCorrupted("topic lock poisoned"))
    }
}

/// Fans watermark advances out to every subscription.
///
/// Signals are coalesced per subscription: a full depth-1 doorbell already
/// guarantees a wake-up, and the delivery thread reads the live watermark
/// when it drains it, so a dropped send never hides an advance.
fn broadcast(shared: Arc<Shared>) {
    let mut last = 0;
    loop {
        let target = match shared.limiter.wait_greater_than(last) {
            Ok(value) => value,
            Err(_) => break,
        };
        last = target;
        if let Ok(subscribers) = shared.subscribers.lock() {
            for entry in subscribers.values() {
                let _ = entry.signal.try_send(());
            }
        }
    }
    // Dropping the senders lets every delivery thread finish its pending
    // signal and exit.
    if let Ok(mut subscribers) = shared.subscribers.lock() {
        subscribers.clear();
    }
    debug!("broadcaster exited");
}

/// Delivers records to one subscriber, one record at a time.
///
/// Wake-up signals may be coalesced but records are never skipped: every
/// wake-up drains up to the live watermark, and the cursor only ever advances
/// to the address after the record just delivered.
fn deliver<S: Subscriber>(
    shared: Arc<Shared>,
    id: u64,
    from_address: u64,
    cursor: Arc<AtomicU64>,
    signals: Receiver<()>,
    mut subscriber: S,
) {
    let mut address = from_address;
    while signals.recv().is_ok() {
        // The watermark can move again between the broadcaster's send and
        // this wake-up; reading it live means a coalesced signal still
        // covers the whole backlog.
        let target = shared.limiter.current();
        while address < target {
            if !shared.is_subscribed(id) {
                debug!("subscription {id}: removed, delivery exiting");
                return;
            }
            let (payload, next) = match shared.read(address) {
                Ok(read) => read,
                Err(err) => {
                    debug!("subscription {id}: delivery stopped: {err}");
                    shared.remove_subscriber(id);
                    return;
                }
            };
            if let Err(err) = subscriber.on_event(next, &payload) {
                warn!("subscription {id}: subscriber failed, unsubscribing: {err}");
                shared.remove_subscriber(id);
                return;
            }
            address = next;
            cursor.store(next, Ordering::Release);
        }
    }
    debug!("subscription {id}: signal channel closed");
}
