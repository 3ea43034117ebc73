//! Embedded, append-only, segmented event log with live subscription.
//!
//! A [`Topic`] persists opaque byte payloads into length-prefixed segment
//! files under one directory, assigns each record a monotonic global byte
//! address, and fans every append out to any number of live subscribers.
//! Records survive restart and are served from read-only memory maps.

pub mod error;
pub mod event;
pub mod limiter;
pub mod mmap;
pub mod retention;
pub mod segment;
pub mod subscriber;
pub mod topic;

pub use error::{Error, Result};
pub use event::Event;
pub use limiter::Limiter;
pub use retention::RetentionConfig;
pub use segment::Segment;
pub use subscriber::Subscriber;
pub use topic::{Subscription, Topic};
