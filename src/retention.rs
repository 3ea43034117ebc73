use std::path::Path;
use std::time::Duration;

/// Configuration for whole-segment eviction via
/// [`Topic::cleanup`](crate::Topic::cleanup).
///
/// A sealed segment is evicted once every live subscription has consumed its
/// entire range. `max_age` additionally evicts sealed segments by age,
/// regardless of how far subscriptions have read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionConfig {
    pub max_age: Option<Duration>,
}

/// Whether the segment file at `path` is older than `max_age`.
///
/// Unreadable metadata counts as not expired; eviction stays conservative.
pub(crate) fn age_exceeded(path: &Path, max_age: Option<Duration>) -> bool {
    let Some(max_age) = max_age else {
        return false;
    };
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > max_age)
}
