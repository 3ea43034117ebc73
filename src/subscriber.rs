use crate::Result;

/// A consumer of topic records.
///
/// Registered through [`Topic::subscribe`](crate::Topic::subscribe); receives
/// every record from its starting address once, in write order, until it is
/// unsubscribed, the topic closes, or it returns an error.
pub trait Subscriber: Send {
    /// Called with the global address immediately after the record and the
    /// record's payload. Returning an error ends the subscription.
    fn on_event(&mut self, next_address: u64, payload: &[u8]) -> Result<()>;
}

impl<F> Subscriber for F
where
    F: FnMut(u64, &[u8]) -> Result<()> + Send,
{
    fn on_event(&mut self, next_address: u64, payload: &[u8]) -> Result<()> {
        self(next_address, payload)
    }
}
