use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublisherState {
    /// Constructed, no producer task yet.
    Created,
    Running,
    /// Terminal. Reached by `stop`, `disconnect(0)` or the producer ending on its own.
    Stopped,
}

/// A source of values for one RTD topic.
///
/// The manager tracks subscribers and only tells the publisher how many
/// there are. Implementations must not call back into the manager while
/// holding their own locks.
pub trait RtdPublisher: Send + Sync {
    /// Called when the subscriber count grows. Starts the producer on the
    /// first call with `num_subscribers > 0`.
    fn connect(&self, num_subscribers: usize);

    /// Called when the subscriber count shrinks. Returns true when the
    /// publisher stopped and may be dropped.
    fn disconnect(&self, num_subscribers: usize) -> bool;

    /// Cancel the producer. Idempotent.
    fn stop(&self);

    /// True once no producer task is still running.
    fn done(&self) -> bool;

    fn topic(&self) -> &str;

    fn state(&self) -> PublisherState;
}
