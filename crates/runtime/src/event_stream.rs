//! Broadcast-backed event streams.
//!
//! The transport fans every event out to every client session, so
//! subscriptions are [`broadcast::Receiver`]s under the hood. [`EventStream`]
//! wraps the raw receiver with lag handling and an optional payload filter.
//!
//! [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver

use tokio::sync::broadcast;

/// Ergonomic wrapper around [`broadcast::Receiver`] with automatic lag handling.
///
/// Unlike the raw receiver, [`EventStream`] handles [`RecvError::Lagged`] by
/// logging a warning and continuing to receive. This prevents lag errors from
/// breaking event processing loops.
///
/// A filter predicate can be attached so a subscription only yields one kind
/// of payload even though the underlying channel carries all of a device's
/// events.
///
/// [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver
/// [`RecvError::Lagged`]: tokio::sync::broadcast::error::RecvError::Lagged
pub struct EventStream<E: Clone + Send + 'static> {
    rx: broadcast::Receiver<E>,
    filter: Option<Box<dyn Fn(&E) -> bool + Send + Sync>>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
    /// Creates a new [`EventStream`] wrapping the given broadcast receiver.
    pub fn new(rx: broadcast::Receiver<E>) -> Self {
        Self { rx, filter: None }
    }

    /// Creates a stream that only yields events matching `filter`.
    pub fn filtered(
        rx: broadcast::Receiver<E>,
        filter: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            filter: Some(Box::new(filter)),
        }
    }

    /// Creates a stream that is already closed and yields nothing.
    ///
    /// Used by transports when asked for events of a device they do not know.
    pub fn closed() -> Self {
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        Self { rx, filter: None }
    }

    /// Receives the next matching event, blocking until one is available.
    ///
    /// Returns `Some(event)` on success, or `None` when the channel closes.
    /// Broadcast lag is handled internally by logging and continuing.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "Event stream lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Attempts to receive a matching event without blocking.
    ///
    /// Returns `Some(event)` if one is immediately available, `None` otherwise.
    /// Like [`recv`](Self::recv), broadcast lag is handled internally.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "Event stream lagged, dropped events");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stream_receives_events() {
        let (tx, rx) = broadcast::channel(16);
        let mut stream = EventStream::new(rx);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(42u32);
        });

        assert_eq!(stream.recv().await, Some(42));
    }

    #[tokio::test]
    async fn stream_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel::<u32>(16);
        let mut stream = EventStream::new(rx);
        drop(tx);

        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn filter_skips_non_matching_events() {
        let (tx, rx) = broadcast::channel(16);
        let mut stream = EventStream::filtered(rx, |n: &u32| n % 2 == 0);

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        tx.send(4).unwrap();

        assert_eq!(stream.try_recv(), Some(2));
        assert_eq!(stream.try_recv(), Some(4));
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn closed_stream_yields_nothing() {
        let mut stream: EventStream<u32> = EventStream::closed();
        assert_eq!(stream.recv().await, None);
    }
}
