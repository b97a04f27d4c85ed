//! Generic publish/subscribe broker.
//!
//! Each service that wants to announce state changes (permission requests,
//! history rows) owns a `Broker<T>` for its payload type. The broker sits on
//! top of `tokio::sync::broadcast`, which gives the delivery guarantees the
//! rest of the core depends on:
//!
//! - `publish` never waits on a subscriber.
//! - Each subscriber sees events in the broker's publish order.
//! - A subscriber that falls more than [`SUBSCRIBER_BUFFER`] events behind
//!   loses the oldest ones; fast subscribers are unaffected.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-subscriber buffer depth.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// What happened to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// A typed event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<T> {
    pub kind: EventKind,
    pub payload: T,
}

/// A broadcast-based event broker, generic over the payload.
pub struct Broker<T> {
    sender: Arc<broadcast::Sender<Event<T>>>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T: Clone + Send + 'static> Broker<T> {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Enqueue an event for every live subscriber.
    pub fn publish(&self, kind: EventKind, payload: T) {
        // No subscribers is not an error.
        let _ = self.sender.send(Event { kind, payload });
    }

    /// Subscribe until `cancel` fires. The subscription is released once the
    /// token is cancelled or the handle is dropped.
    pub fn subscribe(&self, cancel: CancellationToken) -> Subscription<T> {
        Subscription {
            receiver: Some(self.sender.subscribe()),
            cancel,
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to a [`Broker`].
pub struct Subscription<T> {
    receiver: Option<broadcast::Receiver<Event<T>>>,
    cancel: CancellationToken,
    dropped: u64,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Wait for the next event. Returns `None` once the subscriber's token is
    /// cancelled or every broker handle is gone.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        loop {
            let receiver = self.receiver.as_mut()?;
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                r = receiver.recv() => Some(r),
            };
            match next {
                None => {
                    self.receiver = None;
                    return None;
                }
                Some(Ok(event)) => return Some(event),
                Some(Err(RecvError::Lagged(n))) => {
                    self.dropped += n;
                    debug!(dropped = n, "slow subscriber lost oldest events");
                }
                Some(Err(RecvError::Closed)) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Number of events this subscriber lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether the subscription still holds its slot on the broker.
    pub fn is_active(&self) -> bool {
        self.receiver.is_some() && !self.cancel.is_cancelled()
    }

    pub fn into_stream(self) -> impl Stream<Item = Event<T>> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}
