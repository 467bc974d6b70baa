//! The publish/subscribe surface the RPC layer runs on, plus an in-process
//! broker implementing it.

use crate::{config::Config, topic};
use std::{
    collections::VecDeque,
    fmt, io,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tracing::trace;

/// Callback invoked with `(topic, payload)` for every matching delivery.
pub type Delivery = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A publish/subscribe transport.
///
/// Deliveries happen only from within [`tick`](Self::tick), on the thread
/// that calls it.
pub trait Transport: Send + Sync {
    /// Registers `on_deliver` for every message whose topic matches `pattern`.
    /// Overlapping subscriptions each receive the message.
    fn subscribe(&self, pattern: &str, on_deliver: Delivery) -> Result<(), TransportError>;

    /// Fire-and-forget publish.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Performs one bounded unit of delivery work.
    fn tick(&self) -> Result<(), TransportError>;

    /// Inbound messages received but not yet delivered, if known.
    fn pending(&self) -> usize {
        0
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connecting to broker at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("disconnected from broker")]
    Disconnected,

    #[error("invalid topic pattern {0:?}")]
    InvalidPattern(String),
}

struct Subscription {
    pattern: String,
    on_deliver: Delivery,
}

/// Subscriptions of one transport endpoint, fanned out locally.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SubscriptionTable {
    pub(crate) fn insert(&self, pattern: &str, on_deliver: Delivery) -> Result<(), TransportError> {
        if !topic::is_valid_pattern(pattern) {
            return Err(TransportError::InvalidPattern(pattern.to_owned()));
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                pattern: pattern.to_owned(),
                on_deliver,
            });
        Ok(())
    }

    /// Invokes every subscription matching `topic`. The table is not locked
    /// while callbacks run. Returns the number of callbacks invoked.
    pub(crate) fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        let targets: Vec<Delivery> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sub| topic::matches(&sub.pattern, topic))
            .map(|sub| sub.on_deliver.clone())
            .collect();
        if targets.is_empty() {
            trace!(topic, "no subscriber for topic");
        }
        for on_deliver in &targets {
            on_deliver(topic, payload);
        }
        targets.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// An in-process broker: published messages are queued and delivered to
/// matching subscribers on the next [`tick`](Transport::tick).
pub struct LocalBroker {
    subscriptions: SubscriptionTable,
    pending: Mutex<VecDeque<(String, Vec<u8>)>>,
    max_deliveries_per_tick: usize,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            subscriptions: SubscriptionTable::default(),
            pending: Mutex::new(VecDeque::new()),
            max_deliveries_per_tick: config.max_deliveries_per_tick.max(1),
        }
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalBroker {
    fn subscribe(&self, pattern: &str, on_deliver: Delivery) -> Result<(), TransportError> {
        self.subscriptions.insert(pattern, on_deliver)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((topic.to_owned(), payload.to_vec()));
        Ok(())
    }

    fn tick(&self) -> Result<(), TransportError> {
        let batch: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let n = pending.len().min(self.max_deliveries_per_tick);
            pending.drain(..n).collect()
        };
        for (topic, payload) in batch {
            self.subscriptions.deliver(&topic, &payload);
        }
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for LocalBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBroker")
            .field("subscriptions", &self.subscriptions.len())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<(String, Vec<u8>)>>>, Delivery) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let on_deliver: Delivery = Arc::new(move |topic: &str, payload: &[u8]| {
            sink.lock().unwrap().push((topic.to_owned(), payload.to_vec()));
        });
        (seen, on_deliver)
    }

    #[test]
    fn delivers_on_tick_only() {
        let broker = LocalBroker::new();
        let (seen, on_deliver) = recorder();
        broker.subscribe("A/B", on_deliver).unwrap();

        broker.publish("A/B", b"x").unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(broker.pending(), 1);

        broker.tick().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("A/B".into(), b"x".to_vec())]);
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn overlapping_subscriptions_fan_out() {
        let broker = LocalBroker::new();
        let (first, on_first) = recorder();
        let (second, on_second) = recorder();
        let (wild, on_wild) = recorder();
        broker.subscribe("B/A", on_first).unwrap();
        broker.subscribe("B/A", on_second).unwrap();
        broker.subscribe("B/+", on_wild).unwrap();

        broker.publish("B/A", b"update").unwrap();
        broker.publish("C/A", b"elsewhere").unwrap();
        broker.tick().unwrap();

        assert_eq!(first.lock().unwrap().len(), 1);
        assert_eq!(second.lock().unwrap().len(), 1);
        assert_eq!(wild.lock().unwrap().len(), 1);
    }

    #[test]
    fn bounded_work_per_tick() {
        let config = Config {
            max_deliveries_per_tick: 2,
            ..Config::default()
        };
        let broker = LocalBroker::from_config(&config);
        let (seen, on_deliver) = recorder();
        broker.subscribe("#", on_deliver).unwrap();
        for i in 0..5u8 {
            broker.publish("t", &[i]).unwrap();
        }

        broker.tick().unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        broker.tick().unwrap();
        broker.tick().unwrap();
        let payloads: Vec<u8> = seen.lock().unwrap().iter().map(|(_, p)| p[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rejects_invalid_pattern() {
        let broker = LocalBroker::new();
        let (_, on_deliver) = recorder();
        assert!(matches!(
            broker.subscribe("A/#/B", on_deliver),
            Err(TransportError::InvalidPattern(_))
        ));
    }
}
