use crate::{
    config::Config,
    envelope::{self, EncodeError},
    pool::ObjectPool,
    queue::{BoundedQueue, CapacityError},
    transport::{Transport, TransportError},
    types::Arguments,
};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::{trace, warn};

/// One outbound message waiting for the drain loop.
#[derive(Debug, Default)]
pub struct PublishItem {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("outbound queue full, call dropped")]
    QueueFull,

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Connects peer connections to a transport.
///
/// Calls from any thread are encoded into pooled [`PublishItem`]s and pushed
/// onto a lock-free queue. The embedding application publishes them by
/// calling [`drain_once`](Self::drain_once) repeatedly from one thread, which
/// also ticks the transport and therefore runs inbound handlers.
pub struct Bus {
    transport: Arc<dyn Transport>,
    outbound: BoundedQueue<Box<PublishItem>>,
    items: ObjectPool<PublishItem>,
    max_retained_payload: usize,
}

impl Bus {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Result<Arc<Self>, CapacityError> {
        Ok(Arc::new(Self {
            transport,
            outbound: BoundedQueue::new(config.queue_capacity)?,
            items: ObjectPool::new(config.pool_capacity)?,
            max_retained_payload: config.max_retained_payload,
        }))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Encodes `name(args...)` for `topic` and queues it for publishing.
    /// Never blocks.
    pub fn enqueue_call<A>(&self, topic: &str, name: &str, args: &A) -> Result<(), CallError>
    where
        A: Arguments + ?Sized,
    {
        let mut item = self.items.get();
        item.topic.clear();
        item.topic.push_str(topic);
        item.payload.clear();
        if let Err(err) = envelope::encode_into(name, args, &mut item.payload) {
            self.recycle(item);
            return Err(err.into());
        }

        if let Err(item) = self.outbound.enqueue(item) {
            warn!(topic, name, "outbound queue full, dropping call");
            self.recycle(item);
            return Err(CallError::QueueFull);
        }
        trace!(topic, name, "queued call");
        Ok(())
    }

    /// Publishes at most one queued item, then ticks the transport.
    ///
    /// A failed publish is logged and the item discarded; only transport
    /// tick failures are returned.
    pub fn drain_once(&self) -> Result<(), TransportError> {
        if let Some(item) = self.outbound.try_dequeue() {
            if let Err(err) = self.transport.publish(&item.topic, &item.payload) {
                warn!(topic = %item.topic, %err, "publish failed, dropping item");
            }
            self.recycle(item);
        }
        self.transport.tick()
    }

    /// Drains until nothing is queued locally or pending in the transport,
    /// or `max_rounds` is reached. Returns the rounds performed.
    pub fn drain_until_idle(&self, max_rounds: usize) -> Result<usize, TransportError> {
        for round in 0..max_rounds {
            if self.is_idle() {
                return Ok(round);
            }
            self.drain_once()?;
        }
        Ok(max_rounds)
    }

    pub fn is_idle(&self) -> bool {
        self.outbound.is_empty() && self.transport.pending() == 0
    }

    /// Approximate number of calls waiting to be published.
    pub fn queued(&self) -> usize {
        self.outbound.approx_size()
    }

    fn recycle(&self, mut item: Box<PublishItem>) {
        item.payload.clear();
        if item.payload.capacity() > self.max_retained_payload {
            trace!(
                capacity = item.payload.capacity(),
                "shrinking oversized payload buffer"
            );
            item.payload.shrink_to(self.max_retained_payload);
        }
        self.items.put(item);
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("outbound", &self.outbound)
            .field("items", &self.items)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Delivery, LocalBroker};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl Transport for Recording {
        fn subscribe(&self, _pattern: &str, _on_deliver: Delivery) -> Result<(), TransportError> {
            Ok(())
        }

        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Disconnected);
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.to_vec()));
            Ok(())
        }

        fn tick(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn small_config() -> Config {
        Config {
            queue_capacity: 2,
            pool_capacity: 2,
            ..Config::default()
        }
    }

    #[test]
    fn publishes_one_item_per_drain() {
        let transport = Arc::new(Recording::default());
        let bus = Bus::new(transport.clone(), &Config::default()).unwrap();

        bus.enqueue_call("B/A", "greet", &("hello",)).unwrap();
        bus.enqueue_call("B/A", "greet", &("again",)).unwrap();
        assert_eq!(bus.queued(), 2);

        bus.drain_once().unwrap();
        assert_eq!(transport.published.lock().unwrap().len(), 1);
        bus.drain_once().unwrap();

        let published = transport.published.lock().unwrap();
        assert_eq!(published[0].0, "B/A");
        assert_eq!(published[0].1, envelope::encode("greet", &("hello",)).unwrap());
        assert_eq!(published[1].1, envelope::encode("greet", &("again",)).unwrap());
    }

    #[test]
    fn full_queue_drops_call() {
        let transport = Arc::new(Recording::default());
        let bus = Bus::new(transport.clone(), &small_config()).unwrap();

        bus.enqueue_call("t", "f", &(1u8,)).unwrap();
        bus.enqueue_call("t", "f", &(2u8,)).unwrap();
        assert!(matches!(
            bus.enqueue_call("t", "f", &(3u8,)),
            Err(CallError::QueueFull)
        ));

        bus.drain_once().unwrap();
        bus.enqueue_call("t", "f", &(4u8,)).unwrap();
        bus.drain_until_idle(10).unwrap();

        let published = transport.published.lock().unwrap();
        let args: Vec<u8> = published
            .iter()
            .map(|(_, payload)| {
                let mut blocks = envelope::decode(payload).unwrap();
                blocks.pop_name().unwrap();
                blocks.decode_next().unwrap()
            })
            .collect();
        assert_eq!(args, vec![1, 2, 4]);
    }

    #[test]
    fn failed_publish_does_not_stop_draining() {
        let transport = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let bus = Bus::new(transport, &Config::default()).unwrap();
        bus.enqueue_call("t", "f", &()).unwrap();
        bus.drain_once().unwrap();
        assert!(bus.is_idle());
    }

    #[test]
    fn rejects_bad_queue_capacity() {
        let config = Config {
            queue_capacity: 100,
            ..Config::default()
        };
        assert!(Bus::new(Arc::new(LocalBroker::new()), &config).is_err());
    }

    #[test]
    fn idle_accounts_for_transport_backlog() {
        let broker = Arc::new(LocalBroker::new());
        let bus = Bus::new(broker.clone(), &Config::default()).unwrap();
        assert!(bus.is_idle());

        bus.enqueue_call("nobody/listens", "f", &()).unwrap();
        assert!(!bus.is_idle());
        assert_eq!(bus.drain_until_idle(10).unwrap(), 1);
        assert!(bus.is_idle());
        assert_eq!(broker.pending(), 0);
    }

    #[test]
    fn oversized_payload_buffers_are_not_retained() {
        let config = Config {
            pool_capacity: 1,
            max_retained_payload: 4096,
            ..Config::default()
        };
        let bus = Bus::new(Arc::new(Recording::default()), &config).unwrap();

        bus.enqueue_call("t", "big", &(vec![0u8; 1 << 20],)).unwrap();
        bus.drain_until_idle(10).unwrap();
        let item = bus.items.get();
        assert!(item.payload.capacity() <= 4096);
        assert!(item.payload.is_empty());
        bus.items.put(item);

        bus.enqueue_call("t", "small", &(7u8,)).unwrap();
        bus.drain_until_idle(10).unwrap();
        let item = bus.items.get();
        assert!(item.payload.capacity() > 0);
    }
}
