use crate::{
    bus::{Bus, CallError},
    dispatcher::{DispatchError, Handler, Registry},
    envelope,
    topic,
    transport::{Delivery, TransportError},
    types::Arguments,
};
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, trace, warn};

/// Issues calls to one peer. Cheap to clone, and holds nothing but the bus
/// and the outbound topic, so handlers can capture it to answer back.
#[derive(Clone)]
pub struct Caller {
    bus: Arc<Bus>,
    topic: Arc<str>,
}

impl Caller {
    /// Queues `name(args...)` for publishing; see [`PeerConnection::call`].
    pub fn call<A: Arguments>(&self, name: &str, args: A) -> Result<(), CallError> {
        self.bus.enqueue_call(&self.topic, name, &args)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller").field("topic", &self.topic).finish()
    }
}

/// One end of a logical channel between `my_topic` and `peer_topic`.
///
/// Listens on `my_topic/peer_topic` and calls out on `peer_topic/my_topic`,
/// so connections initialized as `(A, B)` and `(B, A)` reach each other. Any
/// number of connections may share the same pair; each receives every
/// envelope on its inbound topic.
pub struct PeerConnection {
    my_topic: String,
    peer_topic: String,
    inbound: String,
    caller: Caller,
    registry: Arc<RwLock<Registry>>,
}

impl PeerConnection {
    /// Subscribes to the inbound topic on the bus transport.
    pub fn init(bus: &Arc<Bus>, my_topic: &str, peer_topic: &str) -> Result<Self, TransportError> {
        let inbound = topic::inbound(my_topic, peer_topic);
        let outbound = topic::outbound(my_topic, peer_topic);
        let registry = Arc::new(RwLock::new(Registry::new()));

        let weak = Arc::downgrade(&registry);
        let on_deliver: Delivery = Arc::new(move |topic: &str, payload: &[u8]| {
            let Some(registry) = weak.upgrade() else {
                trace!(topic, "connection gone, ignoring delivery");
                return;
            };
            if let Err(err) = deliver(&registry, topic, payload) {
                warn!(topic, %err, "dropping undeliverable envelope");
            }
        });
        bus.transport().subscribe(&inbound, on_deliver)?;
        debug!(%inbound, %outbound, "peer connection initialized");

        Ok(Self {
            my_topic: my_topic.to_owned(),
            peer_topic: peer_topic.to_owned(),
            inbound,
            caller: Caller {
                bus: bus.clone(),
                topic: Arc::from(outbound),
            },
            registry,
        })
    }

    /// Queues `name(args...)` for the peer. `args` is a tuple, `()` for none.
    ///
    /// Returns once the call is queued; it is published by a later
    /// [`Bus::drain_once`]. There is no delivery acknowledgement.
    pub fn call<A: Arguments>(&self, name: &str, args: A) -> Result<(), CallError> {
        self.caller.call(name, args)
    }

    /// Binds `handler` to `name`, replacing any earlier binding.
    pub fn bind<Args, H>(&self, name: &str, handler: H)
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .bind(name, handler);
    }

    /// Decodes and dispatches one payload as if it had arrived on `topic`.
    ///
    /// Returns `Ok(false)` when no handler is bound under the call's name.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> Result<bool, DispatchError> {
        deliver(&self.registry, topic, payload)
    }

    pub fn caller(&self) -> Caller {
        self.caller.clone()
    }

    pub fn my_topic(&self) -> &str {
        &self.my_topic
    }

    pub fn peer_topic(&self) -> &str {
        &self.peer_topic
    }

    pub fn inbound_topic(&self) -> &str {
        &self.inbound
    }

    pub fn outbound_topic(&self) -> &str {
        self.caller.topic()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound_topic())
            .field("registry", &self.registry)
            .finish()
    }
}

/// The handler is looked up under the read lock but invoked after releasing
/// it, so a handler may bind on its own connection.
fn deliver(registry: &RwLock<Registry>, topic: &str, payload: &[u8]) -> Result<bool, DispatchError> {
    let mut blocks = envelope::decode(payload)?;
    let handler = registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .lookup(&mut blocks, topic)?;
    match handler {
        Some(handler) => {
            handler.invoke(&mut blocks, topic, None)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, transport::LocalBroker};

    fn bus() -> Arc<Bus> {
        Bus::new(Arc::new(LocalBroker::new()), &Config::default()).unwrap()
    }

    #[test]
    fn topic_pair() {
        let bus = bus();
        let peer = PeerConnection::init(&bus, "A", "B").unwrap();
        assert_eq!(peer.inbound_topic(), "A/B");
        assert_eq!(peer.outbound_topic(), "B/A");
        assert_eq!(peer.my_topic(), "A");
        assert_eq!(peer.peer_topic(), "B");
    }

    #[test]
    fn deliver_directly() {
        let bus = bus();
        let peer = PeerConnection::init(&bus, "B", "A").unwrap();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        peer.bind("greet", move |s: String| *sink.lock().unwrap() = Some(s));

        let payload = envelope::encode("greet", &("hello",)).unwrap();
        assert!(peer.deliver("B/A", &payload).unwrap());
        assert_eq!(seen.lock().unwrap().as_deref(), Some("hello"));

        let unknown = envelope::encode("nope", &()).unwrap();
        assert!(!peer.deliver("B/A", &unknown).unwrap());
        assert!(peer.deliver("B/A", b"garbage").is_err());
    }

    #[test]
    fn handler_may_bind_on_own_connection() {
        let bus = bus();
        let peer = Arc::new(PeerConnection::init(&bus, "B", "A").unwrap());
        let inner = Arc::downgrade(&peer);
        peer.bind("install", move || {
            if let Some(peer) = inner.upgrade() {
                peer.bind("installed", || ());
            }
        });

        let payload = envelope::encode("install", &()).unwrap();
        peer.deliver("B/A", &payload).unwrap();
        assert!(peer.is_bound("installed"));
    }
}
