//! Remote procedure calls over a publish/subscribe transport.
//!
//! A [`PeerConnection`] initialized as `(A, B)` listens on topic `A/B` and
//! calls out on `B/A`. Functions of up to eight parameters are bound by name
//! with [`PeerConnection::bind`] and invoked remotely with
//! [`PeerConnection::call`]. Every call travels as an envelope: a bincode
//! stack of argument blocks topped by the function name.
//!
//! Calls never block. They are queued on the [`Bus`], and the embedding
//! application publishes them by calling [`Bus::drain_once`] in its event
//! loop. The same drain also ticks the transport, so handlers run on the
//! drain thread.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use topicrpc::{Bus, Config, LocalBroker, PeerConnection};
//!
//! let bus = Bus::new(Arc::new(LocalBroker::new()), &Config::default()).unwrap();
//! let a = PeerConnection::init(&bus, "A", "B").unwrap();
//! let b = PeerConnection::init(&bus, "B", "A").unwrap();
//!
//! let greeting = Arc::new(Mutex::new(String::new()));
//! let seen = greeting.clone();
//! b.bind("greet", move |name: String| *seen.lock().unwrap() = name);
//!
//! a.call("greet", ("hello",)).unwrap();
//! bus.drain_until_idle(16).unwrap();
//! assert_eq!(*greeting.lock().unwrap(), "hello");
//! ```

mod macros;

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod net;
pub mod peer;
pub mod pool;
pub mod queue;
pub mod topic;
pub mod transport;
pub mod types;

pub use bus::{Bus, CallError, PublishItem};
pub use config::Config;
pub use dispatcher::{DispatchError, FunctionInfo, Handler, Registry};
pub use envelope::{Blocks, DecodeError, EncodeError};
pub use net::{client::TcpTransport, server::Broker};
pub use peer::{Caller, PeerConnection};
pub use pool::ObjectPool;
pub use queue::{BoundedQueue, CapacityError};
pub use transport::{Delivery, LocalBroker, Transport, TransportError};
pub use types::{Argument, Arguments, Debugged, Displayed, Origin, Reply};
