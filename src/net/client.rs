use super::{ClientFrame, ServerFrame};
use crate::transport::{Delivery, SubscriptionTable, Transport, TransportError};
use async_bincode::tokio::{AsyncBincodeReader, AsyncBincodeWriter};
use futures::{SinkExt, StreamExt};
use std::{
    fmt,
    sync::{Mutex, PoisonError},
};
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, error::TryRecvError},
    task,
};
use tracing::{debug, info};

/// A [`Transport`] talking to a [`Broker`] over TCP.
///
/// Socket I/O runs on background tokio tasks; [`tick`](Transport::tick)
/// hands buffered deliveries to subscribers on the caller's thread without
/// blocking.
///
/// [`Broker`]: super::server::Broker
pub struct TcpTransport {
    client_id: String,
    outbox: mpsc::UnboundedSender<ClientFrame>,
    inbox: Mutex<mpsc::UnboundedReceiver<ServerFrame>>,
    subscriptions: SubscriptionTable,
    max_deliveries_per_tick: usize,
}

impl TcpTransport {
    /// Connects to the broker at `host:port` and spawns the socket tasks on
    /// the current tokio runtime.
    pub async fn connect(client_id: &str, host: &str, port: u16) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");
        let sock = TcpStream::connect(&addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;
        if let Err(err) = sock.set_nodelay(true) {
            debug!(%err, "could not disable Nagle's algorithm");
        }
        let (read_half, write_half) = sock.into_split();
        let mut frames = AsyncBincodeReader::<_, ServerFrame>::from(read_half);
        let mut sink = AsyncBincodeWriter::<_, ClientFrame, _>::from(write_half).for_async();

        let (outbox, mut outgoing) = mpsc::unbounded_channel();
        let (incoming, inbox) = mpsc::unbounded_channel();

        task::spawn(async move {
            while let Some(frame) = outgoing.recv().await {
                if let Err(err) = sink.send(frame).await {
                    debug!(%err, "writing to broker failed");
                    break;
                }
            }
        });
        task::spawn(async move {
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(frame) => {
                        if incoming.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(%err, "reading from broker failed");
                        break;
                    }
                }
            }
            debug!("broker connection closed");
        });

        outbox
            .send(ClientFrame::Hello {
                client_id: client_id.to_owned(),
            })
            .map_err(|_| TransportError::Disconnected)?;
        info!(client_id, %addr, "connected to broker");

        Ok(Self {
            client_id: client_id.to_owned(),
            outbox,
            inbox: Mutex::new(inbox),
            subscriptions: SubscriptionTable::default(),
            max_deliveries_per_tick: crate::Config::default().max_deliveries_per_tick,
        })
    }

    pub fn with_max_deliveries_per_tick(mut self, max: usize) -> Self {
        self.max_deliveries_per_tick = max.max(1);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        self.outbox
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }
}

impl Transport for TcpTransport {
    fn subscribe(&self, pattern: &str, on_deliver: Delivery) -> Result<(), TransportError> {
        self.subscriptions.insert(pattern, on_deliver)?;
        self.send(ClientFrame::Subscribe {
            pattern: pattern.to_owned(),
        })
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.send(ClientFrame::Publish {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
        })
    }

    fn tick(&self) -> Result<(), TransportError> {
        for _ in 0..self.max_deliveries_per_tick {
            let next = self
                .inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_recv();
            match next {
                Ok(ServerFrame::Deliver { topic, payload }) => {
                    self.subscriptions.deliver(&topic, &payload);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("client_id", &self.client_id)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
