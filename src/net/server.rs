use super::{ClientFrame, ServerFrame};
use crate::topic;
use async_bincode::tokio::{AsyncBincodeReader, AsyncBincodeWriter};
use futures::{SinkExt, StreamExt};
use std::{
    collections::HashMap,
    io,
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task,
};
use tracing::{debug, info, warn};

struct Session {
    client_id: String,
    patterns: Vec<String>,
    outbox: mpsc::UnboundedSender<ServerFrame>,
}

/// Routes publishes between connected [`TcpTransport`]s.
///
/// [`TcpTransport`]: super::client::TcpTransport
#[derive(Default)]
pub struct Broker {
    sessions: Mutex<HashMap<u64, Session>>,
    next_session: AtomicU64,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn serve_tcp(self, port: u16) -> io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        Arc::new(self).serve(listener).await
    }

    /// Accepts clients on `listener` until accepting fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let arc_self = self.clone();
            let (sock, addr) = listener.accept().await?;
            debug!(%addr, "client connected");
            task::spawn(async move {
                if let Err(err) = arc_self.handle_connection(sock).await {
                    debug!(%addr, %err, "client connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, sock: TcpStream) -> Result<(), bincode::Error> {
        if let Err(err) = sock.set_nodelay(true) {
            debug!(%err, "could not disable Nagle's algorithm");
        }
        let (read_half, write_half) = sock.into_split();
        let mut frames = AsyncBincodeReader::<_, ClientFrame>::from(read_half);
        let mut sink = AsyncBincodeWriter::<_, ServerFrame, _>::from(write_half).for_async();

        let (outbox, mut rx) = mpsc::unbounded_channel();
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.lock_sessions().insert(
            id,
            Session {
                client_id: String::new(),
                patterns: Vec::new(),
                outbox,
            },
        );

        let writer = task::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let result = self.read_frames(id, &mut frames).await;
        if let Some(session) = self.lock_sessions().remove(&id) {
            info!(client_id = %session.client_id, "client disconnected");
        }
        writer.abort();
        result
    }

    async fn read_frames(
        &self,
        id: u64,
        frames: &mut AsyncBincodeReader<tokio::net::tcp::OwnedReadHalf, ClientFrame>,
    ) -> Result<(), bincode::Error> {
        while let Some(frame) = frames.next().await {
            match frame? {
                ClientFrame::Hello { client_id } => {
                    info!(%client_id, "client registered");
                    if let Some(session) = self.lock_sessions().get_mut(&id) {
                        session.client_id = client_id;
                    }
                }
                ClientFrame::Subscribe { pattern } => {
                    if !topic::is_valid_pattern(&pattern) {
                        warn!(%pattern, "ignoring invalid subscription");
                        continue;
                    }
                    if let Some(session) = self.lock_sessions().get_mut(&id) {
                        debug!(client_id = %session.client_id, %pattern, "subscribed");
                        session.patterns.push(pattern);
                    }
                }
                ClientFrame::Publish { topic, payload } => self.route(&topic, payload),
            }
        }
        Ok(())
    }

    /// Sends one `Deliver` to every session with at least one matching pattern.
    fn route(&self, topic: &str, payload: Vec<u8>) {
        let sessions = self.lock_sessions();
        let targets: Vec<_> = sessions
            .values()
            .filter(|session| session.patterns.iter().any(|p| topic::matches(p, topic)))
            .collect();
        debug!(topic, targets = targets.len(), "routing publish");
        for session in targets {
            let _ = session.outbox.send(ServerFrame::Deliver {
                topic: topic.to_owned(),
                payload: payload.clone(),
            });
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of connected clients.
    pub fn clients(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Total subscription patterns across all clients.
    pub fn subscriptions(&self) -> usize {
        self.lock_sessions()
            .values()
            .map(|session| session.patterns.len())
            .sum()
    }
}
