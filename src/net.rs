//! A minimal TCP broker and client transport.
//!
//! Frames are length-prefixed bincode, via `async-bincode`. The broker
//! forwards each publish once to every client with a matching subscription;
//! the client fans it out to its local subscribers on [`Transport::tick`].
//!
//! [`Transport::tick`]: crate::Transport::tick

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClientFrame {
    Hello { client_id: String },
    Subscribe { pattern: String },
    Publish { topic: String, payload: Vec<u8> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServerFrame {
    Deliver { topic: String, payload: Vec<u8> },
}
