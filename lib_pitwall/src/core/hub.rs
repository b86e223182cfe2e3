//! # Connection Hub
//!
//! The in-process connection registry. Each connected client gets a dedicated
//! unbounded MPSC channel; the transport task that owns the socket drains the
//! receiver and writes to the wire. Messages are wrapped in an `Arc` so one
//! fan-out never clones the payload per client.
//!
//! The rest of the engine only depends on the [`Transport`] trait, so tests and
//! alternative front ends can plug in their own delivery mechanism.

use super::lock;
use super::subscriptions::ConnectionId;
use crate::racing::ServerMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} closed its channel")]
    Closed(ConnectionId),

    #[error("delivery to connection {connection} failed: {reason}")]
    Failed { connection: ConnectionId, reason: String },
}

/// Delivers one message to one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, connection: ConnectionId, message: Arc<ServerMessage>) -> Result<(), DeliveryError>;
}

pub struct ConnectionHub {
    clients: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Arc<ServerMessage>>>>,
    next_id: AtomicUsize,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Registers a new connection and returns its handle and message stream.
    pub fn add_client(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Arc<ServerMessage>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.clients).insert(id, tx);
        log::info!("Client {} registered with hub", id);
        (id, rx)
    }

    pub fn remove_client(&self, id: ConnectionId) {
        if lock(&self.clients).remove(&id).is_some() {
            log::info!("Client {} removed from hub", id);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.clients).is_empty()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ConnectionHub {
    async fn send(&self, connection: ConnectionId, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        let mut clients = lock(&self.clients);
        let sender = clients
            .get(&connection)
            .ok_or(DeliveryError::UnknownConnection(connection))?;

        if sender.send(message).is_err() {
            // Receiver dropped: the socket task is gone.
            clients.remove(&connection);
            log::info!("Client {} disconnected. Removing from hub.", connection);
            return Err(DeliveryError::Closed(connection));
        }
        Ok(())
    }
}
