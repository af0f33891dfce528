//! Live-connection tracking for the deployment: counts and mass close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::socket::{Socket, SocketError};

/// Tracks every socket accepted by the server, keyed by client id.
#[derive(Default)]
pub struct ConnectionTracker {
    connections: RwLock<HashMap<String, Arc<dyn Socket>>>,
    /// Atomic counter so count queries skip the lock.
    active_count: AtomicUsize,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a socket.
    pub async fn add(&self, id: String, socket: Arc<dyn Socket>) {
        let mut connections = self.connections.write().await;
        if connections.insert(id, socket).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stop tracking a socket.
    pub async fn remove(&self, id: &str) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Number of tracked sockets.
    pub fn count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Close every tracked socket with the given code and reason.
    ///
    /// Every socket is notified even when some closes fail; the first
    /// failure is returned after the sweep completes.
    pub async fn close_all(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        let sockets: Vec<Arc<dyn Socket>> = {
            let mut connections = self.connections.write().await;
            let drained = connections.drain().map(|(_, socket)| socket).collect();
            self.active_count.store(0, Ordering::Relaxed);
            drained
        };

        let mut first_err = None;
        for socket in sockets {
            if let Err(err) = socket.close(code, reason).await {
                warn!(error = %err, "failed to close client socket");
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
