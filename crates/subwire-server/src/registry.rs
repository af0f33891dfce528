//! Per-connection operation registry: reservation sentinels and running
//! producers.
//!
//! An id is reserved the instant a valid `subscribe` is parsed, before the
//! factory constructs the producer. This makes duplicate-id detection atomic
//! with respect to factory construction: a second `subscribe` with the same
//! id is rejected even while the first is still being prepared.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::producer::Producer;

/// A producer installed for an operation id.
pub struct RunningSubscription {
    producer: Arc<dyn Producer>,
    finished: CancellationToken,
}

impl RunningSubscription {
    /// Couple a producer with its completion token. The drive task cancels
    /// the token once `start` has settled and the completion hook has run.
    pub fn new(producer: Arc<dyn Producer>, finished: CancellationToken) -> Self {
        Self { producer, finished }
    }

    /// Stop the producer and wait until the operation has fully settled.
    pub async fn stop_and_wait(&self) {
        self.producer.stop().await;
        self.finished.cancelled().await;
    }
}

enum Entry {
    /// Sentinel: the factory is still constructing the producer.
    Reserved,
    Running(RunningSubscription),
}

/// What [`SubscriptionRegistry::remove`] found for an id.
pub enum RemovedEntry {
    /// No entry for the id.
    Vacant,
    /// A reservation sentinel was discarded.
    Reserved,
    /// A running producer was uninstalled.
    Running(RunningSubscription),
}

impl RemovedEntry {
    /// Whether any entry was present.
    pub fn was_present(&self) -> bool {
        !matches!(self, Self::Vacant)
    }

    /// The uninstalled producer, when one was running.
    pub fn into_running(self) -> Option<RunningSubscription> {
        match self {
            Self::Running(running) => Some(running),
            _ => None,
        }
    }
}

/// Map from operation id to its reservation or running producer.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert a reservation sentinel.
    ///
    /// Returns `false` without mutating when the id is already present,
    /// whether reserved or running.
    pub fn reserve(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return false;
        }
        let _ = entries.insert(id.to_owned(), Entry::Reserved);
        true
    }

    /// Replace the reservation sentinel with a running producer.
    ///
    /// Returns `false` when the reservation has vanished — the client
    /// completed the operation or the connection closed while the factory
    /// was constructing. The caller must then stop the producer without
    /// starting it.
    pub fn install(&self, id: &str, running: RunningSubscription) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(Entry::Reserved) => {
                let _ = entries.insert(id.to_owned(), Entry::Running(running));
                true
            }
            _ => false,
        }
    }

    /// Remove an entry, reporting what was found.
    ///
    /// Bare reservations are deleted just like running entries; the caller
    /// learns which it was.
    pub fn remove(&self, id: &str) -> RemovedEntry {
        match self.entries.lock().remove(id) {
            Some(Entry::Running(running)) => RemovedEntry::Running(running),
            Some(Entry::Reserved) => RemovedEntry::Reserved,
            None => RemovedEntry::Vacant,
        }
    }

    /// Whether the id is currently reserved or running.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Ids currently present, for shutdown iteration.
    pub fn snapshot_ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of reserved or running operations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
