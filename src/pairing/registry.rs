//! Pairing registry
//!
//! Process-wide map of identifier to waiting downloader. Reads (uploader
//! lookups) proceed concurrently; registration and removal are serialized
//! by a single reader/writer lock that is never held across an await.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use super::uid::UidGenerator;

/// Delivered to a waiting downloader when an uploader matches its id
#[derive(Debug)]
pub struct MatchNotice {
    /// Address of the matched uploader
    pub uploader_addr: SocketAddr,
    /// Carries the downloader's readiness acknowledgement back to the uploader
    pub confirm: oneshot::Sender<bool>,
}

/// Why a ready signal could not be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// Another uploader already matched this downloader
    AlreadySignaled,
    /// The downloader left and its entry was removed
    Removed,
}

/// State of an entry's one-shot ready signal
#[derive(Debug)]
enum ReadySlot {
    Waiting(oneshot::Sender<MatchNotice>),
    Fired,
    Closed,
}

/// One downloader waiting to be matched
#[derive(Debug)]
pub struct PendingDownloader {
    uid: String,
    addr: SocketAddr,
    registered_at: Instant,
    ready: Mutex<ReadySlot>,
}

impl PendingDownloader {
    /// Create an entry and the receiving half of its ready signal
    pub fn new(uid: impl Into<String>, addr: SocketAddr) -> (Self, oneshot::Receiver<MatchNotice>) {
        let (tx, rx) = oneshot::channel();
        let entry = Self {
            uid: uid.into(),
            addr,
            registered_at: Instant::now(),
            ready: Mutex::new(ReadySlot::Waiting(tx)),
        };
        (entry, rx)
    }

    /// Identifier this downloader registered under
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Transport address of the downloader
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// When the downloader registered
    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Fire the ready signal. Succeeds for exactly one caller.
    ///
    /// On failure the notice is dropped, which closes its confirmation
    /// channel.
    pub fn signal_ready(&self, notice: MatchNotice) -> std::result::Result<(), SignalError> {
        let mut slot = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, ReadySlot::Closed) {
            ReadySlot::Waiting(tx) => match tx.send(notice) {
                Ok(()) => {
                    *slot = ReadySlot::Fired;
                    Ok(())
                }
                // Receiver dropped: the downloader's handler already unwound
                Err(_) => Err(SignalError::Removed),
            },
            ReadySlot::Fired => {
                *slot = ReadySlot::Fired;
                Err(SignalError::AlreadySignaled)
            }
            ReadySlot::Closed => Err(SignalError::Removed),
        }
    }

    /// Whether an uploader has fired this entry's ready signal
    pub fn is_signaled(&self) -> bool {
        let slot = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*slot, ReadySlot::Fired)
    }

    fn close(&self) {
        let mut slot = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        if let ReadySlot::Waiting(_) = *slot {
            *slot = ReadySlot::Closed;
        }
    }
}

/// Thread-safe registry of pending downloaders
#[derive(Debug, Default)]
pub struct PairingRegistry {
    entries: RwLock<HashMap<String, Arc<PendingDownloader>>>,
}

impl PairingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. The id must not already be present; returns false
    /// and leaves the existing entry in place if it is.
    pub fn add(&self, entry: Arc<PendingDownloader>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(entry.uid()) {
            return false;
        }
        let addr = entry.addr();
        entries.insert(entry.uid().to_string(), entry);
        let pending = entries.len();
        drop(entries);

        debug!("Registered downloader {} (pending: {})", addr, pending);
        true
    }

    /// Look up a pending downloader without removing it
    pub fn find(&self, uid: &str) -> Option<Arc<PendingDownloader>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let found = entries.get(uid).cloned();
        trace!("Registry lookup hit: {}", found.is_some());
        found
    }

    /// Remove an entry and close its ready signal.
    ///
    /// Only removes the slot if it still holds this very entry, so a stale
    /// handle never evicts a newer registration that reused the id. Returns
    /// whether anything was removed; removing twice is a no-op.
    pub fn remove(&self, entry: &Arc<PendingDownloader>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = match entries.get(entry.uid()) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(entry.uid());
                true
            }
            _ => false,
        };
        let pending = entries.len();
        drop(entries);

        entry.close();
        if removed {
            debug!(
                "Removed downloader {} after {:?} (pending: {})",
                entry.addr(),
                entry.registered_at().elapsed(),
                pending
            );
        }
        removed
    }

    /// Generate a fresh identifier and register a downloader under it.
    ///
    /// Generation and insertion happen under one write lock, so two
    /// concurrent registrations can never end up with the same id. The
    /// returned guard removes the entry when dropped.
    pub fn register(
        self: &Arc<Self>,
        addr: SocketAddr,
        generator: &UidGenerator,
    ) -> Result<(Registration, oneshot::Receiver<MatchNotice>)> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let uid = generator.generate_unique(|candidate| entries.contains_key(candidate))?;

        let (entry, ready_rx) = PendingDownloader::new(uid, addr);
        let entry = Arc::new(entry);
        entries.insert(entry.uid().to_string(), Arc::clone(&entry));
        let pending = entries.len();
        drop(entries);

        info!("Downloader {} registered (pending: {})", addr, pending);

        let registration = Registration {
            registry: Arc::clone(self),
            entry,
            released: false,
        };
        Ok((registration, ready_rx))
    }

    /// Number of pending downloaders
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no downloader is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an id is currently pending
    pub fn contains(&self, uid: &str) -> bool {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).contains_key(uid)
    }

    /// Snapshot of all pending ids
    pub fn pending_ids(&self) -> Vec<String> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }
}

/// Scope guard for a registered downloader; removes the entry on drop
#[derive(Debug)]
pub struct Registration {
    registry: Arc<PairingRegistry>,
    entry: Arc<PendingDownloader>,
    released: bool,
}

impl Registration {
    /// The registered identifier
    pub fn uid(&self) -> &str {
        self.entry.uid()
    }

    /// Remove the entry now instead of at drop
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.registry.remove(&self.entry)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}
