//! Shared, reference-counted system wakelock

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tether_host_api::{SystemWakelock, WakelockProvider};
use tracing::{debug, info, warn};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of one wakelock owner (one per application record)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WakelockOwner(u64);

impl WakelockOwner {
    pub fn new() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WakelockOwner {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    provider: Arc<dyn WakelockProvider>,
    owners: HashSet<WakelockOwner>,
    held: Option<Box<dyn SystemWakelock>>,
}

/// Keeps the device awake while at least one owner holds it.
///
/// `acquire`/`release` are idempotent per owner. The system wakelock is
/// taken on the first acquire and dropped as soon as the owner set is
/// empty. Clones share the same owner set.
#[derive(Clone)]
pub struct SharedWakelock {
    inner: Arc<Mutex<Inner>>,
}

impl SharedWakelock {
    pub fn new(provider: Arc<dyn WakelockProvider>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                provider,
                owners: HashSet::new(),
                held: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self, owner: WakelockOwner) {
        let mut inner = self.lock();
        let added = inner.owners.insert(owner);

        if inner.held.is_none() {
            match inner.provider.acquire() {
                Ok(lock) => {
                    info!("System wakelock acquired");
                    inner.held = Some(lock);
                }
                // retried on the next acquire
                Err(e) => warn!(error = %e, "Failed to acquire system wakelock"),
            }
        }

        if added {
            debug!(owner = owner.0, owners = inner.owners.len(), "Wakelock owner added");
        }
    }

    pub fn release(&self, owner: WakelockOwner) {
        let mut inner = self.lock();
        if !inner.owners.remove(&owner) {
            return;
        }
        debug!(owner = owner.0, owners = inner.owners.len(), "Wakelock owner removed");

        if !inner.owners.is_empty() {
            return;
        }
        if let Some(lock) = inner.held.take() {
            lock.release();
            info!("System wakelock released");
        }
    }

    pub fn is_owner(&self, owner: WakelockOwner) -> bool {
        self.lock().owners.contains(&owner)
    }

    pub fn owner_count(&self) -> usize {
        self.lock().owners.len()
    }

    /// Whether the system wakelock is actually held
    pub fn is_held(&self) -> bool {
        self.lock().held.is_some()
    }
}

impl std::fmt::Debug for SharedWakelock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SharedWakelock")
            .field("owners", &inner.owners.len())
            .field("held", &inner.held.is_some())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(lock) = self.held.take() {
            lock.release();
        }
    }
}
