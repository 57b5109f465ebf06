//! Process-wide port allocator
//!
//! Walks the shuffled candidate pool once, asking the arbiter for each
//! candidate in turn, and keeps the first lock it gets for as long as the
//! process (or the allocator) lives.
//!
//! ```text
//! Unallocated --[lock acquired]--> Allocated --[release]--> Unallocated
//! Unallocated --[pool exhausted]--> Failed (terminal)
//! ```
//!
//! Reads of an existing allocation go through an atomic and never touch the
//! mutex or the filesystem. The mutex covers the whole search, so concurrent
//! callers in one process never run overlapping searches.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::arbiter::{Acquire, FileLockArbiter, LockArbiter};
use super::{CandidatePool, PortRange};
use crate::config::AllocatorConfig;
use crate::errors::{PortLockError, Result};

/// Config errors are kept as text; `PortLockError` is not `Clone`
static GLOBAL_ALLOCATOR: OnceCell<std::result::Result<PortAllocator, String>> = OnceCell::new();

/// Port 0 is never a candidate, so it marks "nothing cached"
const NO_PORT: u32 = 0;

/// Observable allocation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    Unallocated,
    Allocated(u16),
    /// Pool exhausted; this allocator will not search again
    Failed,
}

enum Slot<H> {
    Unallocated,
    Allocated { port: u16, handle: H },
    Failed { attempted: usize },
}

/// Memoizing allocator over a candidate pool and a lock arbiter
pub struct PortAllocator<A: LockArbiter = FileLockArbiter> {
    arbiter: A,
    pool: CandidatePool,
    cached: AtomicU32,
    slot: Mutex<Slot<A::Handle>>,
}

impl PortAllocator<FileLockArbiter> {
    /// Build a file-lock allocator from config
    ///
    /// The candidate order is shuffled here, once.
    pub fn new(config: &AllocatorConfig) -> Result<Self> {
        config.validate()?;
        let range = config.port_range()?;
        Ok(Self::with_arbiter(
            FileLockArbiter::new(config),
            CandidatePool::shuffled(range),
        ))
    }

    /// The process-wide allocator
    ///
    /// Built on first use from `AllocatorConfig::from_env()`. An invalid
    /// environment is remembered and returned on every call; falling back to
    /// defaults would lock in a directory the other shards never look at.
    pub fn global() -> Result<&'static PortAllocator> {
        GLOBAL_ALLOCATOR
            .get_or_init(|| {
                AllocatorConfig::from_env()
                    .and_then(|config| Self::new(&config))
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| {
                PortLockError::ValidationError(format!("invalid portlock environment: {}", e))
            })
    }
}

impl<A: LockArbiter> PortAllocator<A> {
    pub fn with_arbiter(arbiter: A, pool: CandidatePool) -> Self {
        PortAllocator {
            arbiter,
            pool,
            cached: AtomicU32::new(NO_PORT),
            slot: Mutex::new(Slot::Unallocated),
        }
    }

    pub fn range(&self) -> PortRange {
        self.pool.range()
    }

    pub fn arbiter(&self) -> &A {
        &self.arbiter
    }

    /// Port this process holds, allocating it on the first call
    ///
    /// # Errors
    /// - `AllocationExhausted` when no candidate could be locked. Fatal: the
    ///   allocator stays failed and later calls return the same error
    ///   without rescanning.
    /// - `LockDirectory` when the lock directory cannot be created.
    pub fn get_port(&self) -> Result<u16> {
        if let Some(port) = self.cached_port() {
            return Ok(port);
        }

        let mut slot = self.lock_slot();
        match &*slot {
            Slot::Allocated { port, .. } => return Ok(*port),
            Slot::Failed { attempted } => return Err(self.exhausted(*attempted)),
            Slot::Unallocated => {}
        }

        self.prepare()?;

        let mut attempted = 0;
        for port in &self.pool {
            attempted += 1;
            match self.arbiter.try_acquire(port) {
                Acquire::Locked(handle) => {
                    *slot = Slot::Allocated { port, handle };
                    self.cached.store(u32::from(port), Ordering::Release);
                    info!(port, attempted, "allocated port");
                    return Ok(port);
                }
                Acquire::Busy => debug!(port, "candidate busy"),
                Acquire::SoftError(e) => debug!(port, error = %e, "candidate skipped"),
            }
        }

        *slot = Slot::Failed { attempted };
        let err = self.exhausted(attempted);
        warn!(error = %err, "port allocation exhausted");
        Err(err)
    }

    /// Release the held port, if any
    ///
    /// Idempotent. Also a no-op on a failed allocator.
    pub fn release_port(&self) {
        let mut slot = self.lock_slot();
        if !matches!(&*slot, Slot::Allocated { .. }) {
            return;
        }

        self.cached.store(NO_PORT, Ordering::Release);
        if let Slot::Allocated { port, handle } = std::mem::replace(&mut *slot, Slot::Unallocated) {
            self.arbiter.release(handle);
            info!(port, "released port");
        }
    }

    pub fn state(&self) -> AllocationState {
        match &*self.lock_slot() {
            Slot::Unallocated => AllocationState::Unallocated,
            Slot::Allocated { port, .. } => AllocationState::Allocated(*port),
            Slot::Failed { .. } => AllocationState::Failed,
        }
    }

    /// Allocated port without allocating
    pub fn cached_port(&self) -> Option<u16> {
        match self.cached.load(Ordering::Acquire) {
            NO_PORT => None,
            port => u16::try_from(port).ok(),
        }
    }

    fn prepare(&self) -> Result<()> {
        self.arbiter.prepare().map_err(|e| {
            warn!(error = %e, "lock arbiter unavailable");
            e
        })
    }

    fn exhausted(&self, attempted: usize) -> PortLockError {
        let range = self.pool.range();
        PortLockError::AllocationExhausted {
            start: range.start,
            end: range.end,
            attempted,
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot<A::Handle>> {
        // a panic mid-search leaves the slot Unallocated or fully Allocated
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
