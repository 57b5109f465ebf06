//! # portlock - cross-process port allocation for parallel test shards
//!
//! Test processes started side by side on one host (CI shards, `cargo test`
//! binaries, `nextest` workers) each need a port for their stub HTTP server.
//! There is no coordinator and no shared memory; the lock directory is the
//! only thing they share.
//!
//! ## Core Principle
//!
//! **The lock IS the reservation**: a port belongs to whichever process holds
//! an exclusive advisory lock on `{lockDirectory}/{prefix}{port}.lock`. Marker
//! files are never deleted and their content is never read.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   get_port()   ┌────────────────┐
//! │ stub server  │ ─────────────▶ │ PortAllocator  │  memoized, mutex-guarded
//! └──────────────┘                └───────┬────────┘
//!                                         │ shuffled candidates
//!                                 ┌───────▼────────┐
//!                                 │ LockArbiter    │  flock(LOCK_EX|LOCK_NB)
//!                                 └───────┬────────┘
//!                                         ▼
//!                        /tmp/portlock-57830.lock ...
//! ```
//!
//! Locks only coordinate processes on one host sharing one filesystem with
//! working `flock` semantics. The allocator reserves the port *number*; it
//! does not bind the socket.

pub mod config;
pub mod errors;
pub mod port;

pub use config::AllocatorConfig;
pub use errors::{PortLockError, Result};
pub use port::{
    scan_markers, Acquire, AllocationState, CandidatePool, FileLockArbiter, LockArbiter,
    MarkerState, MarkerStatus, PortAllocator, PortLock, PortRange,
};

/// Port held by this process, allocated on first use
///
/// Uses the process-wide allocator configured from `PORTLOCK_*` environment
/// variables. Returns `AllocationExhausted` if every candidate is taken and
/// `ValidationError` if the environment is invalid.
pub fn get_port() -> Result<u16> {
    PortAllocator::global()?.get_port()
}

/// Give back this process's port; no-op when nothing is held
pub fn release_port() {
    if let Ok(allocator) = PortAllocator::global() {
        allocator.release_port()
    }
}
