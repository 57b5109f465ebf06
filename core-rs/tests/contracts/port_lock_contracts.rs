//! Port Lock Contract Tests
//!
//! These tests verify INVARIANTS that MUST NEVER BREAK regardless of implementation.
//! Every allocator here is a separate `PortAllocator` with its own file
//! descriptors, which is exactly how separate processes look to `flock`.
//!
//! **Problem**: "Simplifying" the allocator (ascending scan, no lock, retry loops)
//! **Solution**: Contract tests that fail with clear explanation of what's being sacrificed

use portlock::{
    Acquire, AllocationState, AllocatorConfig, CandidatePool, FileLockArbiter, LockArbiter,
    PortAllocator, PortLock, PortLockError, PortRange,
};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// File arbiter that counts lock attempts
struct CountingArbiter {
    inner: FileLockArbiter,
    attempts: AtomicUsize,
    delay: Duration,
}

impl CountingArbiter {
    fn new(config: &AllocatorConfig, delay: Duration) -> Self {
        CountingArbiter {
            inner: FileLockArbiter::new(config),
            attempts: AtomicUsize::new(0),
            delay,
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LockArbiter for CountingArbiter {
    type Handle = PortLock;

    fn prepare(&self) -> portlock::Result<()> {
        self.inner.prepare()
    }

    fn try_acquire(&self, port: u16) -> Acquire<PortLock> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.try_acquire(port)
    }

    fn release(&self, handle: PortLock) {
        self.inner.release(handle)
    }
}

fn counting_allocator(config: &AllocatorConfig, delay: Duration) -> PortAllocator<CountingArbiter> {
    let range = config.port_range().unwrap();
    PortAllocator::with_arbiter(CountingArbiter::new(config, delay), CandidatePool::shuffled(range))
}

/// WHY: Two shards holding the same port means two stub servers fight over one socket
/// REASON: The exclusive lock is the only coordination between processes
/// BREAKS: Parallel CI shards fail with "address in use" or talk to each other's stubs
#[test]
fn allocators_under_contention_get_distinct_ports() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57841, temp_dir.path());
    let barrier = Arc::new(Barrier::new(12));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let allocator = PortAllocator::new(&config).unwrap();
                barrier.wait();
                let port = allocator.get_port().unwrap();
                // keep the lock until every shard has allocated
                barrier.wait();
                port
            })
        })
        .collect();

    let ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let unique: HashSet<u16> = ports.iter().copied().collect();

    assert_eq!(unique.len(), 12, "duplicate ports handed out: {:?}", ports);
    assert!(ports.iter().all(|p| (57830..=57841).contains(p)));
}

/// WHY: get_port() is called from every test helper; it must not rescan each time
/// REASON: The first lock is the process's reservation for its whole lifetime
/// BREAKS: A second scan could lock a second port and leak the first
#[test]
fn second_get_port_is_memoized_without_touching_the_arbiter() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57835, temp_dir.path());
    let allocator = counting_allocator(&config, Duration::ZERO);

    let first = allocator.get_port().unwrap();
    let attempts_after_first = allocator.arbiter().attempts();
    let second = allocator.get_port().unwrap();

    assert_eq!(first, second);
    assert_eq!(attempts_after_first, 1, "empty lock directory: first candidate must win");
    assert_eq!(allocator.arbiter().attempts(), attempts_after_first);
}

/// WHY: A full pool is a setup failure, not a condition to paper over
/// REASON: Handing out an unlocked port silently reintroduces collisions
/// BREAKS: Shards would share a port whenever the pool runs dry
#[test]
fn exhausted_pool_raises_allocation_exhausted() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57833, temp_dir.path());
    let holder = FileLockArbiter::new(&config);

    let held: Vec<Acquire<PortLock>> = (57830..=57833).map(|p| holder.try_acquire(p)).collect();
    assert!(held.iter().all(|a| a.is_locked()));

    let allocator = counting_allocator(&config, Duration::ZERO);
    match allocator.get_port() {
        Err(PortLockError::AllocationExhausted { start, end, attempted }) => {
            assert_eq!((start, end, attempted), (57830, 57833, 4));
        }
        other => panic!("expected AllocationExhausted, got {:?}", other),
    }
    assert_eq!(allocator.state(), AllocationState::Failed);

    // no internal retry: a failed allocator never scans again
    drop(held);
    assert!(allocator.get_port().unwrap_err().is_exhausted());
    assert_eq!(allocator.arbiter().attempts(), 4);
}

/// WHY: A finished shard must give its port back to the pool
/// REASON: Release closes the descriptor, which drops the OS lock
/// BREAKS: Long CI runs slowly starve the pool
#[test]
fn released_port_can_be_reacquired_by_a_fresh_allocator() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57830, temp_dir.path());

    let first = PortAllocator::new(&config).unwrap();
    assert_eq!(first.get_port().unwrap(), 57830);

    let blocked = PortAllocator::new(&config).unwrap();
    assert!(blocked.get_port().unwrap_err().is_exhausted());

    first.release_port();
    first.release_port();
    assert_eq!(first.state(), AllocationState::Unallocated);

    let second = PortAllocator::new(&config).unwrap();
    assert_eq!(second.get_port().unwrap(), 57830);
}

/// WHY: Dropping the allocator (or the process dying) must free the port
/// REASON: There are no leases or heartbeats; the OS reclaims the lock
/// BREAKS: A crashed shard would pin its port forever
#[test]
fn dropped_allocator_frees_its_port() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57830, temp_dir.path());

    {
        let allocator = PortAllocator::new(&config).unwrap();
        assert_eq!(allocator.get_port().unwrap(), 57830);
    }

    let next = PortAllocator::new(&config).unwrap();
    assert_eq!(next.get_port().unwrap(), 57830);
}

/// WHY: Marker files are never deleted, so they exist for every port ever used
/// REASON: Only an active lock means "taken"; existence and content mean nothing
/// BREAKS: The pool would shrink to zero after one run
#[test]
fn marker_file_without_lock_does_not_block() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57830, temp_dir.path());
    fs::write(config.marker_path(57830), "pid 4242 was here\n").unwrap();

    let allocator = PortAllocator::new(&config).unwrap();
    assert_eq!(allocator.get_port().unwrap(), 57830);
}

/// WHY: Threads of one process must share one reservation
/// REASON: The search runs inside a single critical section
/// BREAKS: Two overlapping searches would lock two ports for one process
#[test]
fn concurrent_threads_trigger_exactly_one_lock_attempt() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57830, temp_dir.path());
    let allocator = Arc::new(counting_allocator(&config, Duration::from_millis(25)));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                allocator.get_port().unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 57830);
    }
    assert_eq!(allocator.arbiter().attempts(), 1);
}

/// WHY: Two processes starting together on the default-sized pool must not collide
/// FORMAT: pool [57830, 57835], no prior locks
#[test]
fn two_allocators_on_small_pool_get_different_ports() {
    let temp_dir = TempDir::new().unwrap();
    let config = AllocatorConfig::new(57830, 57835, temp_dir.path());
    let range = PortRange::new(57830, 57835).unwrap();

    let first = PortAllocator::new(&config).unwrap();
    let second = PortAllocator::new(&config).unwrap();

    let a = first.get_port().unwrap();
    let b = second.get_port().unwrap();

    assert!(range.contains(a));
    assert!(range.contains(b));
    assert_ne!(a, b);
}

/// WHY: Locks from unrelated tools in the same directory must not collide
/// REASON: The prefix is part of the marker name
#[test]
fn different_prefixes_do_not_share_locks() {
    let temp_dir = TempDir::new().unwrap();
    let stubs = AllocatorConfig::new(57830, 57830, temp_dir.path());
    let mut other = stubs.clone();
    other.lock_file_prefix = "db-".to_string();

    let a = PortAllocator::new(&stubs).unwrap();
    let b = PortAllocator::new(&other).unwrap();

    assert_eq!(a.get_port().unwrap(), 57830);
    assert_eq!(b.get_port().unwrap(), 57830);
}

/// WHY: The free functions are what test helpers call
/// REASON: One reservation per process, configured by environment
#[test]
fn global_allocator_reads_environment_and_memoizes() {
    let temp_dir = TempDir::new().unwrap();
    std::env::set_var("PORTLOCK_LOCK_DIR", temp_dir.path());
    std::env::set_var("PORTLOCK_RANGE_LOW", "57830");
    std::env::set_var("PORTLOCK_RANGE_HIGH", "57835");
    std::env::set_var("PORTLOCK_LOCK_PREFIX", "contract-global-");

    let port = portlock::get_port().unwrap();
    assert!((57830..=57835).contains(&port));
    assert_eq!(portlock::get_port().unwrap(), port);
    assert!(temp_dir
        .path()
        .join(format!("contract-global-{}.lock", port))
        .exists());

    portlock::release_port();
    portlock::release_port();
    assert_eq!(PortAllocator::global().unwrap().state(), AllocationState::Unallocated);
}
