/**
 * port module
 * Cross-process exclusive port allocation through advisory file locks
 */

pub mod allocator;
pub mod arbiter;
pub mod pool;
pub mod range;
pub mod status;

pub use allocator::{AllocationState, PortAllocator};
pub use arbiter::{Acquire, FileLockArbiter, LockArbiter, PortLock};
pub use pool::CandidatePool;
pub use range::PortRange;
pub use status::{scan_markers, MarkerState, MarkerStatus};
