//! Per-candidate advisory file locks
//!
//! A candidate port is reserved by holding an exclusive `flock` on its marker
//! file. The file's existence and content mean nothing; only the lock counts.
//! The OS drops the lock when the descriptor is closed, including when the
//! holding process dies, so there is no stale state to clean up.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::{marker_file_name, AllocatorConfig};
use crate::errors::{PortLockError, Result};

/// Outcome of a single non-blocking lock attempt
#[derive(Debug)]
pub enum Acquire<H> {
    /// Lock held; keep the handle alive to keep the reservation
    Locked(H),
    /// Another open file description holds the lock
    Busy,
    /// Opening or locking the marker failed; treated like `Busy`
    SoftError(io::Error),
}

impl<H> Acquire<H> {
    pub fn is_locked(&self) -> bool {
        matches!(self, Acquire::Locked(_))
    }
}

/// Lock primitive the allocator drives, one candidate at a time
pub trait LockArbiter: Send + Sync {
    /// Proof of ownership; dropping it must release the lock
    type Handle: Send;

    /// Called once before each search
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Try to lock `port` without blocking
    fn try_acquire(&self, port: u16) -> Acquire<Self::Handle>;

    /// Release a held lock; best-effort, never fails
    fn release(&self, handle: Self::Handle);
}

/// Open, locked marker file for one port
#[derive(Debug)]
pub struct PortLock {
    port: u16,
    path: PathBuf,
    file: File,
}

impl PortLock {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `flock`-backed arbiter over marker files in one directory
#[derive(Debug, Clone)]
pub struct FileLockArbiter {
    lock_directory: PathBuf,
    prefix: String,
}

impl FileLockArbiter {
    pub fn new(config: &AllocatorConfig) -> Self {
        FileLockArbiter {
            lock_directory: config.lock_directory.clone(),
            prefix: config.lock_file_prefix.clone(),
        }
    }

    pub fn lock_directory(&self) -> &Path {
        &self.lock_directory
    }

    pub fn marker_path(&self, port: u16) -> PathBuf {
        self.lock_directory.join(marker_file_name(&self.prefix, port))
    }

    /// Check whether some process currently holds the lock on `path`
    ///
    /// Briefly takes the lock if it is free and releases it before returning.
    /// Never creates the file.
    pub fn is_held(path: &Path) -> io::Result<bool> {
        let file = OpenOptions::new().read(true).open(path)?;
        let acquired = try_flock_exclusive(&file)?;
        if acquired {
            unlock(&file);
        }
        Ok(!acquired)
    }

    fn open_marker(&self, path: &Path) -> io::Result<File> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}

impl LockArbiter for FileLockArbiter {
    type Handle = PortLock;

    fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.lock_directory).map_err(|source| {
            PortLockError::LockDirectory {
                path: self.lock_directory.clone(),
                source,
            }
        })
    }

    fn try_acquire(&self, port: u16) -> Acquire<PortLock> {
        let path = self.marker_path(port);

        let file = match self.open_marker(&path) {
            Ok(file) => file,
            Err(e) => return Acquire::SoftError(e),
        };

        match try_flock_exclusive(&file) {
            Ok(true) => Acquire::Locked(PortLock { port, path, file }),
            // `file` drops here, closing the descriptor
            Ok(false) => Acquire::Busy,
            Err(e) => Acquire::SoftError(e),
        }
    }

    fn release(&self, handle: PortLock) {
        unlock(&handle.file);
        drop(handle);
    }
}

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if the file is
/// already locked through another open file description.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }

    #[cfg(not(unix))]
    {
        let _ = file;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "advisory port locks require flock",
        ))
    }
}

/// Explicit unlock; close() would release it too
fn unlock(file: &File) {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fd is a valid descriptor owned by `file`.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            tracing::debug!(
                error = %io::Error::last_os_error(),
                "explicit unlock failed, relying on close"
            );
        }
    }

    #[cfg(not(unix))]
    {
        let _ = file;
    }
}
