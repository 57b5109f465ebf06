//! Read-only view of the marker files in a lock directory

use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use super::FileLockArbiter;
use crate::config::{parse_marker_file_name, AllocatorConfig};
use crate::errors::Result;

/// Lock state of one marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerState {
    /// Some process holds the lock
    Held,
    /// Marker exists but nobody holds it
    Free,
    /// Lock check failed (permissions, vanished file)
    Unknown,
}

/// One marker file and what the lock check found
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerStatus {
    pub port: u16,
    pub path: PathBuf,
    pub state: MarkerState,
    pub in_range: bool,
}

/// List markers for the configured prefix, sorted by port
///
/// A missing lock directory yields an empty list. Checking briefly takes each
/// free lock, so a concurrent allocator may see that candidate as busy.
pub fn scan_markers(config: &AllocatorConfig) -> Result<Vec<MarkerStatus>> {
    let range = config.port_range()?;

    let entries = match fs::read_dir(&config.lock_directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut markers = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let parsed = parse_marker_file_name(&config.lock_file_prefix, &file_name.to_string_lossy());
        let port = match parsed {
            Some(port) => port,
            None => continue,
        };

        let path = entry.path();
        let state = match FileLockArbiter::is_held(&path) {
            Ok(true) => MarkerState::Held,
            Ok(false) => MarkerState::Free,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "marker lock check failed");
                MarkerState::Unknown
            }
        };

        markers.push(MarkerStatus {
            port,
            path,
            state,
            in_range: range.contains(port),
        });
    }

    markers.sort_by_key(|m| m.port);
    Ok(markers)
}
