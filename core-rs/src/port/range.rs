/**
 * range.rs
 * Inclusive candidate port range [start, end]
 */

use crate::errors::PortLockError;

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Create a range, rejecting `start > end` and port 0
    pub fn new(start: u16, end: u16) -> Result<Self, PortLockError> {
        if start == 0 || start > end {
            return Err(PortLockError::InvalidRange { start, end });
        }
        Ok(PortRange { start, end })
    }

    /// Check if port is within this range
    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Number of ports in the range; 0 for an inverted literal
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        usize::from(self.end) - usize::from(self.start) + 1
    }

    /// Only true for a range built by hand with `start > end`
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Ports in ascending order
    pub fn iter(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }
}
