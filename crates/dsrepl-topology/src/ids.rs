//! Allocation of replication server and replication domain IDs.

use crate::error::TopologyError;
use std::collections::BTreeSet;

/// Largest ID a replication server or domain can carry.
pub const MAX_REPLICATION_ID: u32 = 65535;

/// Hands out the smallest positive ID that nobody uses yet.
///
/// Every allocated ID is reserved immediately, so two consecutive calls
/// never return the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAllocator {
    used: BTreeSet<u32>,
}

impl IdAllocator {
    /// Create an allocator with no used ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that treats the given IDs as used.
    pub fn with_used<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        let mut allocator = Self::new();
        allocator.extend(ids);
        allocator
    }

    /// Mark one ID as used.
    pub fn reserve(&mut self, id: u32) {
        self.used.insert(id);
    }

    /// Mark several IDs as used.
    pub fn extend<I: IntoIterator<Item = u32>>(&mut self, ids: I) {
        self.used.extend(ids);
    }

    /// True when the ID is already used.
    pub fn is_used(&self, id: u32) -> bool {
        self.used.contains(&id)
    }

    /// Every used ID.
    pub fn used(&self) -> &BTreeSet<u32> {
        &self.used
    }

    /// Allocate and reserve the smallest free ID.
    pub fn allocate(&mut self) -> Result<u32, TopologyError> {
        let mut candidate = 1;
        for &id in self.used.range(1..) {
            if id > candidate {
                break;
            }
            candidate = id + 1;
        }
        if candidate > MAX_REPLICATION_ID {
            return Err(TopologyError::IdSpaceExhausted {
                max: MAX_REPLICATION_ID,
            });
        }
        self.used.insert(candidate);
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_free_id() {
        let mut ids = IdAllocator::with_used([1, 2, 4]);
        assert_eq!(ids.allocate().unwrap(), 3);
        assert_eq!(ids.allocate().unwrap(), 5);
        assert!(ids.is_used(3));
    }

    #[test]
    fn test_zero_is_never_allocated() {
        let mut ids = IdAllocator::with_used([0]);
        assert_eq!(ids.allocate().unwrap(), 1);
        let mut empty = IdAllocator::new();
        assert_eq!(empty.allocate().unwrap(), 1);
        assert_eq!(empty.allocate().unwrap(), 2);
    }

    #[test]
    fn test_exhausted_space() {
        let mut ids = IdAllocator::with_used(1..=MAX_REPLICATION_ID);
        assert_eq!(
            ids.allocate(),
            Err(TopologyError::IdSpaceExhausted {
                max: MAX_REPLICATION_ID
            })
        );
    }
}
