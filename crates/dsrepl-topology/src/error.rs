//! Error types for the topology model.

use crate::registry::IdConflict;
use thiserror::Error;

/// Errors raised while reasoning about a replication topology.
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    /// The string is not a syntactically valid distinguished name.
    #[error("invalid DN: {dn}")]
    InvalidDn {
        /// The rejected input.
        dn: String,
    },

    /// Every identifier of an ID space is already in use.
    #[error("no free identifier left in 1..={max}")]
    IdSpaceExhausted {
        /// Largest identifier of the space.
        max: u32,
    },

    /// Two registries cannot be merged because their IDs collide.
    #[error("registries cannot be merged: {}", format_conflicts(.conflicts))]
    MergeConflicts {
        /// Every collision found between the two topologies.
        conflicts: Vec<IdConflict>,
    },
}

fn format_conflicts(conflicts: &[IdConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
