//! What is left of a topology when a replication server goes away.
//!
//! Losing the last replication server of a still replicated suffix is
//! fatal; being left with a single one is tolerated after a warning.

use crate::descriptor::ServerDescriptor;
use crate::snapshot::TopologySnapshot;

/// How many replication servers remain available to a suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// No replication server remains.
    None,
    /// A single replication server remains: a single point of failure.
    One,
    /// At least two replication servers remain.
    Many(usize),
}

impl Availability {
    fn from_count(count: usize) -> Self {
        match count {
            0 => Availability::None,
            1 => Availability::One,
            n => Availability::Many(n),
        }
    }

    /// True when the removal must be refused.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Availability::None)
    }

    /// True when the removal needs a warning and a confirmation.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Availability::One)
    }
}

/// Availability of one suffix after the removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixAvailability {
    /// Base DN of the suffix.
    pub base_dn: String,
    /// Remaining replication servers.
    pub availability: Availability,
}

/// Assess, for every suffix that keeps replicas on other servers, how many
/// replication servers remain once `removed` stops being one.
///
/// Only addresses of servers known to act as replication servers in the
/// snapshot are counted.
pub fn assess_replication_server_removal(
    topology: &TopologySnapshot,
    removed: &ServerDescriptor,
) -> Vec<SuffixAvailability> {
    let Some(removed_address) = removed.replication_server_address() else {
        return Vec::new();
    };
    let removed_id = removed.id();
    let acting: Vec<String> = topology
        .servers()
        .iter()
        .filter(|s| s.id() != removed_id)
        .filter_map(|s| s.replication_server_address())
        .collect();

    let mut assessments = Vec::new();
    for suffix in topology.suffixes() {
        let servers = suffix.replication_servers();
        if !servers.contains(&removed_address) {
            continue;
        }
        let survivors = suffix
            .replicas
            .iter()
            .filter(|r| r.replica.replicated && r.server.id() != removed_id)
            .count();
        if survivors == 0 {
            continue;
        }
        let remaining = servers
            .iter()
            .filter(|a| **a != removed_address && acting.contains(a))
            .count();
        assessments.push(SuffixAvailability {
            base_dn: suffix.base_dn.clone(),
            availability: Availability::from_count(remaining),
        });
    }
    assessments
}
