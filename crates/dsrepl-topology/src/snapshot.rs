//! Topology snapshots: every server known through a registry, read at one
//! moment in time.

use crate::descriptor::{ReplicaRef, ServerDescriptor};
use crate::dn;
use std::collections::{BTreeMap, BTreeSet};

/// Servers read from one registry.
///
/// A snapshot is never refreshed; after configuration changes a new one
/// has to be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    servers: Vec<ServerDescriptor>,
}

/// The cross-server view of one base DN: replicas sharing at least one
/// replication server, directly or transitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixDescriptor<'a> {
    /// Base DN as written on the first replica found.
    pub base_dn: String,
    /// Members of the suffix.
    pub replicas: Vec<ReplicaRef<'a>>,
}

impl SuffixDescriptor<'_> {
    /// Union of the replication servers of every member.
    pub fn replication_servers(&self) -> BTreeSet<String> {
        self.replicas
            .iter()
            .flat_map(|r| r.replica.replication_servers.iter().cloned())
            .collect()
    }

    /// True when one member is hosted by the given server.
    pub fn contains_server(&self, server_id: &str) -> bool {
        self.replicas.iter().any(|r| r.server.id() == server_id)
    }
}

impl TopologySnapshot {
    /// Build a snapshot from already read servers. Later duplicates of the
    /// same server replace earlier ones.
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        let mut snapshot = Self::default();
        for server in servers {
            snapshot.insert(server);
        }
        snapshot
    }

    /// Add a server, replacing a previous read of the same server.
    pub fn insert(&mut self, server: ServerDescriptor) {
        let id = server.id();
        match self.servers.iter_mut().find(|s| s.id() == id) {
            Some(existing) => *existing = server,
            None => self.servers.push(server),
        }
    }

    /// Every server.
    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    /// Look up a server by `host:admin-port`.
    pub fn server(&self, id: &str) -> Option<&ServerDescriptor> {
        let id = id.to_lowercase();
        self.servers.iter().find(|s| s.id() == id)
    }

    /// Number of servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// True when no server was read.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Number of servers acting as replication servers.
    pub fn acting_replication_servers(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.is_replication_server())
            .count()
    }

    /// Every replication server ID in use.
    pub fn replication_server_ids(&self) -> BTreeSet<u32> {
        self.servers
            .iter()
            .filter_map(|s| s.replication_server_id())
            .collect()
    }

    /// Every domain ID in use, across all base DNs.
    pub fn domain_ids(&self) -> BTreeSet<u32> {
        self.servers.iter().flat_map(|s| s.domain_ids()).collect()
    }

    /// Group replicas by base DN and then by shared replication servers.
    ///
    /// Replicas that are not replicated each form their own suffix.
    pub fn suffixes(&self) -> Vec<SuffixDescriptor<'_>> {
        let mut by_dn: BTreeMap<String, Vec<ReplicaRef<'_>>> = BTreeMap::new();
        for server in &self.servers {
            for replica in server.replica_refs() {
                by_dn
                    .entry(dn::normalize(replica.base_dn()))
                    .or_default()
                    .push(replica);
            }
        }

        let mut suffixes = Vec::new();
        for replicas in by_dn.into_values() {
            let mut groups: Vec<Vec<ReplicaRef<'_>>> = Vec::new();
            for replica in replicas {
                if !replica.replica.replicated {
                    groups.push(vec![replica]);
                    continue;
                }
                let (joined, rest): (Vec<_>, Vec<_>) = groups.into_iter().partition(|group| {
                    group.iter().any(|member| member.is_replicated_with(&replica))
                });
                groups = rest;
                let mut merged: Vec<ReplicaRef<'_>> = joined.into_iter().flatten().collect();
                merged.push(replica);
                groups.push(merged);
            }
            for group in groups {
                let base_dn = group[0].base_dn().to_string();
                suffixes.push(SuffixDescriptor {
                    base_dn,
                    replicas: group,
                });
            }
        }
        suffixes
    }

    /// Suffixes of a given base DN.
    pub fn suffixes_for(&self, base_dn: &str) -> Vec<SuffixDescriptor<'_>> {
        self.suffixes()
            .into_iter()
            .filter(|s| dn::dn_eq(&s.base_dn, base_dn))
            .collect()
    }
}
