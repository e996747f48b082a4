//! Which base DNs an operation may act on, and which IDs and replication
//! servers the new configuration must use.

use crate::descriptor::{ReplicaRef, ServerDescriptor};
use crate::dn;
use crate::error::TopologyError;
use crate::ids::IdAllocator;
use crate::snapshot::TopologySnapshot;
use std::collections::{BTreeMap, BTreeSet};

/// Relation between the replicas of a base DN present on two servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuffixRelation {
    /// The two replicas share no replication server.
    NotReplicated,
    /// Each replica's replication server is referenced by the other.
    FullyReplicated,
    /// The replicas share at least one replication server.
    Replicated,
    /// The replicas are not fully replicated.
    NotFullyReplicated,
    /// Any replica present on both servers.
    All,
}

impl SuffixRelation {
    fn holds(self, a: &ReplicaRef<'_>, b: &ReplicaRef<'_>) -> bool {
        match self {
            SuffixRelation::NotReplicated => !a.is_replicated_with(b),
            SuffixRelation::FullyReplicated => a.is_fully_replicated_with(b),
            SuffixRelation::Replicated => a.is_replicated_with(b),
            SuffixRelation::NotFullyReplicated => !a.is_fully_replicated_with(b),
            SuffixRelation::All => true,
        }
    }
}

/// Base DNs hosted by both servers whose replicas satisfy `relation`.
pub fn common_suffixes(
    first: &ServerDescriptor,
    second: &ServerDescriptor,
    relation: SuffixRelation,
) -> Vec<String> {
    let mut common = Vec::new();
    for a in first.replica_refs() {
        if let Some(b) = second.replica_ref(a.base_dn()) {
            if relation.holds(&a, &b) && !contains_dn(&common, a.base_dn()) {
                common.push(a.base_dn().to_string());
            }
        }
    }
    common
}

/// Case-insensitive DN membership.
pub fn contains_dn<S: AsRef<str>>(dns: &[S], candidate: &str) -> bool {
    dns.iter().any(|d| dn::dn_eq(d.as_ref(), candidate))
}

/// Outcome of filtering the requested base DNs of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuffixSelection {
    /// Requested base DNs the operation will act on.
    pub selected: Vec<String>,
    /// Requested base DNs for which the operation was already done.
    pub already_done: Vec<String>,
    /// Requested base DNs not eligible on one or both servers.
    pub not_found: Vec<String>,
    /// Every eligible base DN, requested or not.
    pub available: Vec<String>,
}

impl SuffixSelection {
    fn classify(requested: &[String], available: Vec<String>, done: Vec<String>) -> Self {
        let mut selection = SuffixSelection {
            available,
            ..Self::default()
        };
        for base_dn in requested {
            if contains_dn(&selection.selected, base_dn)
                || contains_dn(&selection.already_done, base_dn)
                || contains_dn(&selection.not_found, base_dn)
            {
                continue;
            }
            if let Some(found) = selection
                .available
                .iter()
                .find(|a| dn::dn_eq(a, base_dn))
            {
                selection.selected.push(found.clone());
            } else if contains_dn(&done, base_dn) {
                selection.already_done.push(base_dn.clone());
            } else {
                selection.not_found.push(base_dn.clone());
            }
        }
        selection
    }

    /// Eligible base DNs that may be offered in an interactive pick list.
    pub fn selectable(&self) -> Vec<String> {
        self.available
            .iter()
            .filter(|d| !dn::is_internal_suffix(d))
            .cloned()
            .collect()
    }

    /// True when nothing is left to act on.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Base DNs that can be replicated between two servers.
pub fn select_for_enable(
    requested: &[String],
    first: &ServerDescriptor,
    second: &ServerDescriptor,
) -> SuffixSelection {
    SuffixSelection::classify(
        requested,
        common_suffixes(first, second, SuffixRelation::NotFullyReplicated),
        common_suffixes(first, second, SuffixRelation::FullyReplicated),
    )
}

/// Base DNs whose replication can be disabled on a server.
pub fn select_for_disable(requested: &[String], server: &ServerDescriptor) -> SuffixSelection {
    let done = server
        .replicas
        .iter()
        .filter(|r| !r.replicated)
        .map(|r| r.base_dn.clone())
        .collect();
    SuffixSelection::classify(requested, server.replicated_base_dns(), done)
}

/// Base DNs that can be initialized from `source` onto `destination`.
pub fn select_for_initialize(
    requested: &[String],
    source: &ServerDescriptor,
    destination: &ServerDescriptor,
) -> SuffixSelection {
    SuffixSelection::classify(
        requested,
        common_suffixes(source, destination, SuffixRelation::Replicated),
        Vec::new(),
    )
}

/// Base DNs replicated on a single server: initialize-all, external
/// initialization and historical purge.
pub fn select_replicated(requested: &[String], server: &ServerDescriptor) -> SuffixSelection {
    SuffixSelection::classify(requested, server.replicated_base_dns(), Vec::new())
}

/// Add the internal suffixes enabling replication needs.
pub fn with_internal_suffixes(
    base_dns: &[String],
    admin_data: bool,
    schema: bool,
) -> Vec<String> {
    let mut all = base_dns.to_vec();
    if admin_data && !contains_dn(&all, dn::ADMIN_DATA_SUFFIX) {
        all.push(dn::ADMIN_DATA_SUFFIX.to_string());
    }
    if schema && !contains_dn(&all, dn::SCHEMA_SUFFIX) {
        all.push(dn::SCHEMA_SUFFIX.to_string());
    }
    all
}

/// Replication servers a domain of `base_dn` on `server` must talk to:
/// its own ones plus those of every suffix of the topology it already
/// shares a replication server with.
pub fn replication_servers_for(
    base_dn: &str,
    topology: &TopologySnapshot,
    server: &ServerDescriptor,
) -> BTreeSet<String> {
    let mut servers = server
        .replica(base_dn)
        .map(|r| r.replication_servers.clone())
        .unwrap_or_default();
    let own = servers.clone();
    for suffix in topology.suffixes_for(base_dn) {
        let suffix_servers = suffix.replication_servers();
        if !suffix_servers.is_disjoint(&own) {
            servers.extend(suffix_servers);
        }
    }
    servers
}

/// Everything needed to configure replication between two servers: the
/// replication server set of each base DN and the ID spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnablePlan {
    base_dns: Vec<String>,
    replication_servers: BTreeMap<String, BTreeSet<String>>,
    server_ids: IdAllocator,
    domain_ids: BTreeMap<String, IdAllocator>,
}

impl EnablePlan {
    /// Collect used IDs from both servers and both topologies, and the
    /// replication server sets from the replicas they already share.
    ///
    /// `new_replication_servers` are the addresses of the replication
    /// servers being enabled, added to every base DN.
    pub fn build(
        base_dns: &[String],
        servers: [&ServerDescriptor; 2],
        topologies: [&TopologySnapshot; 2],
        new_replication_servers: &BTreeSet<String>,
    ) -> Self {
        let mut server_ids = IdAllocator::new();
        for topology in topologies {
            server_ids.extend(topology.replication_server_ids());
        }
        for server in servers {
            server_ids.extend(server.replication_server_id());
        }

        let mut replication_servers = BTreeMap::new();
        let mut domain_ids = BTreeMap::new();
        for base_dn in base_dns {
            let key = dn::normalize(base_dn);
            let mut set = new_replication_servers.clone();
            for (server, topology) in servers.into_iter().zip(topologies) {
                set.extend(replication_servers_for(base_dn, topology, server));
            }
            replication_servers.insert(key.clone(), set);

            let mut ids = IdAllocator::new();
            for server in servers
                .iter()
                .copied()
                .chain(topologies.into_iter().flat_map(|t| t.servers().iter()))
            {
                ids.extend(server.replica(base_dn).and_then(|r| r.domain_id));
            }
            domain_ids.insert(key, ids);
        }

        Self {
            base_dns: base_dns.to_vec(),
            replication_servers,
            server_ids,
            domain_ids,
        }
    }

    /// The base DNs being configured.
    pub fn base_dns(&self) -> &[String] {
        &self.base_dns
    }

    /// Replication servers the domain of `base_dn` must reference.
    pub fn replication_servers(&self, base_dn: &str) -> BTreeSet<String> {
        self.replication_servers
            .get(&dn::normalize(base_dn))
            .cloned()
            .unwrap_or_default()
    }

    /// Union of the replication servers of every base DN; the peer set of
    /// the replication servers being configured.
    pub fn all_replication_servers(&self) -> BTreeSet<String> {
        self.replication_servers.values().flatten().cloned().collect()
    }

    /// Allocate a new replication server ID.
    pub fn allocate_server_id(&mut self) -> Result<u32, TopologyError> {
        self.server_ids.allocate()
    }

    /// Record a replication server ID found while applying the plan.
    pub fn reserve_server_id(&mut self, id: u32) {
        self.server_ids.reserve(id);
    }

    /// Allocate a new domain ID for `base_dn`.
    pub fn allocate_domain_id(&mut self, base_dn: &str) -> Result<u32, TopologyError> {
        self.domain_ids
            .entry(dn::normalize(base_dn))
            .or_default()
            .allocate()
    }

    /// Record a domain ID found while applying the plan.
    pub fn reserve_domain_id(&mut self, base_dn: &str, id: u32) {
        self.domain_ids
            .entry(dn::normalize(base_dn))
            .or_default()
            .reserve(id);
    }

    /// Replication server IDs considered used.
    pub fn used_server_ids(&self) -> &BTreeSet<u32> {
        self.server_ids.used()
    }
}
