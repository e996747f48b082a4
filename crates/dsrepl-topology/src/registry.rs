//! Administration registry (ADS) model and merge planning.
//!
//! A registry lists the servers of one administered topology. Linking two
//! servers that each carry their own registry means deciding which one
//! survives, and refusing to merge when the two topologies reuse IDs.

use crate::descriptor::InstanceKey;
use crate::dn;
use crate::error::TopologyError;
use crate::snapshot::TopologySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Properties of a server as stored in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProperties {
    /// Registry key: `host:admin-port`.
    pub id: String,
    /// Host name.
    pub host: String,
    /// Administration port.
    pub admin_port: u16,
    /// LDAP port.
    pub ldap_port: Option<u16>,
    /// LDAPS port.
    pub ldaps_port: Option<u16>,
    /// StartTLS availability on the LDAP port.
    pub starttls_enabled: bool,
    /// Identifier of the published instance key.
    pub instance_key_id: Option<String>,
    /// DER encoded certificate. Ignored by [`ServerProperties::same_as`].
    pub certificate: Option<Vec<u8>>,
}

impl ServerProperties {
    /// Compare every property except the binary certificate.
    pub fn same_as(&self, other: &ServerProperties) -> bool {
        self.id.eq_ignore_ascii_case(&other.id)
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.admin_port == other.admin_port
            && self.ldap_port == other.ldap_port
            && self.ldaps_port == other.ldaps_port
            && self.starttls_enabled == other.starttls_enabled
            && self.instance_key_id == other.instance_key_id
    }
}

/// A registered administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministratorProperties {
    /// Administrator UID.
    pub uid: String,
    /// Free-form description.
    pub description: Option<String>,
}

/// Content of one administration registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Registered servers.
    pub servers: Vec<ServerProperties>,
    /// Registered administrators.
    pub administrators: Vec<AdministratorProperties>,
    /// Published instance keys, the trust anchors of the topology.
    pub instance_keys: Vec<InstanceKey>,
}

impl Registry {
    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// True when no server is registered.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Look up a server by its `host:admin-port` key.
    pub fn server(&self, id: &str) -> Option<&ServerProperties> {
        self.servers.iter().find(|s| s.id.eq_ignore_ascii_case(id))
    }

    /// True when the server is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.server(id).is_some()
    }

    /// Registry equality ignoring binary certificate fields.
    pub fn equivalent(&self, other: &Registry) -> bool {
        if self.servers.len() != other.servers.len() {
            return false;
        }
        let servers_match = self.servers.iter().all(|mine| {
            other
                .server(&mine.id)
                .map(|theirs| mine.same_as(theirs))
                .unwrap_or(false)
        });
        let admins = |r: &Registry| -> BTreeSet<String> {
            r.administrators.iter().map(|a| a.uid.to_lowercase()).collect()
        };
        servers_match && admins(self) == admins(other)
    }
}

/// One of the two servers being linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The first server of the command line.
    First,
    /// The second server of the command line.
    Second,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

/// What to do with the registries of two servers being linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryAction {
    /// Neither server has a registry: create one on the first server.
    CreateOnFirst,
    /// Register the other server into the registry of `source`.
    RegisterInto {
        /// The side whose registry survives.
        source: Side,
    },
    /// Both registries hold several servers and differ: merge them.
    Merge,
    /// Both servers already share the same registry.
    AlreadyShared,
}

/// Decide how the registries of two servers are unified.
///
/// A registry with at most one server is considered disposable; the other
/// side becomes the source.
pub fn decide_registry_action(first: Option<&Registry>, second: Option<&Registry>) -> RegistryAction {
    match (first, second) {
        (None, None) => RegistryAction::CreateOnFirst,
        (Some(_), None) => RegistryAction::RegisterInto { source: Side::First },
        (None, Some(_)) => RegistryAction::RegisterInto {
            source: Side::Second,
        },
        (Some(first), Some(second)) => {
            if second.len() <= 1 {
                RegistryAction::RegisterInto { source: Side::First }
            } else if first.len() <= 1 {
                RegistryAction::RegisterInto {
                    source: Side::Second,
                }
            } else if !first.equivalent(second) {
                RegistryAction::Merge
            } else {
                RegistryAction::AlreadyShared
            }
        }
    }
}

/// Source of a merge given the number of acting replication servers on
/// each side. Ties go to the first server.
pub fn merge_source(first_replication_servers: usize, second_replication_servers: usize) -> Side {
    if first_replication_servers >= second_replication_servers {
        Side::First
    } else {
        Side::Second
    }
}

/// Pick the merge source between two topologies.
pub fn choose_merge_source(first: &TopologySnapshot, second: &TopologySnapshot) -> Side {
    merge_source(
        first.acting_replication_servers(),
        second.acting_replication_servers(),
    )
}

/// An ID used by both topologies for different things.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdConflict {
    /// Two replication servers share an ID but not an address.
    ReplicationServer {
        /// The shared ID.
        id: u32,
        /// Address on the first topology.
        first: String,
        /// Address on the second topology.
        second: String,
    },
    /// Two servers use the same domain ID for the same base DN.
    Domain {
        /// Base DN of the domain.
        base_dn: String,
        /// The shared ID.
        id: u32,
        /// Server of the first topology.
        first: String,
        /// Server of the second topology.
        second: String,
    },
}

impl fmt::Display for IdConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdConflict::ReplicationServer { id, first, second } => write!(
                f,
                "replication server ID {} is used by both {} and {}",
                id, first, second
            ),
            IdConflict::Domain {
                base_dn,
                id,
                first,
                second,
            } => write!(
                f,
                "domain ID {} of {} is used by both {} and {}",
                id, base_dn, first, second
            ),
        }
    }
}

/// Enumerate every ID collision between two topologies.
///
/// A server present in both topologies is not in conflict with itself.
pub fn detect_id_conflicts(first: &TopologySnapshot, second: &TopologySnapshot) -> Vec<IdConflict> {
    let mut conflicts = BTreeSet::new();
    for s1 in first.servers() {
        for s2 in second.servers() {
            if s1.id() == s2.id() {
                continue;
            }
            if let (Some(rs1), Some(rs2)) = (&s1.replication_server, &s2.replication_server) {
                let (a1, a2) = (
                    s1.replication_server_address().unwrap_or_default(),
                    s2.replication_server_address().unwrap_or_default(),
                );
                if rs1.id == rs2.id && a1 != a2 {
                    conflicts.insert(IdConflict::ReplicationServer {
                        id: rs1.id,
                        first: a1,
                        second: a2,
                    });
                }
            }
            for r1 in s1.replicas.iter().filter(|r| r.replicated) {
                for r2 in s2.replicas.iter().filter(|r| r.replicated) {
                    if !dn::dn_eq(&r1.base_dn, &r2.base_dn) {
                        continue;
                    }
                    if let (Some(id1), Some(id2)) = (r1.domain_id, r2.domain_id) {
                        if id1 == id2 {
                            conflicts.insert(IdConflict::Domain {
                                base_dn: r1.base_dn.clone(),
                                id: id1,
                                first: s1.id(),
                                second: s2.id(),
                            });
                        }
                    }
                }
            }
        }
    }
    conflicts.into_iter().collect()
}

/// Fail with every conflict when the two topologies cannot be merged.
pub fn check_mergeable(first: &TopologySnapshot, second: &TopologySnapshot) -> Result<(), TopologyError> {
    let conflicts = detect_id_conflicts(first, second);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(TopologyError::MergeConflicts { conflicts })
    }
}
