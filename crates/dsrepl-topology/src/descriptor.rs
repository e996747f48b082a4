//! Read-only descriptions of servers and the replicas they host.

use crate::dn;
use crate::registry::ServerProperties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Canonical `host:port` form used in replication-server address sets.
pub fn replication_address(host: &str, port: u16) -> String {
    format!("{}:{}", host.to_lowercase(), port)
}

/// Lower-case every address of a set so that union and membership are
/// case-insensitive on the host part.
pub fn normalize_addresses<I, S>(addresses: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    addresses
        .into_iter()
        .map(|a| a.as_ref().trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect()
}

/// The replication server role of a directory server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationServerInfo {
    /// Replication server ID, unique in the topology.
    pub id: u32,
    /// Replication port.
    pub port: u16,
    /// True when replication traffic is encrypted.
    pub secure: bool,
    /// Addresses of the other replication servers this one connects to.
    pub peers: BTreeSet<String>,
}

/// The public key certificate a server publishes in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Key identifier.
    pub id: String,
    /// DER encoded certificate.
    pub certificate: Vec<u8>,
}

/// One base DN as hosted by one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    /// The base DN, as written in the server configuration.
    pub base_dn: String,
    /// True when a replication domain exists for this base DN.
    pub replicated: bool,
    /// The replication domain ID, when replicated.
    pub domain_id: Option<u32>,
    /// Number of entries, when the monitor exposes it.
    pub entries: Option<u64>,
    /// Replication servers the domain connects to.
    pub replication_servers: BTreeSet<String>,
    /// Changes applied elsewhere but not yet here.
    pub missing_changes: Option<u64>,
    /// Age in milliseconds of the oldest missing change.
    pub age_of_oldest_missing_change: Option<u64>,
}

impl ReplicaDescriptor {
    /// A replica that is not part of any replication domain.
    pub fn standalone(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            replicated: false,
            domain_id: None,
            entries: None,
            replication_servers: BTreeSet::new(),
            missing_changes: None,
            age_of_oldest_missing_change: None,
        }
    }

    /// A replicated replica with the given domain ID and replication servers.
    pub fn replicated<I, S>(base_dn: impl Into<String>, domain_id: u32, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            replicated: true,
            domain_id: Some(domain_id),
            replication_servers: normalize_addresses(servers),
            ..Self::standalone(base_dn)
        }
    }
}

/// Snapshot of one directory server.
///
/// Built once per read and never mutated afterwards; a configuration change
/// requires reading a fresh descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Host name used to reach the server.
    pub host: String,
    /// Administration port.
    pub admin_port: u16,
    /// LDAP port, when a plain LDAP listener is enabled.
    pub ldap_port: Option<u16>,
    /// LDAPS port, when an LDAPS listener is enabled.
    pub ldaps_port: Option<u16>,
    /// True when the LDAP listener allows StartTLS.
    pub starttls_enabled: bool,
    /// The replication server role, if any.
    pub replication_server: Option<ReplicationServerInfo>,
    /// Hosted suffixes.
    pub replicas: Vec<ReplicaDescriptor>,
    /// Generation ID of the schema, used to decide schema initialization.
    pub schema_generation_id: Option<String>,
    /// Public key certificate, if the server published one.
    pub instance_key: Option<InstanceKey>,
}

impl ServerDescriptor {
    /// A server with no replication configuration and no suffixes.
    pub fn new(host: impl Into<String>, admin_port: u16) -> Self {
        Self {
            host: host.into(),
            admin_port,
            ldap_port: None,
            ldaps_port: None,
            starttls_enabled: false,
            replication_server: None,
            replicas: Vec::new(),
            schema_generation_id: None,
            instance_key: None,
        }
    }

    /// Identifier of the server: `host:admin-port`.
    pub fn id(&self) -> String {
        replication_address(&self.host, self.admin_port)
    }

    /// True when the server acts as a replication server.
    pub fn is_replication_server(&self) -> bool {
        self.replication_server.is_some()
    }

    /// `host:replication-port`, when the server is a replication server.
    pub fn replication_server_address(&self) -> Option<String> {
        self.replication_server
            .as_ref()
            .map(|rs| replication_address(&self.host, rs.port))
    }

    /// The replication server ID, when the server is a replication server.
    pub fn replication_server_id(&self) -> Option<u32> {
        self.replication_server.as_ref().map(|rs| rs.id)
    }

    /// Look up the replica of a base DN.
    pub fn replica(&self, base_dn: &str) -> Option<&ReplicaDescriptor> {
        self.replicas.iter().find(|r| dn::dn_eq(&r.base_dn, base_dn))
    }

    /// Narrow view on the replica of a base DN.
    pub fn replica_ref(&self, base_dn: &str) -> Option<ReplicaRef<'_>> {
        self.replica(base_dn).map(|replica| ReplicaRef {
            server: self,
            replica,
        })
    }

    /// Narrow views on every hosted replica.
    pub fn replica_refs(&self) -> impl Iterator<Item = ReplicaRef<'_>> {
        self.replicas.iter().map(move |replica| ReplicaRef {
            server: self,
            replica,
        })
    }

    /// Base DNs of the replicated replicas.
    pub fn replicated_base_dns(&self) -> Vec<String> {
        self.replicas
            .iter()
            .filter(|r| r.replicated)
            .map(|r| r.base_dn.clone())
            .collect()
    }

    /// True when at least one replicated domain is not an internal suffix.
    pub fn has_replicated_user_suffix(&self) -> bool {
        self.replicas
            .iter()
            .any(|r| r.replicated && !dn::is_internal_suffix(&r.base_dn))
    }

    /// Every domain ID used on this server.
    pub fn domain_ids(&self) -> BTreeSet<u32> {
        self.replicas.iter().filter_map(|r| r.domain_id).collect()
    }

    /// The properties this server publishes in an administration registry.
    pub fn ads_properties(&self) -> ServerProperties {
        ServerProperties {
            id: self.id(),
            host: self.host.clone(),
            admin_port: self.admin_port,
            ldap_port: self.ldap_port,
            ldaps_port: self.ldaps_port,
            starttls_enabled: self.starttls_enabled,
            instance_key_id: self.instance_key.as_ref().map(|k| k.id.clone()),
            certificate: self.instance_key.as_ref().map(|k| k.certificate.clone()),
        }
    }
}

/// A replica together with the server hosting it.
///
/// This is the only view the reconciliation code needs; it cannot be
/// used to reach back into a suffix or mutate anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaRef<'a> {
    /// The hosting server.
    pub server: &'a ServerDescriptor,
    /// The replica itself.
    pub replica: &'a ReplicaDescriptor,
}

impl<'a> ReplicaRef<'a> {
    /// The replica's base DN.
    pub fn base_dn(&self) -> &'a str {
        &self.replica.base_dn
    }

    /// True when both replicas exchange changes directly through their
    /// replication servers, each one referencing the other.
    pub fn is_fully_replicated_with(&self, other: &ReplicaRef<'_>) -> bool {
        if !dn::dn_eq(self.base_dn(), other.base_dn())
            || !self.replica.replicated
            || !other.replica.replicated
        {
            return false;
        }
        match (
            self.server.replication_server_address(),
            other.server.replication_server_address(),
        ) {
            (Some(mine), Some(theirs)) => {
                other.replica.replication_servers.contains(&mine)
                    && self.replica.replication_servers.contains(&theirs)
            }
            _ => false,
        }
    }

    /// True when both replicas are replicated and share at least one
    /// replication server.
    pub fn is_replicated_with(&self, other: &ReplicaRef<'_>) -> bool {
        dn::dn_eq(self.base_dn(), other.base_dn())
            && self.replica.replicated
            && other.replica.replicated
            && !self
                .replica
                .replication_servers
                .is_disjoint(&other.replica.replication_servers)
    }
}
