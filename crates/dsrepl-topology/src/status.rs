//! Grouping of a topology snapshot into the rows of a status report.

use crate::descriptor::{ReplicaDescriptor, ServerDescriptor};
use crate::dn;
use crate::snapshot::TopologySnapshot;
use std::collections::{BTreeMap, BTreeSet};

/// One line of the status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRow<'a> {
    /// The server of the line.
    pub server: &'a ServerDescriptor,
    /// The replica, `None` for a replication server hosting no domain of
    /// the suffix.
    pub replica: Option<&'a ReplicaDescriptor>,
}

impl StatusRow<'_> {
    /// A replication server that carries no domain for the suffix.
    pub fn is_replication_server_only(&self) -> bool {
        self.replica.is_none()
    }

    /// A replicated domain hosted on a server that is not a replication
    /// server.
    pub fn is_domain_without_replication_server(&self) -> bool {
        self.replica.map(|r| r.replicated).unwrap_or(false) && !self.server.is_replication_server()
    }
}

/// All lines of one base DN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusGroup<'a> {
    /// Base DN of the group.
    pub base_dn: String,
    /// Lines sorted by server.
    pub rows: Vec<StatusRow<'a>>,
}

/// Group replicas by base DN, sorted by DN then by server.
///
/// With no requested base DN every non-internal suffix is shown.
pub fn status_groups<'a>(topology: &'a TopologySnapshot, requested: &[String]) -> Vec<StatusGroup<'a>> {
    let wanted = |base_dn: &str| {
        if requested.is_empty() {
            !dn::is_internal_suffix(base_dn)
        } else {
            requested.iter().any(|r| dn::dn_eq(r, base_dn))
        }
    };

    let mut groups: BTreeMap<String, StatusGroup<'a>> = BTreeMap::new();
    for server in topology.servers() {
        for replica in server.replicas.iter().filter(|r| wanted(&r.base_dn)) {
            groups
                .entry(dn::normalize(&replica.base_dn))
                .or_insert_with(|| StatusGroup {
                    base_dn: replica.base_dn.clone(),
                    rows: Vec::new(),
                })
                .rows
                .push(StatusRow {
                    server,
                    replica: Some(replica),
                });
        }
    }

    for group in groups.values_mut() {
        let referenced: BTreeSet<String> = group
            .rows
            .iter()
            .filter_map(|r| r.replica)
            .flat_map(|r| r.replication_servers.iter().cloned())
            .collect();
        for server in topology.servers() {
            let hosts_replica = group.rows.iter().any(|r| r.server.id() == server.id());
            let referenced_here = server
                .replication_server_address()
                .map(|a| referenced.contains(&a))
                .unwrap_or(false);
            if referenced_here && !hosts_replica {
                group.rows.push(StatusRow {
                    server,
                    replica: None,
                });
            }
        }
        group.rows.sort_by_key(|r| r.server.id());
    }

    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ReplicationServerInfo;

    fn server(host: &str, rs: bool, replicas: Vec<ReplicaDescriptor>) -> ServerDescriptor {
        let mut s = ServerDescriptor::new(host, 4444);
        if rs {
            s.replication_server = Some(ReplicationServerInfo {
                id: 1,
                port: 8989,
                secure: true,
                peers: BTreeSet::new(),
            });
        }
        s.replicas = replicas;
        s
    }

    #[test]
    fn test_groups_sorted_and_internal_hidden() {
        let topology = TopologySnapshot::new(vec![
            server(
                "b",
                true,
                vec![
                    ReplicaDescriptor::replicated("o=z", 1, ["b:8989"]),
                    ReplicaDescriptor::replicated("cn=schema", 2, ["b:8989"]),
                ],
            ),
            server("a", false, vec![ReplicaDescriptor::replicated("O=Z", 3, ["b:8989"])]),
            server("c", false, vec![ReplicaDescriptor::standalone("dc=a")]),
        ]);
        let groups = status_groups(&topology, &[]);
        let names: Vec<_> = groups.iter().map(|g| dn::normalize(&g.base_dn)).collect();
        assert_eq!(names, vec!["dc=a".to_string(), "o=z".to_string()]);
        let rows: Vec<_> = groups[1].rows.iter().map(|r| r.server.id()).collect();
        assert_eq!(rows, vec!["a:4444".to_string(), "b:4444".to_string()]);
        assert!(groups[1].rows[0].is_domain_without_replication_server());
        assert!(!groups[1].rows[1].is_domain_without_replication_server());
    }

    #[test]
    fn test_replication_server_only_rows() {
        let topology = TopologySnapshot::new(vec![
            server("rs", true, vec![]),
            server("ds", false, vec![ReplicaDescriptor::replicated("dc=x", 1, ["rs:8989"])]),
        ]);
        let groups = status_groups(&topology, &["DC=X".to_string()]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].rows.len(), 2);
        assert!(groups[0].rows[1].is_replication_server_only());
    }

    #[test]
    fn test_requested_internal_suffix_is_shown() {
        let topology = TopologySnapshot::new(vec![server(
            "a",
            true,
            vec![ReplicaDescriptor::replicated("cn=admin data", 1, ["a:8989"])],
        )]);
        assert_eq!(status_groups(&topology, &["cn=admin data".to_string()]).len(), 1);
    }
}
