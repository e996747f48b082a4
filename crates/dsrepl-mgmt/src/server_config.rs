//! Reading and writing the replication configuration of one server.
//!
//! Every write is committed before the next read; nothing is batched.

use crate::directory::{Directory, DirectoryError, Entry, Filter, Modification, Scope};
use chrono::{DateTime, NaiveDateTime, Utc};
use dsrepl_topology::descriptor::{normalize_addresses, InstanceKey, ReplicationServerInfo};
use dsrepl_topology::{dn, EnablePlan, ReplicaDescriptor, ServerDescriptor, TopologyError};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info};

pub const SYNC_PROVIDER_DN: &str =
    "cn=Multimaster Synchronization,cn=Synchronization Providers,cn=config";
pub const REPLICATION_SERVER_DN: &str =
    "cn=Replication Server,cn=Multimaster Synchronization,cn=Synchronization Providers,cn=config";
pub const DOMAINS_DN: &str =
    "cn=domains,cn=Multimaster Synchronization,cn=Synchronization Providers,cn=config";
pub const CRYPTO_MANAGER_DN: &str = "cn=Crypto Manager,cn=config";
pub const BACKENDS_DN: &str = "cn=Backends,cn=config";
pub const CONNECTION_HANDLERS_DN: &str = "cn=Connection Handlers,cn=config";
pub const MONITOR_DN: &str = "cn=monitor";
pub const INSTANCE_KEY_DN: &str = "ds-cfg-key-id=ads-certificate,cn=ads-truststore";
pub const ROOT_DSE_DN: &str = "";

const REPLICATION_PLUGIN_CLASS: &str = "org.opends.server.replication.plugin.MultimasterReplication";

/// Backends that never hold replicable data.
const INTERNAL_BACKENDS: [&str; 5] = ["config", "monitor", "backup", "tasks", "ads-truststore"];

/// Errors of configuration writes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("{dn}: missing or invalid {attribute}")]
    InvalidEntry { dn: String, attribute: String },
}

fn required<T: std::str::FromStr>(entry: &Entry, attribute: &str) -> Result<T, ConfigError> {
    entry.parse(attribute).ok_or_else(|| ConfigError::InvalidEntry {
        dn: entry.dn.clone(),
        attribute: attribute.to_string(),
    })
}

/// Search that treats a missing base as an empty result.
pub async fn search_or_empty(
    dir: &dyn Directory,
    base: &str,
    scope: Scope,
    filter: &Filter,
) -> Result<Vec<Entry>, DirectoryError> {
    match dir.search(base, scope, filter, &[]).await {
        Ok(entries) => Ok(entries),
        Err(e) if e.is_no_such_object() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Configuration entry of the replication domain of `base_dn`.
pub fn domain_dn(base_dn: &str) -> String {
    format!("cn={},{}", dn::escape_rdn_value(base_dn), DOMAINS_DN)
}

/// Read the replication configuration, suffixes and monitoring data of a
/// server into a fresh descriptor.
pub async fn read_server_descriptor(
    dir: &dyn Directory,
    host: &str,
    admin_port: u16,
) -> Result<ServerDescriptor, ConfigError> {
    let mut server = ServerDescriptor::new(host, admin_port);

    let handlers = search_or_empty(
        dir,
        CONNECTION_HANDLERS_DN,
        Scope::OneLevel,
        &Filter::object_class("ds-cfg-ldap-connection-handler"),
    )
    .await?;
    for handler in handlers.iter().filter(|h| h.flag("ds-cfg-enabled") != Some(false)) {
        let port = handler.parse::<u16>("ds-cfg-listen-port");
        if handler.flag("ds-cfg-use-ssl") == Some(true) {
            server.ldaps_port = port;
        } else {
            server.ldap_port = port;
            server.starttls_enabled = handler.flag("ds-cfg-allow-start-tls") == Some(true);
        }
    }

    if let Some(rs) = dir.read_entry(REPLICATION_SERVER_DN, &[]).await? {
        let secure = dir
            .read_entry(CRYPTO_MANAGER_DN, &["ds-cfg-ssl-encryption"])
            .await?
            .and_then(|e| e.flag("ds-cfg-ssl-encryption"))
            .unwrap_or(false);
        server.replication_server = Some(ReplicationServerInfo {
            id: required(&rs, "ds-cfg-replication-server-id")?,
            port: required(&rs, "ds-cfg-replication-port")?,
            secure,
            peers: normalize_addresses(rs.values("ds-cfg-replication-server")),
        });
    }

    let backends = search_or_empty(
        dir,
        BACKENDS_DN,
        Scope::OneLevel,
        &Filter::Present("ds-cfg-base-dn".to_string()),
    )
    .await?;
    for backend in backends.iter().filter(|b| b.flag("ds-cfg-enabled") != Some(false)) {
        let id = backend.first("ds-cfg-backend-id").unwrap_or_default();
        if INTERNAL_BACKENDS.iter().any(|i| i.eq_ignore_ascii_case(id)) {
            continue;
        }
        for base_dn in backend.values("ds-cfg-base-dn") {
            if server.replica(base_dn).is_none() {
                server.replicas.push(ReplicaDescriptor::standalone(base_dn.clone()));
            }
        }
    }

    let domains = search_or_empty(
        dir,
        DOMAINS_DN,
        Scope::OneLevel,
        &Filter::Present("ds-cfg-base-dn".to_string()),
    )
    .await?;
    for domain in &domains {
        let base_dn = domain.first("ds-cfg-base-dn").unwrap_or_default().to_string();
        let domain_id: u32 = required(domain, "ds-cfg-server-id")?;
        let servers = normalize_addresses(domain.values("ds-cfg-replication-server"));
        match server.replicas.iter_mut().find(|r| dn::dn_eq(&r.base_dn, &base_dn)) {
            Some(replica) => {
                replica.replicated = true;
                replica.domain_id = Some(domain_id);
                replica.replication_servers = servers;
            }
            None => server
                .replicas
                .push(ReplicaDescriptor::replicated(base_dn, domain_id, servers)),
        }
    }

    read_monitoring(dir, &mut server).await;

    server.schema_generation_id = dir
        .read_entry(dn::SCHEMA_SUFFIX, &["ds-sync-generation-id"])
        .await?
        .and_then(|e| e.first("ds-sync-generation-id").map(str::to_string));

    server.instance_key = dir
        .read_entry(INSTANCE_KEY_DN, &[])
        .await?
        .and_then(|e| {
            let certificate = e.binary("ds-cfg-public-key-certificate;binary")?.to_vec();
            Some(InstanceKey {
                id: e.first("ds-cfg-key-id")?.to_string(),
                certificate,
            })
        });

    debug!(
        "read {}: replication server {:?}, {} replicas",
        server.id(),
        server.replication_server_id(),
        server.replicas.len()
    );
    Ok(server)
}

/// Entry counts and replication delays. The monitor backend is optional:
/// failures only leave the numbers unknown.
async fn read_monitoring(dir: &dyn Directory, server: &mut ServerDescriptor) {
    match search_or_empty(
        dir,
        MONITOR_DN,
        Scope::Subtree,
        &Filter::Present("ds-base-dn-entry-count".to_string()),
    )
    .await
    {
        Ok(entries) => {
            for value in entries.iter().flat_map(|e| e.values("ds-base-dn-entry-count")) {
                if let Some((count, base_dn)) = value.split_once(' ') {
                    if let Some(replica) = server
                        .replicas
                        .iter_mut()
                        .find(|r| dn::dn_eq(&r.base_dn, base_dn))
                    {
                        replica.entries = count.trim().parse().ok();
                    }
                }
            }
        }
        Err(e) => debug!("entry counts of {} unavailable: {}", server.id(), e),
    }

    match search_or_empty(
        dir,
        MONITOR_DN,
        Scope::Subtree,
        &Filter::Present("missing-changes".to_string()),
    )
    .await
    {
        Ok(entries) => {
            for entry in entries {
                let Some(base_dn) = entry.first("domain-name") else {
                    continue;
                };
                let server_id = entry.parse::<u32>("server-id");
                if let Some(replica) = server.replicas.iter_mut().find(|r| {
                    dn::dn_eq(&r.base_dn, base_dn) && (server_id.is_none() || r.domain_id == server_id)
                }) {
                    replica.missing_changes = entry.parse("missing-changes");
                    replica.age_of_oldest_missing_change =
                        entry.parse("approx-older-change-not-synchronized-millis");
                }
            }
        }
        Err(e) => debug!("replication monitoring of {} unavailable: {}", server.id(), e),
    }
}

/// Current time of the server, from the root DSE.
pub async fn read_server_time(dir: &dyn Directory) -> Result<Option<DateTime<Utc>>, DirectoryError> {
    let entry = dir.read_entry(ROOT_DSE_DN, &["currentTime"]).await?;
    Ok(entry
        .and_then(|e| e.first("currenttime").map(str::to_string))
        .and_then(|t| NaiveDateTime::parse_from_str(t.trim(), "%Y%m%d%H%M%SZ").ok())
        .map(|t| t.and_utc()))
}

/// What an idempotent write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Create the synchronization provider when missing and enable it when
/// disabled. An enabled provider is left alone.
pub async fn ensure_sync_provider(dir: &dyn Directory) -> Result<Change, ConfigError> {
    let change = match dir.read_entry(SYNC_PROVIDER_DN, &[]).await? {
        None => {
            let provider = Entry::new(SYNC_PROVIDER_DN)
                .with(
                    "objectclass",
                    [
                        "top",
                        "ds-cfg-synchronization-provider",
                        "ds-cfg-replication-synchronization-provider",
                    ],
                )
                .with("cn", ["Multimaster Synchronization"])
                .with("ds-cfg-enabled", ["true"])
                .with("ds-cfg-java-class", [REPLICATION_PLUGIN_CLASS]);
            dir.add(&provider).await?;
            info!("created the replication synchronization provider on {}", dir.address());
            Change::Created
        }
        Some(provider) if provider.flag("ds-cfg-enabled") == Some(false) => {
            dir.modify(
                SYNC_PROVIDER_DN,
                &[Modification::Replace(
                    "ds-cfg-enabled".to_string(),
                    vec!["true".to_string()],
                )],
            )
            .await?;
            info!("enabled the replication synchronization provider on {}", dir.address());
            Change::Updated
        }
        Some(_) => Change::Unchanged,
    };
    if dir.read_entry(DOMAINS_DN, &[]).await?.is_none() {
        let branch = Entry::new(DOMAINS_DN)
            .with("objectclass", ["top", "ds-cfg-branch"])
            .with("cn", ["domains"]);
        dir.add(&branch).await?;
    }
    Ok(change)
}

fn merged(existing: &[String], wanted: &BTreeSet<String>) -> Option<Vec<String>> {
    let current = normalize_addresses(existing);
    let union: BTreeSet<String> = current.union(wanted).cloned().collect();
    if union == current {
        None
    } else {
        Some(union.into_iter().collect())
    }
}

async fn set_ssl_encryption(dir: &dyn Directory, secure: bool) -> Result<(), ConfigError> {
    let current = dir
        .read_entry(CRYPTO_MANAGER_DN, &["ds-cfg-ssl-encryption"])
        .await?
        .and_then(|e| e.flag("ds-cfg-ssl-encryption"));
    match current {
        Some(value) if value == secure => Ok(()),
        Some(_) => {
            dir.modify(
                CRYPTO_MANAGER_DN,
                &[Modification::Replace(
                    "ds-cfg-ssl-encryption".to_string(),
                    vec![secure.to_string()],
                )],
            )
            .await?;
            Ok(())
        }
        None if !secure => Ok(()),
        None => {
            dir.modify(
                CRYPTO_MANAGER_DN,
                &[Modification::Add(
                    "ds-cfg-ssl-encryption".to_string(),
                    vec!["true".to_string()],
                )],
            )
            .await?;
            Ok(())
        }
    }
}

/// Make the server a replication server talking to `peers`.
///
/// An existing replication server keeps its ID and port; its peer set only
/// grows. Returns the replication server ID.
pub async fn configure_replication_server(
    dir: &dyn Directory,
    port: u16,
    secure: bool,
    peers: &BTreeSet<String>,
    plan: &mut EnablePlan,
) -> Result<(u32, Change), ConfigError> {
    match dir.read_entry(REPLICATION_SERVER_DN, &[]).await? {
        None => {
            set_ssl_encryption(dir, secure).await?;
            let id = plan.allocate_server_id()?;
            let entry = Entry::new(REPLICATION_SERVER_DN)
                .with("objectclass", ["top", "ds-cfg-replication-server"])
                .with("cn", ["Replication Server"])
                .with("ds-cfg-replication-server-id", [id.to_string()])
                .with("ds-cfg-replication-port", [port.to_string()])
                .with("ds-cfg-replication-server", peers.iter().cloned());
            dir.add(&entry).await?;
            info!("created replication server {} on {} (port {})", id, dir.address(), port);
            Ok((id, Change::Created))
        }
        Some(entry) => {
            let id: u32 = required(&entry, "ds-cfg-replication-server-id")?;
            plan.reserve_server_id(id);
            let change = merge_peer_values(dir, &entry, REPLICATION_SERVER_DN, peers).await?;
            Ok((id, change))
        }
    }
}

async fn merge_peer_values(
    dir: &dyn Directory,
    entry: &Entry,
    entry_dn: &str,
    peers: &BTreeSet<String>,
) -> Result<Change, ConfigError> {
    match merged(entry.values("ds-cfg-replication-server"), peers) {
        Some(values) => {
            dir.modify(
                entry_dn,
                &[Modification::Replace("ds-cfg-replication-server".to_string(), values)],
            )
            .await?;
            info!("updated replication servers of {} on {}", entry_dn, dir.address());
            Ok(Change::Updated)
        }
        None => Ok(Change::Unchanged),
    }
}

/// Add peers to an existing replication server. A server that is not a
/// replication server is left alone.
pub async fn merge_replication_server_peers(
    dir: &dyn Directory,
    peers: &BTreeSet<String>,
) -> Result<Change, ConfigError> {
    match dir.read_entry(REPLICATION_SERVER_DN, &[]).await? {
        Some(entry) => merge_peer_values(dir, &entry, REPLICATION_SERVER_DN, peers).await,
        None => Ok(Change::Unchanged),
    }
}

/// The domain entry of `base_dn`, if any.
pub async fn find_domain(dir: &dyn Directory, base_dn: &str) -> Result<Option<Entry>, DirectoryError> {
    let domains = search_or_empty(
        dir,
        DOMAINS_DN,
        Scope::OneLevel,
        &Filter::Present("ds-cfg-base-dn".to_string()),
    )
    .await?;
    Ok(domains.into_iter().find(|d| {
        d.first("ds-cfg-base-dn")
            .map(|b| dn::dn_eq(b, base_dn))
            .unwrap_or(false)
    }))
}

/// Make sure a domain of `base_dn` exists and references `replication_servers`.
/// An existing domain keeps its ID; its replication server set only grows.
/// Returns the domain ID.
pub async fn configure_domain(
    dir: &dyn Directory,
    base_dn: &str,
    replication_servers: &BTreeSet<String>,
    plan: &mut EnablePlan,
) -> Result<(u32, Change), ConfigError> {
    match find_domain(dir, base_dn).await? {
        None => {
            let id = plan.allocate_domain_id(base_dn)?;
            let entry = Entry::new(domain_dn(base_dn))
                .with("objectclass", ["top", "ds-cfg-replication-domain"])
                .with("cn", [base_dn])
                .with("ds-cfg-base-dn", [base_dn])
                .with("ds-cfg-server-id", [id.to_string()])
                .with("ds-cfg-replication-server", replication_servers.iter().cloned());
            dir.add(&entry).await?;
            info!("created replication domain {} for {} on {}", id, base_dn, dir.address());
            Ok((id, Change::Created))
        }
        Some(entry) => {
            let id: u32 = required(&entry, "ds-cfg-server-id")?;
            plan.reserve_domain_id(base_dn, id);
            let change = merge_peer_values(dir, &entry, &entry.dn, replication_servers).await?;
            Ok((id, change))
        }
    }
}

/// Delete the domain of `base_dn`. Returns false when there was none.
pub async fn remove_domain(dir: &dyn Directory, base_dn: &str) -> Result<bool, DirectoryError> {
    match find_domain(dir, base_dn).await? {
        Some(entry) => {
            dir.delete(&entry.dn).await?;
            info!("removed replication domain of {} on {}", base_dn, dir.address());
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Delete the replication server. Returns false when there was none.
pub async fn remove_replication_server(dir: &dyn Directory) -> Result<bool, DirectoryError> {
    if dir.read_entry(REPLICATION_SERVER_DN, &[]).await?.is_none() {
        return Ok(false);
    }
    dir.delete(REPLICATION_SERVER_DN).await?;
    info!("removed the replication server of {}", dir.address());
    Ok(true)
}

fn stored_values(entry: &Entry, address: &str) -> Vec<String> {
    entry
        .values("ds-cfg-replication-server")
        .iter()
        .filter(|v| v.eq_ignore_ascii_case(address))
        .cloned()
        .collect()
}

/// Drop every reference to the replication server `address`. A domain
/// that would be left without replication server is deleted.
///
/// Returns the base DNs whose domains were deleted.
pub async fn remove_references(dir: &dyn Directory, address: &str) -> Result<Vec<String>, DirectoryError> {
    if let Some(rs) = dir.read_entry(REPLICATION_SERVER_DN, &[]).await? {
        let values = stored_values(&rs, address);
        if !values.is_empty() {
            dir.modify(
                REPLICATION_SERVER_DN,
                &[Modification::Delete("ds-cfg-replication-server".to_string(), values)],
            )
            .await?;
        }
    }

    let mut deleted = Vec::new();
    let domains = search_or_empty(
        dir,
        DOMAINS_DN,
        Scope::OneLevel,
        &Filter::Present("ds-cfg-base-dn".to_string()),
    )
    .await?;
    for domain in domains {
        let values = stored_values(&domain, address);
        if values.is_empty() {
            continue;
        }
        let base_dn = domain.first("ds-cfg-base-dn").unwrap_or_default().to_string();
        if values.len() == domain.values("ds-cfg-replication-server").len() {
            dir.delete(&domain.dn).await?;
            info!("removed replication domain of {} on {}: no replication server left", base_dn, dir.address());
            deleted.push(base_dn);
        } else {
            dir.modify(
                &domain.dn,
                &[Modification::Delete("ds-cfg-replication-server".to_string(), values)],
            )
            .await?;
            debug!("removed {} from the domain of {} on {}", address, base_dn, dir.address());
        }
    }
    Ok(deleted)
}
