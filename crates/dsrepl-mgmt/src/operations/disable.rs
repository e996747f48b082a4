//! `disable`: remove replication domains and, when nothing is left to
//! replicate, the replication server and the registry entry.

use super::{Executor, Failures};
use crate::ads::AdsContext;
use crate::cache::TopologyCache;
use crate::connection::admin_target;
use crate::directory::{Directory, DirectoryError};
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::server_config::{remove_domain, remove_references, remove_replication_server};
use crate::user_data::DisableData;
use dsrepl_topology::policy::assess_replication_server_removal;
use dsrepl_topology::reconcile::{contains_dn, select_for_disable};
use dsrepl_topology::{dn, ServerDescriptor};
use tracing::{info, warn};

pub(super) async fn run(exec: &Executor<'_>, data: &DisableData) -> Result<ReturnCode> {
    let dir = exec.connect(&data.server).await?;
    let result = disable(exec, data, &*dir).await;
    exec.close(dir).await;
    result
}

fn disable_error(base_dn: &str, address: &str, e: DirectoryError) -> ReplicationCliError {
    ReplicationCliError::with_source(
        ReturnCode::ErrorDisablingReplicationOnBaseDn,
        format!("Error disabling replication of {} on {}", base_dn, address),
        e,
    )
}

async fn disable(exec: &Executor<'_>, data: &DisableData, dir: &dyn Directory) -> Result<ReturnCode> {
    let console = exec.console;
    let server = exec.read_server(dir, &data.server).await?;

    let mut base_dns = if data.disable_all {
        server.replicated_base_dns()
    } else if data.base_dns.is_empty() && data.disable_replication_server {
        Vec::new()
    } else {
        let selection = select_for_disable(&data.base_dns, &server);
        exec.report_selection(
            &selection,
            "Replication is already disabled for base DN",
            "Base DN is not replicated on the server",
        );
        let chosen = exec.choose_base_dns(&selection, &data.base_dns, "Disable replication of base DN")?;
        if chosen.is_empty() && !data.disable_replication_server {
            if !selection.already_done.is_empty() && selection.not_found.is_empty() {
                console.println("Replication is already disabled for every requested base DN.");
                return Ok(ReturnCode::SuccessfulNop);
            }
            return Err(ReplicationCliError::new(
                ReturnCode::ReplicationCannotBeDisabledOnBaseDn,
                format!("None of the base DNs can be disabled on {}.", server.id()),
            ));
        }
        chosen
    };

    let user_dns_left = server
        .replicated_base_dns()
        .into_iter()
        .any(|d| !dn::is_internal_suffix(&d) && !contains_dn(&base_dns, &d));
    let disable_everything = data.disable_all || (!base_dns.is_empty() && !user_dns_left);
    if disable_everything {
        for internal in [dn::ADMIN_DATA_SUFFIX, dn::SCHEMA_SUFFIX] {
            let replicated = server.replica(internal).map(|r| r.replicated).unwrap_or(false);
            if replicated && !contains_dn(&base_dns, internal) {
                base_dns.push(internal.to_string());
            }
        }
    }
    let remove_rs = (data.disable_replication_server || disable_everything) && server.is_replication_server();
    info!(
        "disabling {:?} on {} (replication server removed: {})",
        base_dns,
        server.id(),
        remove_rs
    );

    let cache = match &data.admin {
        Some(admin) if remove_rs || disable_everything => {
            let registry = exec.read_registry(dir).await?;
            exec.load_topology(registry.as_ref(), admin, &server, &[]).await?
        }
        None if remove_rs || disable_everything => {
            console.warn(&format!(
                "Bound as {} instead of a global administrator: the other servers of the topology \
                 are not read, so the last replication server check and the removal of references \
                 on them are skipped.",
                data.server.bind_dn
            ));
            TopologyCache::of(&[&server])
        }
        _ => TopologyCache::of(&[&server]),
    };

    if remove_rs {
        check_removal(exec, &cache, &server)?;
    }

    let mut failures = Failures::default();
    for base_dn in &base_dns {
        match remove_domain(dir, base_dn).await {
            Ok(_) => console.println(&format!("Replication of {} disabled on {}.", base_dn, server.id())),
            Err(e) => failures.push(disable_error(base_dn, &server.id(), e)),
        }
    }

    if remove_rs {
        if let Err(e) = remove_replication_server(dir).await {
            failures.push(disable_error("the replication server", &server.id(), e));
        }
        if let Some(address) = server.replication_server_address() {
            remove_all_references(exec, data, dir, &cache, &server, &address, &mut failures).await;
        }
        console.println(&format!("Replication server of {} removed.", server.id()));
    }

    if disable_everything {
        unregister(exec, data, &cache, &server).await;
    }

    failures.into_result(ReturnCode::Successful)
}

/// Refuse to leave a replicated suffix without replication server; warn
/// about a single remaining one.
fn check_removal(
    exec: &Executor<'_>,
    cache: &TopologyCache,
    server: &ServerDescriptor,
) -> Result<()> {
    let assessments = assess_replication_server_removal(&cache.snapshot, server);
    let fatal: Vec<&str> = assessments
        .iter()
        .filter(|a| a.availability.is_fatal())
        .map(|a| a.base_dn.as_str())
        .collect();
    if !fatal.is_empty() {
        return Err(ReplicationCliError::new(
            ReturnCode::ReplicationCannotBeDisabledOnBaseDn,
            format!(
                "Removing the replication server of {} would leave no replication server for {}; \
                 disable replication of these base DNs on the other servers first.",
                server.id(),
                fatal.join(", ")
            ),
        ));
    }
    for assessment in assessments.iter().filter(|a| a.availability.needs_confirmation()) {
        exec.console.warn(&format!(
            "Only one replication server will be left for {}: it becomes a single point of failure.",
            assessment.base_dn
        ));
        if !exec.console.confirm("Remove the replication server anyway?", true)? {
            return Err(ReplicationCliError::new(
                ReturnCode::UserCancelled,
                "The replication server was not removed.",
            ));
        }
    }
    Ok(())
}

/// Drop `address` from the peer sets of this server and of every server
/// of the topology.
async fn remove_all_references(
    exec: &Executor<'_>,
    data: &DisableData,
    dir: &dyn Directory,
    cache: &TopologyCache,
    server: &ServerDescriptor,
    address: &str,
    failures: &mut Failures,
) {
    let reference_error = |id: &str, e: DirectoryError| {
        ReplicationCliError::with_source(
            ReturnCode::ErrorDisablingReplicationRemoveReferenceOnBaseDn,
            format!("Error removing the references to {} on {}", address, id),
            e,
        )
    };

    let report = |id: &str, deleted: Vec<String>| {
        for base_dn in deleted {
            exec.console.warn(&format!(
                "The domain of {} on {} had no other replication server and was removed.",
                base_dn, id
            ));
        }
    };

    match remove_references(dir, address).await {
        Ok(deleted) => report(&server.id(), deleted),
        Err(e) => failures.push(reference_error(&server.id(), e)),
    }
    let Some(admin) = &data.admin else {
        return;
    };
    for peer in cache.snapshot.servers().iter().filter(|s| s.id() != server.id()) {
        let target = admin_target(exec.session, admin, &peer.host, peer.admin_port);
        let peer_dir = match exec.connector.connect(&target).await {
            Ok(peer_dir) => peer_dir,
            Err(e) => {
                failures.push(reference_error(&peer.id(), e));
                continue;
            }
        };
        match remove_references(&*peer_dir, address).await {
            Ok(deleted) => report(&peer.id(), deleted),
            Err(e) => failures.push(reference_error(&peer.id(), e)),
        }
        exec.close(peer_dir).await;
    }
}

/// Remove the server from the registry its peers share. Best effort.
async fn unregister(exec: &Executor<'_>, data: &DisableData, cache: &TopologyCache, server: &ServerDescriptor) {
    let Some(admin) = &data.admin else {
        return;
    };
    let id = server.id();
    for peer in cache.snapshot.servers().iter().filter(|s| s.id() != id) {
        let target = admin_target(exec.session, admin, &peer.host, peer.admin_port);
        let result = match exec.connector.connect(&target).await {
            Ok(peer_dir) => {
                let removed = AdsContext::new(&*peer_dir).unregister_server(&id).await;
                exec.close(peer_dir).await;
                removed
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                exec.console
                    .println(&format!("{} removed from the administration registry.", id));
                return;
            }
            Err(e) if e.is_no_such_object() => return,
            Err(e) => warn!("cannot unregister {} through {}: {}", id, peer.id(), e),
        }
    }
    if cache.snapshot.len() > 1 {
        exec.console
            .warn(&format!("{} could not be removed from the administration registry.", id));
    }
}
