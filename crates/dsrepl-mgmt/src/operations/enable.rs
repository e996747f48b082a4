//! `enable`: link two servers, their registries and their domains.

use super::Executor;
use crate::ads::{seed_trust_store, AdsContext};
use crate::cache::TopologyCache;
use crate::connection::admin_target;
use crate::directory::Directory;
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::server_config::{
    configure_domain, configure_replication_server, ensure_sync_provider, merge_replication_server_peers,
    read_server_time, Change, ConfigError,
};
use crate::tasks::TaskKind;
use crate::user_data::{EnableData, EnableServer};
use dsrepl_topology::descriptor::replication_address;
use dsrepl_topology::reconcile::{select_for_enable, with_internal_suffixes};
use dsrepl_topology::registry::{check_mergeable, choose_merge_source, decide_registry_action};
use dsrepl_topology::{dn, EnablePlan, Registry, RegistryAction, ServerDescriptor, Side};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

const MAX_CLOCK_SKEW_SECS: i64 = 300;

fn index(side: Side) -> usize {
    match side {
        Side::First => 0,
        Side::Second => 1,
    }
}

fn config_error(code: ReturnCode, msg: String, e: ConfigError) -> ReplicationCliError {
    ReplicationCliError::with_source(code, msg, e)
}

fn ads_error(address: &str, e: crate::directory::DirectoryError) -> ReplicationCliError {
    ReplicationCliError::with_source(
        ReturnCode::ErrorUpdatingAds,
        format!("Error updating the administration registry of {}", address),
        e,
    )
}

pub(super) async fn run(exec: &Executor<'_>, data: &EnableData) -> Result<ReturnCode> {
    let first = exec.connect(&data.first.connection).await?;
    let second = match exec.connect(&data.second.connection).await {
        Ok(dir) => dir,
        Err(e) => {
            exec.close(first).await;
            return Err(e);
        }
    };
    let result = enable(exec, data, [&*first, &*second]).await;
    exec.close(first).await;
    exec.close(second).await;
    result
}

fn is_local_host(host: &str) -> bool {
    matches!(host.to_lowercase().as_str(), "localhost" | "127.0.0.1" | "::1")
}

/// Refuse a replication port another process already listens on.
async fn check_replication_port(server: &ServerDescriptor, side: &EnableServer) -> Result<()> {
    if !side.configure_replication_server || server.is_replication_server() || !is_local_host(&server.host) {
        return Ok(());
    }
    match tokio::net::TcpListener::bind(("0.0.0.0", side.replication_port)).await {
        Ok(_) => Ok(()),
        Err(e) => Err(ReplicationCliError::with_source(
            ReturnCode::ErrorUserData,
            format!(
                "The replication port {} is already in use on {}",
                side.replication_port, server.host
            ),
            e,
        )),
    }
}

async fn enable(exec: &Executor<'_>, data: &EnableData, dirs: [&dyn Directory; 2]) -> Result<ReturnCode> {
    let console = exec.console;
    let sides = [&data.first, &data.second];
    let servers = [
        exec.read_server(dirs[0], &data.first.connection).await?,
        exec.read_server(dirs[1], &data.second.connection).await?,
    ];
    if !data.skip_port_check {
        for (server, side) in servers.iter().zip(sides) {
            check_replication_port(server, side).await?;
        }
    }

    let registries = [exec.read_registry(dirs[0]).await?, exec.read_registry(dirs[1]).await?];
    let caches = [
        exec.load_topology(registries[0].as_ref(), &data.admin, &servers[0], &[&servers[1]])
            .await?,
        exec.load_topology(registries[1].as_ref(), &data.admin, &servers[1], &[&servers[0]])
            .await?,
    ];

    let domains_on = [
        data.first.configure_replication_domain,
        data.second.configure_replication_domain,
    ];
    let configures_domains = domains_on.iter().any(|d| *d);
    let mut base_dns = Vec::new();
    if configures_domains {
        let selection = select_for_enable(&data.base_dns, &servers[0], &servers[1]);
        exec.report_selection(
            &selection,
            "Replication is already enabled for base DN",
            "Base DN cannot be replicated between both servers",
        );
        base_dns = exec.choose_base_dns(&selection, &data.base_dns, "Replicate base DN")?;
        if base_dns.is_empty() {
            if !selection.already_done.is_empty() && selection.not_found.is_empty() {
                console.println("Replication is already enabled for every requested base DN.");
                return Ok(ReturnCode::SuccessfulNop);
            }
            return Err(ReplicationCliError::new(
                ReturnCode::ReplicationCannotBeEnabledOnBaseDn,
                "None of the base DNs can be replicated between the two servers.",
            ));
        }
    }

    let action = decide_registry_action(registries[0].as_ref(), registries[1].as_ref());
    let ads_source = match action {
        RegistryAction::CreateOnFirst | RegistryAction::AlreadyShared => Side::First,
        RegistryAction::RegisterInto { source } => source,
        RegistryAction::Merge => {
            check_mergeable(&caches[0].snapshot, &caches[1].snapshot).map_err(|e| {
                ReplicationCliError::with_source(
                    ReturnCode::ReplicationAdsMergeNotSupported,
                    "The administration registries of the two servers cannot be merged",
                    e,
                )
            })?;
            choose_merge_source(&caches[0].snapshot, &caches[1].snapshot)
        }
    };
    info!("registry action {:?}, source {:?}", action, ads_source);
    update_registry(exec, data, &dirs, &servers, &registries, &caches, action, ads_source).await?;

    let mut all_dns = base_dns.clone();
    if configures_domains {
        all_dns = with_internal_suffixes(&all_dns, action != RegistryAction::AlreadyShared, data.replicate_schema);
    }

    let mut new_rs = BTreeSet::new();
    for (server, side) in servers.iter().zip(sides) {
        if side.configure_replication_server {
            new_rs.insert(
                server
                    .replication_server_address()
                    .unwrap_or_else(|| replication_address(&server.host, side.replication_port)),
            );
        }
    }
    let mut plan = EnablePlan::build(
        &all_dns,
        [&servers[0], &servers[1]],
        [&caches[0].snapshot, &caches[1].snapshot],
        &new_rs,
    );
    let mut peers = plan.all_replication_servers();
    peers.extend(new_rs.iter().cloned());

    for ((dir, server), side) in dirs.iter().zip(&servers).zip(sides) {
        if !side.configure_replication_server {
            continue;
        }
        let own = server
            .replication_server_address()
            .unwrap_or_else(|| replication_address(&server.host, side.replication_port));
        let others: BTreeSet<String> = peers.iter().filter(|p| **p != own).cloned().collect();
        let configured = async {
            ensure_sync_provider(*dir).await?;
            configure_replication_server(*dir, side.replication_port, side.secure_replication, &others, &mut plan)
                .await
        };
        let (id, change) = configured.await.map_err(|e| {
            config_error(
                ReturnCode::ErrorConfiguringReplicationServer,
                format!("Error configuring the replication server of {}", server.id()),
                e,
            )
        })?;
        console.println(&format!(
            "Replication server {} on {}: {}.",
            id,
            server.id(),
            describe(change)
        ));
    }

    let mut domain_ids: [BTreeMap<String, u32>; 2] = Default::default();
    for (i, (dir, server)) in dirs.iter().zip(&servers).enumerate() {
        if !domains_on[i] {
            continue;
        }
        ensure_sync_provider(*dir).await.map_err(|e| {
            config_error(
                ReturnCode::ErrorEnablingReplicationOnBaseDn,
                format!("Error enabling the replication provider of {}", server.id()),
                e,
            )
        })?;
        for base_dn in &all_dns {
            let rs = plan.replication_servers(base_dn);
            let (id, change) = configure_domain(*dir, base_dn, &rs, &mut plan).await.map_err(|e| {
                config_error(
                    ReturnCode::ErrorEnablingReplicationOnBaseDn,
                    format!("Error enabling replication of {} on {}", base_dn, server.id()),
                    e,
                )
            })?;
            console.println(&format!(
                "Replication domain of {} on {}: {}.",
                base_dn,
                server.id(),
                describe(change)
            ));
            domain_ids[i].insert(dn::normalize(base_dn), id);
        }
    }

    update_peers(exec, data, &servers, &caches, &all_dns, &peers, &mut plan).await?;

    if domains_on.iter().all(|d| *d) {
        if action != RegistryAction::AlreadyShared {
            let destination = index(ads_source.other());
            let source_id = domain_id(&domain_ids[index(ads_source)], dn::ADMIN_DATA_SUFFIX, &servers[index(ads_source)])?;
            exec.run_initialization(
                dirs[destination],
                TaskKind::InitializeFromPeer {
                    base_dn: dn::ADMIN_DATA_SUFFIX.to_string(),
                    source_domain_id: source_id,
                },
            )
            .await?;
        }
        if data.replicate_schema && servers[0].schema_generation_id != servers[1].schema_generation_id {
            let source = if data.schema_from_second { Side::Second } else { Side::First };
            let source_id = domain_id(&domain_ids[index(source)], dn::SCHEMA_SUFFIX, &servers[index(source)])?;
            exec.run_initialization(
                dirs[index(source.other())],
                TaskKind::InitializeFromPeer {
                    base_dn: dn::SCHEMA_SUFFIX.to_string(),
                    source_domain_id: source_id,
                },
            )
            .await?;
        }
    }

    warn_clock_skew(exec, &dirs).await;

    console.println(&format!(
        "Replication has been enabled between {} and {}.",
        servers[0].id(),
        servers[1].id()
    ));
    if !base_dns.is_empty() {
        console.println(
            "The replicated base DNs must be initialized before they are used; \
             run the initialize or initialize-all sub-command.",
        );
    }
    Ok(ReturnCode::Successful)
}

fn domain_id(ids: &BTreeMap<String, u32>, base_dn: &str, server: &ServerDescriptor) -> Result<u32> {
    ids.get(&dn::normalize(base_dn)).copied().ok_or_else(|| {
        ReplicationCliError::new(
            ReturnCode::ReplicationIdNotFound,
            format!("No replication domain of {} was configured on {}", base_dn, server.id()),
        )
    })
}

fn describe(change: Change) -> &'static str {
    match change {
        Change::Created => "created",
        Change::Updated => "updated",
        Change::Unchanged => "unchanged",
    }
}

fn seed_error(address: &str, e: crate::directory::DirectoryError) -> ReplicationCliError {
    ReplicationCliError::with_source(
        ReturnCode::ErrorSeedingTruststore,
        format!("Error updating the truststore of {}", address),
        e,
    )
}

/// Make the registry of `source` hold both servers and the administrator,
/// then let each server trust the other's instance key. After a merge the
/// replication servers of the absorbed topology trust every key of the
/// merged registry.
#[allow(clippy::too_many_arguments)]
async fn update_registry(
    exec: &Executor<'_>,
    data: &EnableData,
    dirs: &[&dyn Directory; 2],
    servers: &[ServerDescriptor; 2],
    registries: &[Option<Registry>; 2],
    caches: &[TopologyCache; 2],
    action: RegistryAction,
    source: Side,
) -> Result<()> {
    let (src, dst) = (dirs[index(source)], dirs[index(source.other())]);
    let ads = AdsContext::new(src);
    let address = ads.address().to_string();

    match action {
        RegistryAction::CreateOnFirst => ads.create_admin_data().await.map_err(|e| ads_error(&address, e))?,
        RegistryAction::Merge => {
            if let Some(other) = &registries[index(source.other())] {
                ads.merge_registry(other).await.map_err(|e| ads_error(&address, e))?;
            }
        }
        RegistryAction::RegisterInto { .. } | RegistryAction::AlreadyShared => {}
    }
    let password = data.admin.password.as_deref().unwrap_or_default();
    ads.create_administrator(&data.admin.uid, password)
        .await
        .map_err(|e| ads_error(&address, e))?;
    for server in servers {
        ads.register_or_update_server(&server.ads_properties())
            .await
            .map_err(|e| ads_error(&address, e))?;
    }
    exec.console
        .println(&format!("Administration registry of {} updated.", address));

    let registry = ads.read_registry().await.map_err(|e| ads_error(&address, e))?;
    seed_trust_store(dst, &registry.instance_keys)
        .await
        .map_err(|e| seed_error(dst.address(), e))?;
    if let Some(key) = &servers[index(source.other())].instance_key {
        seed_trust_store(src, std::slice::from_ref(key))
            .await
            .map_err(|e| seed_error(src.address(), e))?;
    }

    if action == RegistryAction::Merge {
        let linked: BTreeSet<String> = servers.iter().map(|s| s.id()).collect();
        let absorbed = &caches[index(source.other())].snapshot;
        for peer in absorbed.servers().iter().filter(|s| s.is_replication_server()) {
            let id = peer.id();
            if linked.contains(&id) {
                continue;
            }
            let target = admin_target(exec.session, &data.admin, &peer.host, peer.admin_port);
            let dir = exec.connector.connect(&target).await.map_err(|e| seed_error(&id, e))?;
            let seeded = seed_trust_store(&*dir, &registry.instance_keys).await;
            exec.close(dir).await;
            let added = seeded.map_err(|e| seed_error(&id, e))?;
            debug!("seeded {} certificates into the truststore of {}", added, id);
        }
    }
    Ok(())
}

/// Teach the other servers of both topologies about the new replication
/// servers, for the base DNs they already replicate.
async fn update_peers(
    exec: &Executor<'_>,
    data: &EnableData,
    servers: &[ServerDescriptor; 2],
    caches: &[TopologyCache; 2],
    all_dns: &[String],
    peers: &BTreeSet<String>,
    plan: &mut EnablePlan,
) -> Result<()> {
    let linked: BTreeSet<String> = servers.iter().map(|s| s.id()).collect();
    let mut done = BTreeSet::new();
    for peer in caches.iter().flat_map(|c| c.snapshot.servers()) {
        let id = peer.id();
        if linked.contains(&id) || !done.insert(id.clone()) {
            continue;
        }
        let replicated: Vec<&String> = all_dns
            .iter()
            .filter(|d| peer.replica(d).map(|r| r.replicated).unwrap_or(false))
            .collect();
        if replicated.is_empty() && !peer.is_replication_server() {
            continue;
        }

        let target = admin_target(exec.session, &data.admin, &peer.host, peer.admin_port);
        let dir = exec.connector.connect(&target).await.map_err(|e| {
            ReplicationCliError::with_source(
                ReturnCode::ErrorConnecting,
                format!("Could not connect to {}", id),
                e,
            )
        })?;
        let updated = async {
            let own = peer.replication_server_address();
            let others: BTreeSet<String> = peers.iter().filter(|p| Some(*p) != own.as_ref()).cloned().collect();
            merge_replication_server_peers(&*dir, &others).await.map_err(|e| {
                config_error(
                    ReturnCode::ErrorConfiguringReplicationServer,
                    format!("Error updating the replication server of {}", id),
                    e,
                )
            })?;
            for base_dn in &replicated {
                configure_domain(&*dir, base_dn, &plan.replication_servers(base_dn), plan)
                    .await
                    .map_err(|e| {
                        config_error(
                            ReturnCode::ErrorEnablingReplicationOnBaseDn,
                            format!("Error updating the domain of {} on {}", base_dn, id),
                            e,
                        )
                    })?;
            }
            Ok::<(), ReplicationCliError>(())
        }
        .await;
        exec.close(dir).await;
        updated?;
        debug!("updated replication peers of {}", id);
    }
    Ok(())
}

async fn warn_clock_skew(exec: &Executor<'_>, dirs: &[&dyn Directory; 2]) {
    let times = (read_server_time(dirs[0]).await, read_server_time(dirs[1]).await);
    match times {
        (Ok(Some(t1)), Ok(Some(t2))) => {
            let skew = (t1 - t2).num_seconds().abs();
            if skew > MAX_CLOCK_SKEW_SECS {
                exec.console.warn(&format!(
                    "The clocks of {} and {} differ by {} seconds; replication needs them synchronized.",
                    dirs[0].address(),
                    dirs[1].address(),
                    skew
                ));
            }
        }
        other => debug!("server times unavailable: {:?}", other),
    }
}
