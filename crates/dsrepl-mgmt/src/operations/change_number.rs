//! `reset-change-number`: align the change number of a destination
//! changelog with a change of the source.

use super::Executor;
use crate::directory::{Directory, DirectoryError};
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::server_config::ROOT_DSE_DN;
use crate::tasks::{run_task, TaskKind, TaskSchedule};
use crate::user_data::ResetChangeNumberData;
use dsrepl_topology::dn;
use tracing::info;

const CHANGELOG_DN: &str = "cn=changelog";

fn reset_error(msg: impl Into<String>) -> ReplicationCliError {
    ReplicationCliError::new(ReturnCode::ErrorResettingChangeNumber, msg)
}

fn read_error(address: &str, e: DirectoryError) -> ReplicationCliError {
    ReplicationCliError::with_source(
        ReturnCode::ErrorResettingChangeNumber,
        format!("Error reading the changelog of {}", address),
        e,
    )
}

pub(super) async fn run(exec: &Executor<'_>, data: &ResetChangeNumberData) -> Result<ReturnCode> {
    let source = exec.connect(&data.servers.source).await?;
    let destination = match exec.connect(&data.servers.destination).await {
        Ok(dir) => dir,
        Err(e) => {
            exec.close(source).await;
            return Err(e);
        }
    };
    let result = reset(exec, data, &*source, &*destination).await;
    exec.close(source).await;
    exec.close(destination).await;
    result
}

/// The change to align on: its number, CSN and target entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChangeRecord {
    change_number: u64,
    csn: String,
    target_dn: String,
}

async fn read_change(dir: &dyn Directory, requested: Option<u64>) -> Result<ChangeRecord> {
    let change_number = match requested {
        Some(n) => n,
        None => dir
            .read_entry(ROOT_DSE_DN, &["lastChangeNumber"])
            .await
            .map_err(|e| read_error(dir.address(), e))?
            .and_then(|e| e.parse::<u64>("lastchangenumber"))
            .ok_or_else(|| reset_error(format!("{} does not publish a last change number.", dir.address())))?,
    };
    let change_dn = format!("changeNumber={},{}", change_number, CHANGELOG_DN);
    let entry = dir
        .read_entry(&change_dn, &["replicationCSN", "targetDN"])
        .await
        .map_err(|e| read_error(dir.address(), e))?
        .ok_or_else(|| reset_error(format!("Change number {} is not in the changelog of {}.", change_number, dir.address())))?;
    let (Some(csn), Some(target_dn)) = (entry.first("replicationcsn"), entry.first("targetdn")) else {
        return Err(reset_error(format!("{} has no CSN or target DN.", change_dn)));
    };
    Ok(ChangeRecord {
        change_number,
        csn: csn.to_string(),
        target_dn: target_dn.to_string(),
    })
}

async fn reset(
    exec: &Executor<'_>,
    data: &ResetChangeNumberData,
    source_dir: &dyn Directory,
    destination_dir: &dyn Directory,
) -> Result<ReturnCode> {
    let change = read_change(source_dir, data.change_number).await?;
    info!(
        "change {} of {} has CSN {} on {}",
        change.change_number,
        source_dir.address(),
        change.csn,
        change.target_dn
    );

    let destination = exec.read_server(destination_dir, &data.servers.destination).await?;
    let candidates = if data.servers.base_dns.is_empty() {
        destination
            .replicated_base_dns()
            .into_iter()
            .filter(|d| !dn::is_internal_suffix(d))
            .collect()
    } else {
        data.servers.base_dns.clone()
    };
    let base_dn = candidates
        .into_iter()
        .find(|b| dn::is_descendant_or_self(&change.target_dn, b))
        .ok_or_else(|| {
            reset_error(format!(
                "No replicated base DN of {} contains {}.",
                destination.id(),
                change.target_dn
            ))
        })?;

    let kind = TaskKind::ResetChangeNumber {
        base_dn: base_dn.clone(),
        change_number: change.change_number,
        csn: change.csn,
    };
    run_task(
        destination_dir,
        &kind,
        &TaskSchedule::default(),
        &exec.poll_settings(),
        exec.console,
    )
    .await
    .map_err(|e| {
        ReplicationCliError::with_source(
            ReturnCode::ErrorResettingChangeNumber,
            format!("Error resetting the change number of {} on {}", base_dn, destination.id()),
            e,
        )
    })?;
    exec.console.println(&format!(
        "The change number of {} on {} now starts after {}.",
        base_dn,
        destination.id(),
        change.change_number
    ));
    Ok(ReturnCode::Successful)
}
