//! `purge-historical`: drop old historical information kept for conflict
//! resolution, through a server task or a local command.

use super::{Executor, Failures};
use crate::directory::ldif::LdifDirectory;
use crate::directory::Directory;
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::server_config::read_server_descriptor;
use crate::tasks::{run_task, TaskError, TaskKind};
use crate::user_data::{PurgeHistoricalData, ServerConnection};
use dsrepl_topology::reconcile::select_replicated;
use dsrepl_topology::ServerDescriptor;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

pub(super) async fn run(exec: &Executor<'_>, data: &PurgeHistoricalData) -> Result<ReturnCode> {
    match &data.server {
        Some(conn) => {
            let dir = exec.connect(conn).await?;
            let result = purge_online(exec, data, conn, &*dir).await;
            exec.close(dir).await;
            result
        }
        None => purge_offline(exec, data).await,
    }
}

fn nothing_to_purge(server: &ServerDescriptor) -> ReplicationCliError {
    ReplicationCliError::new(
        ReturnCode::HistoricalCannotBePurgedOnBaseDn,
        format!("None of the base DNs is replicated on {}.", server.id()),
    )
}

/// The replicated base DNs to purge, after reporting the others.
fn select(exec: &Executor<'_>, data: &PurgeHistoricalData, server: &ServerDescriptor) -> Result<Vec<String>> {
    let selection = select_replicated(&data.base_dns, server);
    exec.report_selection(&selection, "Historical already purged", "Base DN is not replicated on the server");
    let base_dns = exec.choose_base_dns(&selection, &data.base_dns, "Purge the historical of base DN")?;
    if base_dns.is_empty() {
        return Err(nothing_to_purge(server));
    }
    Ok(base_dns)
}

async fn purge_online(
    exec: &Executor<'_>,
    data: &PurgeHistoricalData,
    conn: &ServerConnection,
    dir: &dyn Directory,
) -> Result<ReturnCode> {
    let server = exec.read_server(dir, conn).await?;
    let base_dns = select(exec, data, &server)?;

    let grace = exec.session.config.task_deadline_grace_secs;
    let settings = exec
        .poll_settings()
        .with_deadline(Duration::from_secs(data.maximum_duration_secs.saturating_add(grace)));
    let mut failures = Failures::default();
    for base_dn in &base_dns {
        let kind = TaskKind::PurgeHistorical {
            base_dn: base_dn.clone(),
            maximum_duration_secs: data.maximum_duration_secs,
        };
        match run_task(dir, &kind, &data.schedule, &settings, exec.console).await {
            Ok(_) => exec
                .console
                .println(&format!("Historical of {} purged on {}.", base_dn, server.id())),
            Err(e) => {
                let code = match &e {
                    TaskError::Timeout { .. } => ReturnCode::TaskTimedOut,
                    _ => ReturnCode::ErrorLaunchingPurgeHistorical,
                };
                failures.push(ReplicationCliError::with_source(
                    code,
                    format!("Error purging the historical of {} on {}", base_dn, server.id()),
                    e,
                ));
            }
        }
    }
    failures.into_result(ReturnCode::Successful)
}

fn local_error(msg: impl Into<String>) -> ReplicationCliError {
    ReplicationCliError::new(ReturnCode::ErrorLocalPurgeHistorical, msg)
}

/// Read the replicated base DNs of the local server from its configuration
/// file.
async fn read_local_server(path: &Path) -> Result<ServerDescriptor> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        ReplicationCliError::with_source(
            ReturnCode::ErrorReadingConfiguration,
            format!("Error reading {}", path.display()),
            e,
        )
    })?;
    let dir = LdifDirectory::parse("localhost:0", &text).map_err(|e| {
        ReplicationCliError::with_source(
            ReturnCode::ErrorReadingConfiguration,
            format!("Error parsing {}", path.display()),
            e,
        )
    })?;
    read_server_descriptor(&dir, "localhost", 0).await.map_err(|e| {
        ReplicationCliError::with_source(
            ReturnCode::ErrorReadingConfiguration,
            format!("Error reading the configuration in {}", path.display()),
            e,
        )
    })
}

/// Arguments of the local purge command.
fn offline_arguments(base_dns: &[String], maximum_duration_secs: u64) -> Vec<String> {
    let mut args = Vec::with_capacity(base_dns.len() * 2 + 2);
    for base_dn in base_dns {
        args.push("--baseDN".to_string());
        args.push(base_dn.clone());
    }
    args.push("--maximumDuration".to_string());
    args.push(maximum_duration_secs.to_string());
    args
}

async fn purge_offline(exec: &Executor<'_>, data: &PurgeHistoricalData) -> Result<ReturnCode> {
    let config = &exec.session.config;
    let server = read_local_server(&config.local_config_ldif).await?;
    let base_dns = select(exec, data, &server)?;

    let Some(command) = &config.offline_purge_command else {
        return Err(local_error(
            "No offline purge command is configured (offline_purge_command).",
        ));
    };
    let args = offline_arguments(&base_dns, data.maximum_duration_secs);
    info!("running {} {:?}", command.display(), args);
    let output = Command::new(command)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            ReplicationCliError::with_source(
                ReturnCode::ErrorLocalPurgeHistorical,
                format!("Error running {}", command.display()),
                e,
            )
        })?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        exec.console.println(line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        exec.console.error(line);
    }
    debug!("{} exited with {}", command.display(), output.status);
    if !output.status.success() {
        return Err(local_error(format!(
            "{} failed with {}",
            command.display(),
            output.status
        )));
    }
    exec.console
        .println(&format!("Historical of {} purged locally.", base_dns.join(", ")));
    Ok(ReturnCode::Successful)
}
