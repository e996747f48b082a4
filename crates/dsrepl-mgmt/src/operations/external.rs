//! `pre-external-initialization` and `post-external-initialization`:
//! reset generation IDs around an import done outside of replication.

use super::{Executor, Failures};
use crate::directory::Directory;
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::tasks::{run_task, TaskKind, TaskSchedule};
use crate::user_data::ServerData;
use dsrepl_topology::reconcile::select_replicated;
use dsrepl_topology::ServerDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre { local_only: bool },
    Post,
}

impl Phase {
    fn error_code(self) -> ReturnCode {
        match self {
            Phase::Pre { .. } => ReturnCode::ErrorLaunchingPreExternalInitialization,
            Phase::Post => ReturnCode::ErrorLaunchingPostExternalInitialization,
        }
    }

    /// Generation ID written by the task, `None` to let the server compute it.
    fn new_value(self, server: &ServerDescriptor, base_dn: &str) -> Option<i64> {
        match self {
            Phase::Pre { local_only: true } => server
                .replica(base_dn)
                .and_then(|r| r.domain_id)
                .map(i64::from),
            Phase::Pre { local_only: false } => Some(-1),
            Phase::Post => None,
        }
    }
}

pub(super) async fn run_pre(exec: &Executor<'_>, data: &ServerData, local_only: bool) -> Result<ReturnCode> {
    run(exec, data, Phase::Pre { local_only }).await
}

pub(super) async fn run_post(exec: &Executor<'_>, data: &ServerData) -> Result<ReturnCode> {
    run(exec, data, Phase::Post).await
}

async fn run(exec: &Executor<'_>, data: &ServerData, phase: Phase) -> Result<ReturnCode> {
    let dir = exec.connect(&data.server).await?;
    let result = reset_generation_ids(exec, data, &*dir, phase).await;
    exec.close(dir).await;
    result
}

async fn reset_generation_ids(
    exec: &Executor<'_>,
    data: &ServerData,
    dir: &dyn Directory,
    phase: Phase,
) -> Result<ReturnCode> {
    let server = exec.read_server(dir, &data.server).await?;
    let selection = select_replicated(&data.base_dns, &server);
    exec.report_selection(&selection, "Base DN already prepared", "Base DN is not replicated on the server");
    let base_dns = exec.choose_base_dns(&selection, &data.base_dns, "Reset the generation ID of base DN")?;
    if base_dns.is_empty() {
        return Err(ReplicationCliError::new(
            ReturnCode::ReplicationCannotBeInitializedOnBaseDn,
            format!("None of the base DNs is replicated on {}.", server.id()),
        ));
    }

    let schedule = TaskSchedule::default();
    let settings = exec.poll_settings();
    let mut failures = Failures::default();
    for base_dn in &base_dns {
        let kind = TaskKind::ResetGenerationId {
            base_dn: base_dn.clone(),
            new_value: phase.new_value(&server, base_dn),
        };
        match run_task(dir, &kind, &schedule, &settings, exec.console).await {
            Ok(_) => exec
                .console
                .println(&format!("Generation ID of {} reset on {}.", base_dn, server.id())),
            Err(e) => failures.push(ReplicationCliError::with_source(
                phase.error_code(),
                format!("Error resetting the generation ID of {} on {}", base_dn, server.id()),
                e,
            )),
        }
    }

    if failures.code.is_none() {
        match phase {
            Phase::Pre { local_only: false } => exec.console.println(
                "Now import the same data on every replica of these base DNs, then run \
                 post-external-initialization on one of them.",
            ),
            Phase::Pre { local_only: true } => exec.console.println(
                "Now import the data on this server, then run post-external-initialization on it.",
            ),
            Phase::Post => exec
                .console
                .println("The replicas can now be used; they will start replicating changes."),
        }
    }
    failures.into_result(ReturnCode::Successful)
}
