//! `initialize` and `initialize-all`.

use super::{Executor, Failures};
use crate::directory::Directory;
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::tasks::TaskKind;
use crate::user_data::{ServerData, SourceDestinationData};
use dsrepl_topology::reconcile::{select_for_initialize, select_replicated};

pub(super) async fn run_initialize(exec: &Executor<'_>, data: &SourceDestinationData) -> Result<ReturnCode> {
    let source = exec.connect(&data.source).await?;
    let destination = match exec.connect(&data.destination).await {
        Ok(dir) => dir,
        Err(e) => {
            exec.close(source).await;
            return Err(e);
        }
    };
    let result = initialize(exec, data, &*source, &*destination).await;
    exec.close(source).await;
    exec.close(destination).await;
    result
}

fn nothing_to_initialize(what: &str) -> ReplicationCliError {
    ReplicationCliError::new(
        ReturnCode::ReplicationCannotBeInitializedOnBaseDn,
        format!("None of the base DNs can be initialized {}.", what),
    )
}

async fn initialize(
    exec: &Executor<'_>,
    data: &SourceDestinationData,
    source_dir: &dyn Directory,
    destination_dir: &dyn Directory,
) -> Result<ReturnCode> {
    let source = exec.read_server(source_dir, &data.source).await?;
    let destination = exec.read_server(destination_dir, &data.destination).await?;

    let selection = select_for_initialize(&data.base_dns, &source, &destination);
    exec.report_selection(
        &selection,
        "Base DN already initialized",
        "Base DN is not replicated between the source and the destination",
    );
    let base_dns = exec.choose_base_dns(&selection, &data.base_dns, "Initialize base DN")?;
    if base_dns.is_empty() {
        return Err(nothing_to_initialize(&format!(
            "from {} to {}",
            source.id(),
            destination.id()
        )));
    }

    let mut failures = Failures::default();
    for base_dn in &base_dns {
        let Some(source_domain_id) = source.replica(base_dn).and_then(|r| r.domain_id) else {
            return Err(ReplicationCliError::new(
                ReturnCode::ReplicationIdNotFound,
                format!("No replication domain ID for {} on {}.", base_dn, source.id()),
            ));
        };
        let kind = TaskKind::InitializeFromPeer {
            base_dn: base_dn.clone(),
            source_domain_id,
        };
        match exec.run_initialization(destination_dir, kind).await {
            Ok(()) => exec.console.println(&format!(
                "Base DN {} initialized on {} from {}.",
                base_dn,
                destination.id(),
                source.id()
            )),
            Err(e) => failures.push(e),
        }
    }
    failures.into_result(ReturnCode::Successful)
}

pub(super) async fn run_initialize_all(exec: &Executor<'_>, data: &ServerData) -> Result<ReturnCode> {
    let dir = exec.connect(&data.server).await?;
    let result = initialize_all(exec, data, &*dir).await;
    exec.close(dir).await;
    result
}

async fn initialize_all(exec: &Executor<'_>, data: &ServerData, dir: &dyn Directory) -> Result<ReturnCode> {
    let server = exec.read_server(dir, &data.server).await?;
    let selection = select_replicated(&data.base_dns, &server);
    exec.report_selection(&selection, "Base DN already initialized", "Base DN is not replicated on the server");
    let base_dns = exec.choose_base_dns(&selection, &data.base_dns, "Initialize the replicas of base DN")?;
    if base_dns.is_empty() {
        return Err(nothing_to_initialize(&format!("from {}", server.id())));
    }

    let mut failures = Failures::default();
    for base_dn in &base_dns {
        let kind = TaskKind::InitializeAll {
            base_dn: base_dn.clone(),
        };
        match exec.run_initialization(dir, kind).await {
            Ok(()) => exec.console.println(&format!(
                "Every replica of {} initialized from {}.",
                base_dn,
                server.id()
            )),
            Err(e) => failures.push(e),
        }
    }
    failures.into_result(ReturnCode::Successful)
}
