//! Sub-command executors.
//!
//! [`Executor::run`] dispatches an [`Operation`] to its module. Every
//! operation reads fresh descriptors, filters the requested base DNs with
//! `dsrepl_topology::reconcile`, writes configuration or launches tasks,
//! and maps each failure to its [`ReturnCode`].

mod change_number;
mod disable;
mod enable;
mod external;
mod initialize;
mod purge;
pub mod status;

use crate::cache::{read_registry, TopologyCache};
use crate::connection::{admin_target, connect};
use crate::console::Console;
use crate::directory::{Connector, Directory};
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::server_config::read_server_descriptor;
use crate::tasks::{run_task, run_with_retry, PollSettings, RetryPolicy, TaskError, TaskKind, TaskSchedule};
use crate::user_data::{AdminCredentials, Operation, ServerConnection, Session};
use dsrepl_topology::{Registry, ServerDescriptor, SuffixSelection};
use tracing::{debug, error, info, warn};

/// Runs operations against servers reached through one [`Connector`].
pub struct Executor<'a> {
    session: &'a Session,
    connector: &'a dyn Connector,
    console: &'a Console,
}

impl<'a> Executor<'a> {
    pub fn new(session: &'a Session, connector: &'a dyn Connector, console: &'a Console) -> Self {
        Self {
            session,
            connector,
            console,
        }
    }

    /// Run one operation to completion.
    pub async fn run(&self, op: &Operation) -> Result<ReturnCode> {
        info!("running {}", op.name());
        let result = match op {
            Operation::Enable(data) => enable::run(self, data).await,
            Operation::Disable(data) => disable::run(self, data).await,
            Operation::Initialize(data) => initialize::run_initialize(self, data).await,
            Operation::InitializeAll(data) => initialize::run_initialize_all(self, data).await,
            Operation::PreExternalInitialization { data, local_only } => {
                external::run_pre(self, data, *local_only).await
            }
            Operation::PostExternalInitialization(data) => external::run_post(self, data).await,
            Operation::ResetChangeNumber(data) => change_number::run(self, data).await,
            Operation::Status { data, script_friendly } => status::run(self, data, *script_friendly).await,
            Operation::PurgeHistorical(data) => purge::run(self, data).await,
        };
        match &result {
            Ok(code) => info!("{} finished: {}", op.name(), code),
            Err(e) => error!("{} failed with {}: {}", op.name(), e.code, e.chain()),
        }
        result
    }

    async fn connect(&self, conn: &ServerConnection) -> Result<Box<dyn Directory>> {
        connect(self.session, self.connector, self.console, conn).await
    }

    async fn close(&self, dir: Box<dyn Directory>) {
        if let Err(e) = dir.close().await {
            debug!("closing {}: {}", dir.address(), e);
        }
    }

    async fn read_server(&self, dir: &dyn Directory, conn: &ServerConnection) -> Result<ServerDescriptor> {
        read_server_descriptor(dir, &conn.host, conn.port).await.map_err(|e| {
            ReplicationCliError::with_source(
                ReturnCode::ErrorReadingConfiguration,
                format!("Error reading the configuration of {}", conn.address()),
                e,
            )
        })
    }

    async fn read_registry(&self, dir: &dyn Directory) -> Result<Option<Registry>> {
        read_registry(dir).await.map_err(|e| {
            ReplicationCliError::with_source(
                ReturnCode::ErrorReadingAds,
                format!("Error reading the administration registry of {}", dir.address()),
                e,
            )
        })
    }

    /// Every server registered next to `own`. Servers in `known` are not
    /// read again. Unreadable servers are reported; an interactive user
    /// may choose to stop there.
    async fn load_topology(
        &self,
        registry: Option<&Registry>,
        admin: &AdminCredentials,
        own: &ServerDescriptor,
        known: &[&ServerDescriptor],
    ) -> Result<TopologyCache> {
        let Some(registry) = registry else {
            return Ok(TopologyCache::of(&[own]));
        };
        let mut reuse = vec![own];
        reuse.extend(known.iter().copied().filter(|s| registry.contains(&s.id())));
        let template = admin_target(self.session, admin, &own.host, own.admin_port);
        let cache = TopologyCache::load(registry, self.connector, &template, &reuse).await;

        if !cache.errors.is_empty() {
            for e in &cache.errors {
                self.console.warn(&format!("Could not read the configuration of {}", e));
            }
            if self.console.is_interactive()
                && !self
                    .console
                    .confirm("Continue without the servers that could not be read?", true)?
            {
                return Err(ReplicationCliError::new(
                    ReturnCode::ErrorReadingTopologyCache,
                    format!("Error reading the topology: {}", cache.errors.join("; ")),
                ));
            }
        }
        Ok(cache)
    }

    /// Print the requested base DNs that will be skipped.
    fn report_selection(&self, selection: &SuffixSelection, done: &str, unavailable: &str) {
        for base_dn in &selection.already_done {
            self.console.println(&format!("{}: {}", done, base_dn));
        }
        for base_dn in &selection.not_found {
            self.console.warn(&format!("{}: {}", unavailable, base_dn));
        }
    }

    /// The base DNs to act on: the selected ones when the user named some,
    /// otherwise those the user accepts one by one.
    fn choose_base_dns(&self, selection: &SuffixSelection, requested: &[String], question: &str) -> Result<Vec<String>> {
        if !requested.is_empty() || !self.console.is_interactive() {
            return Ok(selection.selected.clone());
        }
        let mut chosen = Vec::new();
        for base_dn in selection.selectable() {
            if self.console.confirm(&format!("{} {}?", question, base_dn), true)? {
                chosen.push(base_dn);
            }
        }
        Ok(chosen)
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings::from_config(&self.session.config)
    }

    /// Run an initialization task on `dir`, retrying while the peer is not
    /// reachable yet.
    async fn run_initialization(&self, dir: &dyn Directory, kind: TaskKind) -> Result<()> {
        let policy = RetryPolicy::from_config(&self.session.config);
        let schedule = TaskSchedule::default();
        let settings = self.poll_settings();
        let (kind_ref, schedule_ref, settings_ref, console) = (&kind, &schedule, &settings, self.console);
        self.console.println(&format!(
            "Initializing base DN {} on {}.",
            kind.base_dn(),
            dir.address()
        ));
        run_with_retry(&policy, move || run_task(dir, kind_ref, schedule_ref, settings_ref, console))
            .await
            .map(|_| ())
            .map_err(|e| initialization_error(kind.base_dn(), dir.address(), e))
    }
}

fn initialization_error(base_dn: &str, address: &str, e: TaskError) -> ReplicationCliError {
    let code = match &e {
        TaskError::PeerNotFound { .. } => ReturnCode::InitializingTriesCompleted,
        TaskError::Timeout { .. } => ReturnCode::TaskTimedOut,
        _ => ReturnCode::ErrorInitializingBaseDnGeneric,
    };
    ReplicationCliError::with_source(
        code,
        format!("Error initializing base DN {} on {}", base_dn, address),
        e,
    )
}

/// Failures of operations that keep going after one base DN fails.
#[derive(Debug, Default)]
struct Failures {
    code: Option<ReturnCode>,
    messages: Vec<String>,
}

impl Failures {
    fn push(&mut self, e: ReplicationCliError) {
        warn!("{}", e.chain());
        self.code.get_or_insert(e.code);
        self.messages.push(e.chain());
    }

    /// The first failure code with every message, or `ok`.
    fn into_result(self, ok: ReturnCode) -> Result<ReturnCode> {
        match self.code {
            Some(code) => Err(ReplicationCliError::new(code, self.messages.join("\n"))),
            None => Ok(ok),
        }
    }
}
