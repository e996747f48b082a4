//! Server-side tasks: creation with a collision-free ID, bounded polling
//! and the retry policy of initialization tasks.

use crate::config::ToolConfig;
use crate::console::Console;
use crate::directory::{Directory, DirectoryError, Entry};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const SCHEDULED_TASKS_DN: &str = "cn=Scheduled Tasks,cn=Tasks";

const STATE_ATTR: &str = "ds-task-state";
const LOG_ATTR: &str = "ds-task-log-message";
const PROCESSED_ATTR: &str = "ds-task-processed-entry-count";
const UNPROCESSED_ATTR: &str = "ds-task-unprocessed-entry-count";

/// A task the tool knows how to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Pull the content of a base DN from the replica with `source_domain_id`.
    InitializeFromPeer { base_dn: String, source_domain_id: u32 },
    /// Push the content of a base DN to every other replica.
    InitializeAll { base_dn: String },
    /// Set the generation ID of a domain; `None` lets the server compute it.
    ResetGenerationId { base_dn: String, new_value: Option<i64> },
    PurgeHistorical { base_dn: String, maximum_duration_secs: u64 },
    ResetChangeNumber { base_dn: String, change_number: u64, csn: String },
}

impl TaskKind {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TaskKind::InitializeFromPeer { .. } => "dsreplication-initialize",
            TaskKind::InitializeAll { .. } => "dsreplication-initialize-all",
            TaskKind::ResetGenerationId { .. } => "dsreplication-reset-generation-id",
            TaskKind::PurgeHistorical { .. } => "dsreplication-purge-historical",
            TaskKind::ResetChangeNumber { .. } => "dsreplication-reset-change-number",
        }
    }

    fn object_class(&self) -> &'static str {
        match self {
            TaskKind::InitializeFromPeer { .. } => "ds-task-initialize-from-remote-replica",
            TaskKind::InitializeAll { .. } => "ds-task-initialize-remote-replica",
            TaskKind::ResetGenerationId { .. } => "ds-task-reset-generation-id",
            TaskKind::PurgeHistorical { .. } => "ds-task-purge-conflicts-historical",
            TaskKind::ResetChangeNumber { .. } => "ds-task-reset-change-number",
        }
    }

    fn class_name(&self) -> &'static str {
        match self {
            TaskKind::InitializeFromPeer { .. } => "org.opends.server.tasks.InitializeTask",
            TaskKind::InitializeAll { .. } => "org.opends.server.tasks.InitializeTargetTask",
            TaskKind::ResetGenerationId { .. } => "org.opends.server.tasks.SetGenerationIdTask",
            TaskKind::PurgeHistorical { .. } => "org.opends.server.tasks.PurgeConflictsHistoricalTask",
            TaskKind::ResetChangeNumber { .. } => "org.opends.server.tasks.ResetChangeNumberTask",
        }
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        match self {
            TaskKind::InitializeFromPeer {
                base_dn,
                source_domain_id,
            } => vec![
                ("ds-task-initialize-domain-dn", base_dn.clone()),
                ("ds-task-initialize-replica-server-id", source_domain_id.to_string()),
            ],
            TaskKind::InitializeAll { base_dn } => vec![
                ("ds-task-initialize-domain-dn", base_dn.clone()),
                ("ds-task-initialize-replica-server-id", "all".to_string()),
            ],
            TaskKind::ResetGenerationId { base_dn, new_value } => {
                let mut attrs = vec![("ds-task-reset-generation-id-domain-base-dn", base_dn.clone())];
                if let Some(value) = new_value {
                    attrs.push(("ds-task-reset-generation-id-new-value", value.to_string()));
                }
                attrs
            }
            TaskKind::PurgeHistorical {
                base_dn,
                maximum_duration_secs,
            } => vec![
                ("ds-task-purge-conflicts-historical-domain-dn", base_dn.clone()),
                (
                    "ds-task-purge-conflicts-historical-maximum-duration",
                    maximum_duration_secs.to_string(),
                ),
            ],
            TaskKind::ResetChangeNumber {
                base_dn,
                change_number,
                csn,
            } => vec![
                ("ds-task-reset-change-number-to", change_number.to_string()),
                ("ds-task-reset-change-number-csn", csn.clone()),
                ("ds-task-reset-change-number-base-dn", base_dn.clone()),
            ],
        }
    }

    pub fn base_dn(&self) -> &str {
        match self {
            TaskKind::InitializeFromPeer { base_dn, .. }
            | TaskKind::InitializeAll { base_dn }
            | TaskKind::ResetGenerationId { base_dn, .. }
            | TaskKind::PurgeHistorical { base_dn, .. }
            | TaskKind::ResetChangeNumber { base_dn, .. } => base_dn,
        }
    }

    fn is_initialization(&self) -> bool {
        matches!(
            self,
            TaskKind::InitializeFromPeer { .. } | TaskKind::InitializeAll { .. }
        )
    }
}

/// When and how a task runs. The default runs it once, now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSchedule {
    /// `YYYYMMDDhhmmss` in UTC; `0` means now.
    pub start: Option<String>,
    /// Cron-like schedule of a recurring task.
    pub recurring: Option<String>,
    pub dependencies: Vec<String>,
    pub failed_dependency_action: Option<String>,
    pub notify_on_completion: Vec<String>,
    pub notify_on_error: Vec<String>,
}

impl TaskSchedule {
    /// True when the task starts now and runs once, so it can be waited for.
    pub fn is_immediate(&self) -> bool {
        self.recurring.is_none() && self.start.as_deref().map(|s| s == "0").unwrap_or(true)
    }

    fn apply(&self, entry: &mut Entry) {
        if let Some(start) = self.start.as_deref().filter(|s| *s != "0") {
            entry.add_values("ds-task-scheduled-start-time", [start]);
        }
        if let Some(recurring) = &self.recurring {
            entry.add_values("ds-recurring-task-schedule", [recurring.as_str()]);
        }
        if !self.dependencies.is_empty() {
            entry.add_values("ds-task-dependency-ids", self.dependencies.iter().cloned());
        }
        if let Some(action) = &self.failed_dependency_action {
            entry.add_values("ds-task-failed-dependency-action", [action.as_str()]);
        }
        if !self.notify_on_completion.is_empty() {
            entry.add_values("ds-task-notify-on-completion", self.notify_on_completion.iter().cloned());
        }
        if !self.notify_on_error.is_empty() {
            entry.add_values("ds-task-notify-on-error", self.notify_on_error.iter().cloned());
        }
    }
}

/// State reported in `ds-task-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Success,
    SuccessWithErrors,
    StoppedByError,
}

impl TaskState {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => TaskState::Running,
            "COMPLETED_SUCCESSFULLY" => TaskState::Success,
            "COMPLETED_WITH_ERRORS" => TaskState::SuccessWithErrors,
            "STOPPED_BY_ERROR" | "STOPPED_BY_SHUTDOWN" | "STOPPED_BY_ADMINISTRATOR"
            | "CANCELED_BEFORE_STARTING" => TaskState::StoppedByError,
            _ => TaskState::Pending,
        }
    }

    pub fn is_done(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::SuccessWithErrors | TaskState::StoppedByError
        )
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    /// The initialization could not reach its peer yet; worth retrying.
    #[error("no reachable peer to initialize {base_dn}{}", detail(.last_log))]
    PeerNotFound {
        base_dn: String,
        last_log: Option<String>,
    },

    #[error("task {task_id} for {base_dn} ended with state {state}{}", detail(.last_log))]
    Failed {
        task_id: String,
        base_dn: String,
        state: String,
        last_log: Option<String>,
    },

    #[error("task {task_id} did not complete within {elapsed:?}")]
    Timeout { task_id: String, elapsed: Duration },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

fn detail(last_log: &Option<String>) -> String {
    last_log.as_ref().map(|l| format!(": {}", l)).unwrap_or_default()
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::PeerNotFound { .. })
    }
}

/// A task entry written on a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedTask {
    pub id: String,
    pub dn: String,
    pub kind: TaskKind,
}

/// Write the task entry, moving to the next ID suffix while the name is taken.
pub async fn create_task(
    dir: &dyn Directory,
    kind: &TaskKind,
    schedule: &TaskSchedule,
) -> Result<LaunchedTask, DirectoryError> {
    let mut n: u64 = 1;
    loop {
        let id = format!("{}-{}", kind.id_prefix(), n);
        let task_dn = format!("ds-task-id={},{}", id, SCHEDULED_TASKS_DN);
        let mut entry = Entry::new(task_dn.clone())
            .with("objectclass", ["top", "ds-task", kind.object_class()])
            .with("ds-task-id", [id.as_str()])
            .with("ds-task-class-name", [kind.class_name()]);
        for (name, value) in kind.attributes() {
            entry.add_values(name, [value]);
        }
        schedule.apply(&mut entry);

        match dir.add(&entry).await {
            Ok(()) => {
                info!("launched task {} on {} for {}", id, dir.address(), kind.base_dn());
                return Ok(LaunchedTask {
                    id,
                    dn: task_dn,
                    kind: kind.clone(),
                });
            }
            Err(e) if e.is_already_exists() => {
                debug!("task ID {} already taken on {}", id, dir.address());
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Polling cadence and optional wall-clock limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl PollSettings {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            deadline: None,
        }
    }

    pub fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }
}

/// Minimum time between two progress lines for a task of `total` entries.
pub fn progress_interval(total: u64) -> Duration {
    match total {
        0..=99 => Duration::ZERO,
        100..=999 => Duration::from_secs(1),
        1_000..=9_999 => Duration::from_secs(5),
        _ => Duration::from_secs(10),
    }
}

fn is_peer_not_found(last_log: Option<&str>) -> bool {
    last_log
        .map(|l| l.to_lowercase().contains("no reachable peer"))
        .unwrap_or(true)
}

/// Poll the task until it reaches a terminal state, disappears, or runs
/// past the deadline. A vanished entry counts as success.
pub async fn wait_for_task(
    dir: &dyn Directory,
    task: &LaunchedTask,
    settings: &PollSettings,
    console: &Console,
) -> Result<TaskState, TaskError> {
    let start = Instant::now();
    let mut last_log: Option<String> = None;
    let mut last_progress: Option<Instant> = None;

    loop {
        let Some(entry) = dir
            .read_entry(&task.dn, &[STATE_ATTR, LOG_ATTR, PROCESSED_ATTR, UNPROCESSED_ATTR])
            .await?
        else {
            debug!("task {} was removed by {}", task.id, dir.address());
            return Ok(TaskState::Success);
        };

        if let Some(log) = entry.values(LOG_ATTR).last() {
            if last_log.as_deref() != Some(log.as_str()) {
                info!("task {}: {}", task.id, log);
                last_log = Some(log.clone());
            }
        }

        if task.kind.is_initialization() {
            if let (Some(processed), Some(unprocessed)) =
                (entry.parse::<u64>(PROCESSED_ATTR), entry.parse::<u64>(UNPROCESSED_ATTR))
            {
                let total = processed + unprocessed;
                let due = last_progress
                    .map(|t| t.elapsed() >= progress_interval(total))
                    .unwrap_or(true);
                if total > 0 && due {
                    console.println(&format!(
                        "{} entries processed ({}% complete).",
                        processed,
                        processed * 100 / total
                    ));
                    last_progress = Some(Instant::now());
                }
            }
        }

        let raw_state = entry.first(STATE_ATTR).unwrap_or_default().to_string();
        match TaskState::parse(&raw_state) {
            TaskState::Success => return Ok(TaskState::Success),
            TaskState::SuccessWithErrors => {
                console.error(&format!(
                    "Task {} completed with errors{}",
                    task.id,
                    detail(&last_log)
                ));
                return Ok(TaskState::SuccessWithErrors);
            }
            TaskState::StoppedByError => {
                let base_dn = task.kind.base_dn().to_string();
                return Err(if task.kind.is_initialization() && is_peer_not_found(last_log.as_deref()) {
                    TaskError::PeerNotFound { base_dn, last_log }
                } else {
                    TaskError::Failed {
                        task_id: task.id.clone(),
                        base_dn,
                        state: raw_state,
                        last_log,
                    }
                });
            }
            TaskState::Pending | TaskState::Running => {}
        }

        if let Some(deadline) = settings.deadline {
            let elapsed = start.elapsed();
            if elapsed > deadline {
                return Err(TaskError::Timeout {
                    task_id: task.id.clone(),
                    elapsed,
                });
            }
        }
        tokio::time::sleep(settings.interval).await;
    }
}

/// Launch a task and wait for it when it runs immediately.
pub async fn run_task(
    dir: &dyn Directory,
    kind: &TaskKind,
    schedule: &TaskSchedule,
    settings: &PollSettings,
    console: &Console,
) -> Result<TaskState, TaskError> {
    let task = create_task(dir, kind, schedule).await?;
    if !schedule.is_immediate() {
        console.println(&format!("Task {} scheduled on {}.", task.id, dir.address()));
        return Ok(TaskState::Pending);
    }
    wait_for_task(dir, &task, settings, console).await
}

/// How often a retryable failure is retried and how the delay grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            attempts: config.initialize_attempts.max(1),
            step: config.retry_step(),
        }
    }

    /// Delay before the next attempt after a failure with `remaining`
    /// attempts left, the failed one included: nothing after the first
    /// failure, one step more after each following one.
    pub fn delay(&self, remaining: u32) -> Duration {
        self.step * self.attempts.saturating_sub(remaining)
    }
}

/// Run `op` until it succeeds, fails for good, or the attempts run out.
/// The last error is returned as-is.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, TaskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    let mut remaining = policy.attempts;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && remaining > 1 => {
                let delay = policy.delay(remaining);
                remaining -= 1;
                warn!("{}; retrying in {:?} ({} attempts left)", e, delay, remaining);
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ScriptedPrompter, SharedBuffer};
    use crate::directory::memory::{MemoryNetwork, TaskStep};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn network() -> MemoryNetwork {
        let network = MemoryNetwork::new();
        network.add_server("ds1:4444", "cn=Directory Manager", "pw");
        network.seed(
            "ds1:4444",
            vec![
                Entry::new("cn=Tasks"),
                Entry::new(SCHEDULED_TASKS_DN),
            ],
        );
        network
    }

    fn console() -> (Console, SharedBuffer) {
        let out = SharedBuffer::default();
        let console = Console::with_io(
            false,
            false,
            Box::new(ScriptedPrompter::default()),
            Box::new(out.clone()),
            Box::new(out.clone()),
        );
        (console, out)
    }

    fn fast() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            deadline: None,
        }
    }

    fn purge() -> TaskKind {
        TaskKind::PurgeHistorical {
            base_dn: "dc=example,dc=com".to_string(),
            maximum_duration_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_task_id_collision_moves_to_next_suffix() {
        let network = network();
        let dir = network.directory("ds1:4444");
        network.seed(
            "ds1:4444",
            vec![Entry::new(format!(
                "ds-task-id=dsreplication-purge-historical-1,{}",
                SCHEDULED_TASKS_DN
            ))],
        );
        let task = create_task(&dir, &purge(), &TaskSchedule::default()).await.unwrap();
        assert_eq!(task.id, "dsreplication-purge-historical-2");
        let entry = network.entry("ds1:4444", &task.dn).unwrap();
        assert!(entry.has_object_class("ds-task-purge-conflicts-historical"));
        assert_eq!(entry.first("ds-task-purge-conflicts-historical-maximum-duration"), Some("3600"));
    }

    #[tokio::test]
    async fn test_vanished_task_is_success() {
        let network = network();
        network.script_task("ds1:4444", vec![TaskStep::state("RUNNING"), TaskStep::Vanish]);
        let dir = network.directory("ds1:4444");
        let (console, _) = console();
        let state = run_task(&dir, &purge(), &TaskSchedule::default(), &fast(), &console)
            .await
            .unwrap();
        assert_eq!(state, TaskState::Success);
    }

    #[tokio::test]
    async fn test_stopped_initialization_without_log_is_peer_not_found() {
        let network = network();
        network.script_task("ds1:4444", vec![TaskStep::state("STOPPED_BY_ERROR")]);
        let dir = network.directory("ds1:4444");
        let (console, _) = console();
        let kind = TaskKind::InitializeFromPeer {
            base_dn: "dc=example,dc=com".to_string(),
            source_domain_id: 3,
        };
        let err = run_task(&dir, &kind, &TaskSchedule::default(), &fast(), &console)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stopped_purge_is_fatal_with_last_log() {
        let network = network();
        network.script_task("ds1:4444", vec![TaskStep::with_log("STOPPED_BY_ERROR", "disk full")]);
        let dir = network.directory("ds1:4444");
        let (console, _) = console();
        let err = run_task(&dir, &purge(), &TaskSchedule::default(), &fast(), &console)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().ends_with("STOPPED_BY_ERROR: disk full"));
    }

    #[tokio::test]
    async fn test_completed_with_errors_proceeds() {
        let network = network();
        network.script_task("ds1:4444", vec![TaskStep::with_log("COMPLETED_WITH_ERRORS", "3 conflicts")]);
        let dir = network.directory("ds1:4444");
        let (console, out) = console();
        let state = run_task(&dir, &purge(), &TaskSchedule::default(), &fast(), &console)
            .await
            .unwrap();
        assert_eq!(state, TaskState::SuccessWithErrors);
        assert!(out.contents().contains("3 conflicts"));
    }

    #[tokio::test]
    async fn test_deadline_stops_polling() {
        let network = network();
        network.script_task("ds1:4444", vec![TaskStep::state("RUNNING"); 10_000]);
        let dir = network.directory("ds1:4444");
        let (console, _) = console();
        let settings = fast().with_deadline(Duration::from_millis(20));
        let err = run_task(&dir, &purge(), &TaskSchedule::default(), &settings, &console)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_scheduled_task_is_not_polled() {
        let network = network();
        let dir = network.directory("ds1:4444");
        let (console, _) = console();
        let schedule = TaskSchedule {
            start: Some("20301231235959".to_string()),
            dependencies: vec!["other-task".to_string()],
            ..TaskSchedule::default()
        };
        let state = run_task(&dir, &purge(), &schedule, &fast(), &console).await.unwrap();
        assert_eq!(state, TaskState::Pending);
        let entry = network
            .entry("ds1:4444", "ds-task-id=dsreplication-purge-historical-1,cn=Scheduled Tasks,cn=Tasks")
            .unwrap();
        assert_eq!(entry.first("ds-task-scheduled-start-time"), Some("20301231235959"));
        assert_eq!(entry.first("ds-task-dependency-ids"), Some("other-task"));
    }

    #[tokio::test]
    async fn test_retry_only_retryable_errors() {
        let policy = RetryPolicy {
            attempts: 5,
            step: Duration::from_millis(1),
        };
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = run_with_retry(&policy, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TaskError::PeerNotFound {
                    base_dn: "dc=example,dc=com".to_string(),
                    last_log: None,
                })
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), TaskError> = run_with_retry(&policy, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::PeerNotFound {
                base_dn: "dc=example,dc=com".to_string(),
                last_log: None,
            })
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_retry_delays_grow_linearly() {
        let policy = RetryPolicy::from_config(&ToolConfig::default());
        let delays: Vec<Duration> = (2..=5).rev().map(|remaining| policy.delay(remaining)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(9)
            ]
        );
    }

    #[tokio::test]
    async fn test_first_retry_is_immediate() {
        let policy = RetryPolicy {
            attempts: 2,
            step: Duration::from_secs(30),
        };
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let started = std::time::Instant::now();
        let result = run_with_retry(&policy, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TaskError::PeerNotFound {
                    base_dn: "dc=example,dc=com".to_string(),
                    last_log: None,
                })
            } else {
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_progress_interval() {
        assert_eq!(progress_interval(50), Duration::ZERO);
        assert_eq!(progress_interval(500), Duration::from_secs(1));
        assert_eq!(progress_interval(5_000), Duration::from_secs(5));
        assert_eq!(progress_interval(50_000), Duration::from_secs(10));
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!(TaskState::parse("completed_successfully"), TaskState::Success);
        assert_eq!(TaskState::parse("WAITING_ON_START_TIME"), TaskState::Pending);
        assert!(TaskState::parse("STOPPED_BY_SHUTDOWN").is_done());
        assert!(!TaskState::parse("RUNNING").is_done());
    }
}
