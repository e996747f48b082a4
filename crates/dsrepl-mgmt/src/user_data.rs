//! Validated input of one invocation.

use crate::config::ToolConfig;
use crate::directory::Security;
use crate::tasks::TaskSchedule;
use std::time::Duration;

/// Settings shared by every operation; fixed once arguments are parsed.
#[derive(Debug, Clone)]
pub struct Session {
    pub config: ToolConfig,
    pub interactive: bool,
    pub quiet: bool,
    pub advanced: bool,
    pub trust_all: bool,
    pub connect_timeout: Duration,
}

impl Session {
    pub fn new(config: ToolConfig) -> Self {
        Self {
            trust_all: config.trust_all,
            connect_timeout: config.connect_timeout(),
            config,
            interactive: true,
            quiet: false,
            advanced: false,
        }
    }
}

/// How to reach and authenticate to one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConnection {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub bind_dn: String,
    /// `None` until prompted for.
    pub password: Option<String>,
}

impl ServerConnection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The global administrator used to reach every server of a topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub uid: String,
    pub password: Option<String>,
}

/// What one server of an `enable` becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableServer {
    pub connection: ServerConnection,
    pub replication_port: u16,
    pub secure_replication: bool,
    pub configure_replication_server: bool,
    pub configure_replication_domain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableData {
    pub first: EnableServer,
    pub second: EnableServer,
    pub base_dns: Vec<String>,
    pub admin: AdminCredentials,
    pub replicate_schema: bool,
    pub schema_from_second: bool,
    pub skip_port_check: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableData {
    pub server: ServerConnection,
    pub base_dns: Vec<String>,
    /// Set when bound as the global administrator, so peers can be reached.
    pub admin: Option<AdminCredentials>,
    pub disable_replication_server: bool,
    pub disable_all: bool,
}

/// Source and destination of `initialize` and `reset-change-number`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDestinationData {
    pub source: ServerConnection,
    pub destination: ServerConnection,
    pub base_dns: Vec<String>,
}

/// One server and its base DNs: `initialize-all`, external initialization
/// and `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerData {
    pub server: ServerConnection,
    pub base_dns: Vec<String>,
    pub admin: AdminCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetChangeNumberData {
    pub servers: SourceDestinationData,
    pub change_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeHistoricalData {
    /// `None` for an offline purge.
    pub server: Option<ServerConnection>,
    pub base_dns: Vec<String>,
    pub maximum_duration_secs: u64,
    pub schedule: TaskSchedule,
}

/// The sub-command to run, with everything it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Enable(EnableData),
    Disable(DisableData),
    Initialize(SourceDestinationData),
    InitializeAll(ServerData),
    PreExternalInitialization { data: ServerData, local_only: bool },
    PostExternalInitialization(ServerData),
    ResetChangeNumber(ResetChangeNumberData),
    Status { data: ServerData, script_friendly: bool },
    PurgeHistorical(PurgeHistoricalData),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Enable(_) => "enable",
            Operation::Disable(_) => "disable",
            Operation::Initialize(_) => "initialize",
            Operation::InitializeAll(_) => "initialize-all",
            Operation::PreExternalInitialization { .. } => "pre-external-initialization",
            Operation::PostExternalInitialization(_) => "post-external-initialization",
            Operation::ResetChangeNumber(_) => "reset-change-number",
            Operation::Status { .. } => "status",
            Operation::PurgeHistorical(_) => "purge-historical",
        }
    }
}
