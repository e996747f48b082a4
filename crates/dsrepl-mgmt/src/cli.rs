use crate::ads::administrator_dn;
use crate::config::ToolConfig;
use crate::console::Console;
use crate::directory::Security;
use crate::error::{ReplicationCliError, Result, ReturnCode};
use crate::tasks::TaskSchedule;
use crate::user_data::{
    AdminCredentials, DisableData, EnableData, EnableServer, Operation, PurgeHistoricalData,
    ResetChangeNumberData, ServerConnection, ServerData, Session, SourceDestinationData,
};
use clap::{Args, Parser, Subcommand};
use dsrepl_topology::dn;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dsreplication", version)]
#[command(about = "Configure and monitor replication between directory servers", long_about = None)]
pub struct Cli {
    /// Tool settings file (TOML or JSON)
    #[arg(long, global = true, env = "DSREPLICATION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Global administrator user ID
    #[arg(short = 'I', long = "adminUID", global = true)]
    pub admin_uid: Option<String>,

    #[arg(short = 'w', long = "adminPassword", global = true)]
    pub admin_password: Option<String>,

    #[arg(short = 'j', long = "adminPasswordFile", global = true)]
    pub admin_password_file: Option<PathBuf>,

    /// Base DN to act on; repeat for several
    #[arg(short = 'b', long = "baseDN", global = true)]
    pub base_dns: Vec<String>,

    /// Trust every server certificate
    #[arg(short = 'X', long = "trustAll", global = true)]
    pub trust_all: bool,

    /// Connect timeout in milliseconds
    #[arg(long = "connectTimeout", global = true)]
    pub connect_timeout_ms: Option<u64>,

    /// Never prompt; fail when input is missing
    #[arg(short = 'n', long = "no-prompt", global = true)]
    pub no_prompt: bool,

    #[arg(short = 'Q', long = "quiet", global = true)]
    pub quiet: bool,

    #[arg(long, global = true)]
    pub advanced: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    #[arg(long = "hostname")]
    pub hostname: Option<String>,

    /// Administration port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    #[arg(short = 'Z', long = "useSSL")]
    pub use_ssl: bool,

    #[arg(short = 'q', long = "useStartTLS")]
    pub use_starttls: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SourceDestinationArgs {
    #[arg(long = "hostSource")]
    pub host_source: Option<String>,

    #[arg(long = "portSource")]
    pub port_source: Option<u16>,

    #[arg(short = 'O', long = "hostDestination")]
    pub host_destination: Option<String>,

    #[arg(long = "portDestination")]
    pub port_destination: Option<u16>,

    #[arg(short = 'Z', long = "useSSL")]
    pub use_ssl: bool,

    #[arg(short = 'q', long = "useStartTLS")]
    pub use_starttls: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EnableArgs {
    #[arg(long = "host1")]
    pub host1: Option<String>,
    #[arg(long = "port1")]
    pub port1: Option<u16>,
    #[arg(short = 'D', long = "bindDN1")]
    pub bind_dn1: Option<String>,
    #[arg(long = "bindPassword1")]
    pub bind_password1: Option<String>,
    #[arg(long = "bindPasswordFile1")]
    pub bind_password_file1: Option<PathBuf>,
    #[arg(long = "useSSL1")]
    pub use_ssl1: bool,
    #[arg(long = "useStartTLS1")]
    pub use_starttls1: bool,
    #[arg(short = 'r', long = "replicationPort1")]
    pub replication_port1: Option<u16>,
    #[arg(long = "secureReplication1")]
    pub secure_replication1: bool,
    #[arg(long = "noReplicationServer1")]
    pub no_replication_server1: bool,
    #[arg(long = "onlyReplicationServer1")]
    pub only_replication_server1: bool,

    #[arg(short = 'O', long = "host2")]
    pub host2: Option<String>,
    #[arg(long = "port2")]
    pub port2: Option<u16>,
    #[arg(long = "bindDN2")]
    pub bind_dn2: Option<String>,
    #[arg(long = "bindPassword2")]
    pub bind_password2: Option<String>,
    #[arg(short = 'F', long = "bindPasswordFile2")]
    pub bind_password_file2: Option<PathBuf>,
    #[arg(long = "useSSL2")]
    pub use_ssl2: bool,
    #[arg(long = "useStartTLS2")]
    pub use_starttls2: bool,
    #[arg(short = 'R', long = "replicationPort2")]
    pub replication_port2: Option<u16>,
    #[arg(long = "secureReplication2")]
    pub secure_replication2: bool,
    #[arg(long = "noReplicationServer2")]
    pub no_replication_server2: bool,
    #[arg(long = "onlyReplicationServer2")]
    pub only_replication_server2: bool,

    /// Do not check that local replication ports are free
    #[arg(short = 'S', long = "skipPortCheck")]
    pub skip_port_check: bool,
    #[arg(long = "noSchemaReplication")]
    pub no_schema_replication: bool,
    #[arg(long = "useSecondServerAsSchemaSource")]
    pub use_second_server_as_schema_source: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TaskScheduleArgs {
    /// Start time, YYYYMMDDhhmmss in UTC, or 0 for now
    #[arg(short = 't', long = "start")]
    pub start: Option<String>,
    #[arg(long = "recurringTask")]
    pub recurring: Option<String>,
    #[arg(long = "dependency")]
    pub dependencies: Vec<String>,
    #[arg(long = "failedDependencyAction")]
    pub failed_dependency_action: Option<String>,
    #[arg(long = "completionNotify")]
    pub completion_notify: Vec<String>,
    #[arg(long = "errorNotify")]
    pub error_notify: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Set up replication between two servers
    Enable(EnableArgs),
    /// Stop replicating base DNs on one server
    Disable {
        #[command(flatten)]
        conn: ConnectionArgs,
        /// Bind with this DN instead of the global administrator
        #[arg(short = 'D', long = "bindDN")]
        bind_dn: Option<String>,
        #[arg(long = "disableReplicationServer")]
        disable_replication_server: bool,
        #[arg(short = 'a', long = "disableAll")]
        disable_all: bool,
    },
    /// Copy base DNs from one server to another
    Initialize(SourceDestinationArgs),
    /// Copy base DNs from one server to every replica
    InitializeAll(ConnectionArgs),
    PreExternalInitialization {
        #[command(flatten)]
        conn: ConnectionArgs,
        /// Reset only the local domain
        #[arg(short = 'l', long = "local-only")]
        local_only: bool,
    },
    PostExternalInitialization(ConnectionArgs),
    ResetChangeNumber {
        #[command(flatten)]
        servers: SourceDestinationArgs,
        #[arg(long = "change-number")]
        change_number: Option<u64>,
    },
    /// Show the replication status of a topology
    Status {
        #[command(flatten)]
        conn: ConnectionArgs,
        #[arg(short = 's', long = "script-friendly")]
        script_friendly: bool,
    },
    PurgeHistorical {
        #[command(flatten)]
        conn: ConnectionArgs,
        /// Maximum duration of the purge, in seconds
        #[arg(long = "maximumDuration", default_value = "3600")]
        maximum_duration: u64,
        /// Purge a stopped server through its configuration files
        #[arg(long)]
        offline: bool,
        #[command(flatten)]
        schedule: TaskScheduleArgs,
    },
}

fn conflicting(msg: impl Into<String>) -> ReplicationCliError {
    ReplicationCliError::new(ReturnCode::ConflictingArgs, msg)
}

fn user_data(msg: impl Into<String>) -> ReplicationCliError {
    ReplicationCliError::new(ReturnCode::ErrorUserData, msg)
}

fn read_password_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ReplicationCliError::with_source(
            ReturnCode::ErrorUserData,
            format!("Cannot read the password file {}", path.display()),
            e,
        )
    })?;
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

fn password(value: &Option<String>, file: &Option<PathBuf>, what: &str) -> Result<Option<String>> {
    match (value, file) {
        (Some(_), Some(_)) => Err(conflicting(format!(
            "The {} password and password file cannot be used together.",
            what
        ))),
        (Some(p), None) => Ok(Some(p.clone())),
        (None, Some(f)) => read_password_file(f).map(Some),
        (None, None) => Ok(None),
    }
}

/// `--useSSL` and `--useStartTLS` win over the configured default.
fn security(use_ssl: bool, use_starttls: bool, default: Security) -> Result<Security> {
    match (use_ssl, use_starttls) {
        (true, true) => Err(conflicting("SSL and StartTLS cannot be used together.")),
        (true, false) => Ok(Security::Ssl),
        (false, true) => Ok(Security::StartTls),
        (false, false) => Ok(default),
    }
}

impl Cli {
    /// Check the arguments, fill gaps through the console, and build the
    /// session and the operation to run.
    pub fn into_operation(self, config: ToolConfig, console: &Console) -> Result<(Session, Operation)> {
        let mut session = Session::new(config);
        session.interactive = !self.no_prompt;
        session.quiet = self.quiet;
        session.advanced = self.advanced;
        session.trust_all |= self.trust_all;
        if let Some(ms) = self.connect_timeout_ms {
            session.connect_timeout = Duration::from_millis(ms);
        }

        for base_dn in &self.base_dns {
            dn::validate(base_dn)
                .map_err(|e| ReplicationCliError::with_source(ReturnCode::ErrorUserData, e.to_string(), e))?;
        }

        let admin_password = password(&self.admin_password, &self.admin_password_file, "administrator")?;
        let admin_uid = self
            .admin_uid
            .clone()
            .unwrap_or_else(|| session.config.default_admin_uid.clone());

        let op = match &self.command {
            Command::Enable(args) => self.enable(&session, console, args, admin_uid, admin_password)?,
            Command::Disable {
                conn,
                bind_dn,
                disable_replication_server,
                disable_all,
            } => {
                if *disable_all && !self.base_dns.is_empty() {
                    return Err(conflicting("--disableAll cannot be used with --baseDN."));
                }
                if !session.interactive && !*disable_all && !*disable_replication_server {
                    self.require_base_dns()?;
                }
                let admin_password = self.require_admin_password(&session, console, admin_password)?;
                let (bind_dn, admin) = match bind_dn {
                    Some(bind_dn) => (bind_dn.clone(), None),
                    None => (
                        administrator_dn(&admin_uid),
                        Some(AdminCredentials {
                            uid: admin_uid.clone(),
                            password: Some(admin_password.clone()),
                        }),
                    ),
                };
                let mut server = self.connection(&session, console, conn, "the server")?;
                server.bind_dn = bind_dn;
                server.password = Some(admin_password);
                Operation::Disable(DisableData {
                    server,
                    base_dns: self.base_dns.clone(),
                    admin,
                    disable_replication_server: *disable_replication_server,
                    disable_all: *disable_all,
                })
            }
            Command::Initialize(args) => {
                if !session.interactive {
                    self.require_base_dns()?;
                }
                let admin = self.admin(&session, console, admin_uid, admin_password)?;
                Operation::Initialize(self.source_destination(&session, console, args, &admin)?)
            }
            Command::InitializeAll(conn) => {
                Operation::InitializeAll(self.server_data(&session, console, conn, admin_uid, admin_password, true)?)
            }
            Command::PreExternalInitialization { conn, local_only } => Operation::PreExternalInitialization {
                data: self.server_data(&session, console, conn, admin_uid, admin_password, true)?,
                local_only: *local_only,
            },
            Command::PostExternalInitialization(conn) => Operation::PostExternalInitialization(
                self.server_data(&session, console, conn, admin_uid, admin_password, true)?,
            ),
            Command::ResetChangeNumber { servers, change_number } => {
                let admin = self.admin(&session, console, admin_uid, admin_password)?;
                Operation::ResetChangeNumber(ResetChangeNumberData {
                    servers: self.source_destination(&session, console, servers, &admin)?,
                    change_number: *change_number,
                })
            }
            Command::Status { conn, script_friendly } => {
                if self.quiet {
                    return Err(conflicting("--quiet cannot be used with status."));
                }
                Operation::Status {
                    data: self.server_data(&session, console, conn, admin_uid, admin_password, false)?,
                    script_friendly: *script_friendly,
                }
            }
            Command::PurgeHistorical {
                conn,
                maximum_duration,
                offline,
                schedule,
            } => {
                if !session.interactive {
                    self.require_base_dns()?;
                }
                let schedule = TaskSchedule {
                    start: schedule.start.clone(),
                    recurring: schedule.recurring.clone(),
                    dependencies: schedule.dependencies.clone(),
                    failed_dependency_action: schedule.failed_dependency_action.clone(),
                    notify_on_completion: schedule.completion_notify.clone(),
                    notify_on_error: schedule.error_notify.clone(),
                };
                if *offline && schedule != TaskSchedule::default() {
                    return Err(conflicting("Task scheduling options cannot be used with --offline."));
                }
                let server = if *offline {
                    None
                } else {
                    let admin = self.admin(&session, console, admin_uid, admin_password)?;
                    let mut server = self.connection(&session, console, conn, "the server")?;
                    server.bind_dn = administrator_dn(&admin.uid);
                    server.password = admin.password;
                    Some(server)
                };
                Operation::PurgeHistorical(PurgeHistoricalData {
                    server,
                    base_dns: self.base_dns.clone(),
                    maximum_duration_secs: *maximum_duration,
                    schedule,
                })
            }
        };
        Ok((session, op))
    }

    fn require_base_dns(&self) -> Result<()> {
        if self.base_dns.is_empty() {
            Err(user_data("At least one base DN is required in non-interactive mode."))
        } else {
            Ok(())
        }
    }

    fn require_admin_password(&self, session: &Session, console: &Console, password: Option<String>) -> Result<String> {
        match password {
            Some(password) => Ok(password),
            None if !session.interactive => {
                Err(user_data("The administrator password is required in non-interactive mode."))
            }
            None => console.ask_password("Global administrator password"),
        }
    }

    fn admin(
        &self,
        session: &Session,
        console: &Console,
        uid: String,
        password: Option<String>,
    ) -> Result<AdminCredentials> {
        let password = self.require_admin_password(session, console, password)?;
        Ok(AdminCredentials {
            uid,
            password: Some(password),
        })
    }

    fn host_port(
        &self,
        session: &Session,
        console: &Console,
        host: &Option<String>,
        port: Option<u16>,
        what: &str,
    ) -> Result<(String, u16)> {
        let host = match host {
            Some(host) => host.clone(),
            None => console.ask(&format!("Host name of {}", what), Some("localhost"))?,
        };
        let port = match port {
            Some(port) => port,
            None => {
                let default = session.config.default_admin_port.to_string();
                console
                    .ask(&format!("Administration port of {}", what), Some(&default))?
                    .parse()
                    .map_err(|_| user_data("The port must be a number between 1 and 65535."))?
            }
        };
        Ok((host, port))
    }

    fn connection(
        &self,
        session: &Session,
        console: &Console,
        conn: &ConnectionArgs,
        what: &str,
    ) -> Result<ServerConnection> {
        let security = security(conn.use_ssl, conn.use_starttls, session.config.default_security)?;
        let (host, port) = self.host_port(session, console, &conn.hostname, conn.port, what)?;
        Ok(ServerConnection {
            host,
            port,
            security,
            bind_dn: session.config.default_bind_dn.clone(),
            password: None,
        })
    }

    fn server_data(
        &self,
        session: &Session,
        console: &Console,
        conn: &ConnectionArgs,
        uid: String,
        password: Option<String>,
        needs_base_dns: bool,
    ) -> Result<ServerData> {
        if needs_base_dns && !session.interactive {
            self.require_base_dns()?;
        }
        let admin = self.admin(session, console, uid, password)?;
        let mut server = self.connection(session, console, conn, "the server")?;
        server.bind_dn = administrator_dn(&admin.uid);
        server.password = admin.password.clone();
        Ok(ServerData {
            server,
            base_dns: self.base_dns.clone(),
            admin,
        })
    }

    fn source_destination(
        &self,
        session: &Session,
        console: &Console,
        args: &SourceDestinationArgs,
        admin: &AdminCredentials,
    ) -> Result<SourceDestinationData> {
        let security = security(args.use_ssl, args.use_starttls, session.config.default_security)?;
        let (host_source, port_source) =
            self.host_port(session, console, &args.host_source, args.port_source, "the source server")?;
        let (host_destination, port_destination) = self.host_port(
            session,
            console,
            &args.host_destination,
            args.port_destination,
            "the destination server",
        )?;
        if host_source.eq_ignore_ascii_case(&host_destination) && port_source == port_destination {
            return Err(user_data("The source and the destination must be different servers."));
        }
        let conn = |host: String, port: u16| ServerConnection {
            host,
            port,
            security,
            bind_dn: administrator_dn(&admin.uid),
            password: admin.password.clone(),
        };
        Ok(SourceDestinationData {
            source: conn(host_source, port_source),
            destination: conn(host_destination, port_destination),
            base_dns: self.base_dns.clone(),
        })
    }

    fn enable(
        &self,
        session: &Session,
        console: &Console,
        args: &EnableArgs,
        admin_uid: String,
        admin_password: Option<String>,
    ) -> Result<Operation> {
        if args.no_schema_replication && args.use_second_server_as_schema_source {
            return Err(conflicting(
                "--noSchemaReplication cannot be used with --useSecondServerAsSchemaSource.",
            ));
        }
        if args.no_replication_server1 && args.only_replication_server1 {
            return Err(conflicting(
                "--noReplicationServer1 cannot be used with --onlyReplicationServer1.",
            ));
        }
        if args.no_replication_server2 && args.only_replication_server2 {
            return Err(conflicting(
                "--noReplicationServer2 cannot be used with --onlyReplicationServer2.",
            ));
        }
        if args.no_replication_server1 && args.no_replication_server2 {
            return Err(user_data("At least one of the two servers must be a replication server."));
        }
        let configures_domains = !args.only_replication_server1 || !args.only_replication_server2;
        if configures_domains && !session.interactive {
            self.require_base_dns()?;
        }

        let first = self.enable_server(
            session,
            console,
            EnableSide {
                host: &args.host1,
                port: args.port1,
                bind_dn: &args.bind_dn1,
                password: password(&args.bind_password1, &args.bind_password_file1, "first server bind")?,
                use_ssl: args.use_ssl1,
                use_starttls: args.use_starttls1,
                replication_port: args.replication_port1,
                secure_replication: args.secure_replication1,
                no_replication_server: args.no_replication_server1,
                only_replication_server: args.only_replication_server1,
                what: "the first server",
            },
        )?;
        let second = self.enable_server(
            session,
            console,
            EnableSide {
                host: &args.host2,
                port: args.port2,
                bind_dn: &args.bind_dn2,
                password: password(&args.bind_password2, &args.bind_password_file2, "second server bind")?,
                use_ssl: args.use_ssl2,
                use_starttls: args.use_starttls2,
                replication_port: args.replication_port2,
                secure_replication: args.secure_replication2,
                no_replication_server: args.no_replication_server2,
                only_replication_server: args.only_replication_server2,
                what: "the second server",
            },
        )?;

        let (c1, c2) = (&first.connection, &second.connection);
        if c1.host.eq_ignore_ascii_case(&c2.host) && c1.port == c2.port {
            return Err(user_data("The two servers must be different."));
        }
        if c1.host.eq_ignore_ascii_case(&c2.host)
            && first.configure_replication_server
            && second.configure_replication_server
            && first.replication_port == second.replication_port
        {
            return Err(user_data(format!(
                "Both servers run on {} and cannot use the same replication port {}.",
                c1.host, first.replication_port
            )));
        }

        let admin = self.admin(session, console, admin_uid, admin_password)?;
        Ok(Operation::Enable(EnableData {
            first,
            second,
            base_dns: self.base_dns.clone(),
            admin,
            replicate_schema: !args.no_schema_replication,
            schema_from_second: args.use_second_server_as_schema_source,
            skip_port_check: args.skip_port_check,
        }))
    }

    fn enable_server(&self, session: &Session, console: &Console, side: EnableSide<'_>) -> Result<EnableServer> {
        let security = security(side.use_ssl, side.use_starttls, session.config.default_security)?;
        let (host, port) = self.host_port(session, console, side.host, side.port, side.what)?;
        let replication_port = side.replication_port.unwrap_or(session.config.default_replication_port);
        if replication_port == port && !side.no_replication_server {
            return Err(user_data(format!(
                "The replication port of {} cannot be its administration port {}.",
                side.what, port
            )));
        }
        if side.password.is_none() && !session.interactive {
            return Err(user_data(format!(
                "The bind password of {} is required in non-interactive mode.",
                side.what
            )));
        }
        Ok(EnableServer {
            connection: ServerConnection {
                host,
                port,
                security,
                bind_dn: side
                    .bind_dn
                    .clone()
                    .unwrap_or_else(|| session.config.default_bind_dn.clone()),
                password: side.password,
            },
            replication_port,
            secure_replication: side.secure_replication,
            configure_replication_server: !side.no_replication_server,
            configure_replication_domain: !side.only_replication_server,
        })
    }
}

struct EnableSide<'a> {
    host: &'a Option<String>,
    port: Option<u16>,
    bind_dn: &'a Option<String>,
    password: Option<String>,
    use_ssl: bool,
    use_starttls: bool,
    replication_port: Option<u16>,
    secure_replication: bool,
    no_replication_server: bool,
    only_replication_server: bool,
    what: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{ScriptedPrompter, SharedBuffer};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn console() -> Console {
        Console::with_io(
            false,
            false,
            Box::new(ScriptedPrompter::default()),
            Box::new(SharedBuffer::default()),
            Box::new(SharedBuffer::default()),
        )
    }

    fn parse<S: AsRef<str>>(args: &[S]) -> Result<(Session, Operation)> {
        let argv = std::iter::once("dsreplication").chain(args.iter().map(AsRef::as_ref));
        let cli = Cli::try_parse_from(argv).expect("arguments parse");
        cli.into_operation(ToolConfig::default(), &console())
    }

    fn code<S: AsRef<str>>(args: &[S]) -> ReturnCode {
        parse(args).unwrap_err().code
    }

    fn enable(host2: &str, extra: &[&str]) -> Vec<String> {
        let mut args = vec![
            "enable", "-n", "--host1", "ds1", "--port1", "4444", "--bindPassword1", "pw", "-O", host2,
            "--bindPassword2", "pw", "-w", "secret", "-b", "dc=example,dc=com",
        ];
        args.extend_from_slice(extra);
        args.into_iter().map(String::from).collect()
    }

    #[test]
    fn test_enable_builds_both_servers() {
        let (session, op) = parse(&enable("ds2", &["--secureReplication1", "-R", "9989"])).unwrap();
        assert!(!session.interactive);
        let Operation::Enable(data) = op else {
            panic!("expected enable");
        };
        assert_eq!(data.first.connection.address(), "ds1:4444");
        assert_eq!(data.second.connection.address(), "ds2:4444");
        assert_eq!(data.first.connection.bind_dn, "cn=Directory Manager");
        assert_eq!(data.first.replication_port, 8989);
        assert_eq!(data.second.replication_port, 9989);
        assert!(data.first.secure_replication);
        assert!(data.replicate_schema);
        assert_eq!(data.admin.uid, "admin");
        assert_eq!(data.admin.password.as_deref(), Some("secret"));
        assert_eq!(data.base_dns, vec!["dc=example,dc=com".to_string()]);
    }

    #[test]
    fn test_enable_conflicts() {
        assert_eq!(
            code(&enable("ds2", &["--noSchemaReplication", "--useSecondServerAsSchemaSource"])),
            ReturnCode::ConflictingArgs
        );
        assert_eq!(
            code(&enable("ds2", &["--noReplicationServer1", "--onlyReplicationServer1"])),
            ReturnCode::ConflictingArgs
        );
        assert_eq!(
            code(&enable("ds2", &["--useSSL1", "--useStartTLS1"])),
            ReturnCode::ConflictingArgs
        );
        assert_eq!(
            code(&enable("ds2", &["--noReplicationServer1", "--noReplicationServer2"])),
            ReturnCode::ErrorUserData
        );
        assert_eq!(code(&enable("DS1", &[])), ReturnCode::ErrorUserData);
        assert_eq!(code(&enable("ds2", &["-r", "4444"])), ReturnCode::ErrorUserData);
    }

    #[test]
    fn test_same_host_needs_distinct_replication_ports() {
        assert_eq!(code(&enable("ds1", &["--port2", "5444"])), ReturnCode::ErrorUserData);
        assert!(parse(&enable("ds1", &["--port2", "5444", "-R", "9989"])).is_ok());
    }

    #[test]
    fn test_non_interactive_requirements() {
        assert_eq!(
            code(&["initialize-all", "-n", "--hostname", "ds1", "-p", "4444", "-w", "pw"]),
            ReturnCode::ErrorUserData
        );
        assert_eq!(
            code(&["initialize-all", "-n", "--hostname", "ds1", "-b", "dc=example,dc=com"]),
            ReturnCode::ErrorUserData
        );
        assert_eq!(
            code(&["status", "-n", "-b", "not a dn", "-w", "pw"]),
            ReturnCode::ErrorUserData
        );
    }

    #[test]
    fn test_disable_all_with_base_dn_conflicts() {
        assert_eq!(
            code(&["disable", "-n", "-a", "-b", "dc=example,dc=com", "-w", "pw"]),
            ReturnCode::ConflictingArgs
        );
        let (_, op) = parse(&["disable", "-n", "-a", "-w", "pw", "--hostname", "ds1"]).unwrap();
        let Operation::Disable(data) = op else {
            panic!("expected disable");
        };
        assert!(data.disable_all);
        assert_eq!(data.server.bind_dn, "cn=admin,cn=Administrators,cn=admin data");
        assert!(data.admin.is_some());

        let (_, op) = parse(&[
            "disable", "-n", "-a", "-w", "pw", "-D", "cn=Directory Manager",
        ])
        .unwrap();
        let Operation::Disable(data) = op else {
            panic!("expected disable");
        };
        assert_eq!(data.server.bind_dn, "cn=Directory Manager");
        assert!(data.admin.is_none());
    }

    #[test]
    fn test_quiet_status_conflicts() {
        assert_eq!(code(&["status", "-n", "-Q", "-w", "pw"]), ReturnCode::ConflictingArgs);
        let (session, op) = parse(&["status", "-n", "-w", "pw", "-s"]).unwrap();
        assert!(matches!(op, Operation::Status { script_friendly: true, .. }));
        assert_eq!(session.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_connection_security() {
        let status_security = |config: ToolConfig, extra: &[&str]| {
            let argv = ["dsreplication", "status", "-n", "-w", "pw"].into_iter().chain(extra.iter().copied());
            let cli = Cli::try_parse_from(argv).expect("arguments parse");
            let (_, op) = cli.into_operation(config, &console()).unwrap();
            let Operation::Status { data, .. } = op else {
                panic!("expected status");
            };
            data.server.security
        };
        assert_eq!(status_security(ToolConfig::default(), &[]), Security::Ssl);
        assert_eq!(status_security(ToolConfig::default(), &["-q"]), Security::StartTls);

        let plain = ToolConfig {
            default_security: Security::Plain,
            ..ToolConfig::default()
        };
        assert_eq!(status_security(plain.clone(), &[]), Security::Plain);
        assert_eq!(status_security(plain, &["-Z"]), Security::Ssl);
        assert_eq!(code(&["status", "-n", "-w", "pw", "-Z", "-q"]), ReturnCode::ConflictingArgs);
    }

    #[test]
    fn test_admin_password_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let (_, op) = parse(&["status", "-n", "-j", &path]).unwrap();
        let Operation::Status { data, .. } = op else {
            panic!("expected status");
        };
        assert_eq!(data.admin.password.as_deref(), Some("from-file"));
        assert_eq!(
            code(&["status", "-n", "-j", &path, "-w", "pw"]),
            ReturnCode::ConflictingArgs
        );
    }

    #[test]
    fn test_offline_purge_needs_no_password() {
        let (_, op) = parse(&["purge-historical", "-n", "--offline", "-b", "dc=example,dc=com"]).unwrap();
        let Operation::PurgeHistorical(data) = op else {
            panic!("expected purge-historical");
        };
        assert!(data.server.is_none());
        assert_eq!(data.maximum_duration_secs, 3600);
        assert_eq!(
            code(&["purge-historical", "-n", "--offline", "-b", "dc=example,dc=com", "-t", "0"]),
            ReturnCode::ConflictingArgs
        );
    }
}
