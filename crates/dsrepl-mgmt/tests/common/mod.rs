//! Common fixtures for the operation tests: in-process servers laid out like
//! a freshly installed directory server, and a runner that goes through the
//! command line like the binary does.

#![allow(dead_code)]

use dsrepl_mgmt::cli::Cli;
use dsrepl_mgmt::console::{Console, ScriptedPrompter, SharedBuffer};
use dsrepl_mgmt::directory::memory::MemoryNetwork;
use dsrepl_mgmt::directory::{Directory, Entry, Modification};
use dsrepl_mgmt::server_config::{DOMAINS_DN, REPLICATION_SERVER_DN};
use dsrepl_mgmt::operations::Executor;
use dsrepl_mgmt::{ReplicationCliError, ReturnCode, ToolConfig};
use clap::Parser;

pub const ROOT_DN: &str = "cn=Directory Manager";
pub const ROOT_PASSWORD: &str = "password";
pub const ADMIN_PASSWORD: &str = "secret";
pub const BASE_DN: &str = "dc=example,dc=com";
pub const OTHER_BASE_DN: &str = "o=test";

/// Configuration entries of a server holding `base_dns`.
pub fn server_entries(host: &str, schema_generation: &str, base_dns: &[&str]) -> Vec<Entry> {
    let mut entries = vec![
        Entry::new("")
            .with("objectclass", ["top", "ds-root-dse"])
            .with("currentTime", ["20260101120000Z"]),
        Entry::new("cn=config").with("objectclass", ["top", "ds-cfg-root-config"]),
        Entry::new("cn=Backends,cn=config").with("objectclass", ["top", "ds-cfg-branch"]),
        Entry::new("ds-cfg-backend-id=config,cn=Backends,cn=config")
            .with("objectclass", ["top", "ds-cfg-backend"])
            .with("ds-cfg-backend-id", ["config"])
            .with("ds-cfg-base-dn", ["cn=config"])
            .with("ds-cfg-enabled", ["true"]),
        Entry::new("ds-cfg-backend-id=schema,cn=Backends,cn=config")
            .with("objectclass", ["top", "ds-cfg-backend"])
            .with("ds-cfg-backend-id", ["schema"])
            .with("ds-cfg-base-dn", ["cn=schema"])
            .with("ds-cfg-enabled", ["true"]),
        Entry::new("cn=Connection Handlers,cn=config").with("objectclass", ["top", "ds-cfg-branch"]),
        Entry::new("cn=LDAP Connection Handler,cn=Connection Handlers,cn=config")
            .with("objectclass", ["top", "ds-cfg-connection-handler", "ds-cfg-ldap-connection-handler"])
            .with("ds-cfg-listen-port", ["1389"])
            .with("ds-cfg-enabled", ["true"])
            .with("ds-cfg-allow-start-tls", ["true"]),
        Entry::new("cn=Synchronization Providers,cn=config").with("objectclass", ["top", "ds-cfg-branch"]),
        Entry::new("cn=Crypto Manager,cn=config").with("objectclass", ["top", "ds-cfg-crypto-manager"]),
        Entry::new("cn=ads-truststore").with("objectclass", ["top", "ds-cfg-branch"]),
        Entry::new("ds-cfg-key-id=ads-certificate,cn=ads-truststore")
            .with("objectclass", ["top", "ds-cfg-instance-key"])
            .with("ds-cfg-key-id", [format!("key-{}", host)])
            .with_binary(
                "ds-cfg-public-key-certificate;binary",
                vec![format!("certificate of {}", host).into_bytes()],
            ),
        Entry::new("cn=Tasks").with("objectclass", ["top", "ds-cfg-branch"]),
        Entry::new("cn=Scheduled Tasks,cn=Tasks").with("objectclass", ["top", "ds-cfg-branch"]),
        Entry::new("cn=schema")
            .with("objectclass", ["top", "ldapSubentry", "subschema"])
            .with("ds-sync-generation-id", [schema_generation]),
    ];
    for (i, base_dn) in base_dns.iter().enumerate() {
        let backend_id = format!("userRoot{}", i);
        entries.push(
            Entry::new(format!("ds-cfg-backend-id={},cn=Backends,cn=config", backend_id))
                .with("objectclass", ["top", "ds-cfg-backend", "ds-cfg-local-db-backend"])
                .with("ds-cfg-backend-id", [backend_id.as_str()])
                .with("ds-cfg-base-dn", [*base_dn])
                .with("ds-cfg-enabled", ["true"]),
        );
        entries.push(Entry::new(*base_dn).with("objectclass", ["top", "domain"]));
    }
    entries
}

/// Servers `ds1:4444`, `ds2:4444`... each holding `base_dns`, each with its
/// own schema.
pub fn network(servers: usize, base_dns: &[&str]) -> MemoryNetwork {
    let network = MemoryNetwork::new();
    for n in 1..=servers {
        let host = format!("ds{}", n);
        let address = format!("{}:4444", host);
        network.add_server(&address, ROOT_DN, ROOT_PASSWORD);
        network.seed(&address, server_entries(&host, &format!("schema-{}", n), base_dns));
    }
    network
}

/// Settings that keep polling and retries fast.
pub fn config() -> ToolConfig {
    ToolConfig {
        task_poll_interval_ms: 1,
        initialize_retry_step_ms: 1,
        ..ToolConfig::default()
    }
}

/// What one invocation printed and returned.
pub struct Outcome {
    pub result: Result<ReturnCode, ReplicationCliError>,
    pub out: String,
    pub err: String,
}

impl Outcome {
    pub fn code(&self) -> ReturnCode {
        match &self.result {
            Ok(code) => *code,
            Err(e) => e.code,
        }
    }
}

/// Parse `args` like the binary and run them against `network`.
pub async fn run_with(network: &MemoryNetwork, config: ToolConfig, args: &[&str]) -> Outcome {
    let out = SharedBuffer::default();
    let err = SharedBuffer::default();
    let console = Console::with_io(
        false,
        false,
        Box::new(ScriptedPrompter::default()),
        Box::new(out.clone()),
        Box::new(err.clone()),
    );
    let argv = std::iter::once("dsreplication").chain(args.iter().copied());
    let cli = Cli::try_parse_from(argv).expect("arguments parse");
    let result = match cli.into_operation(config, &console) {
        Ok((session, op)) => Executor::new(&session, network, &console).run(&op).await,
        Err(e) => Err(e),
    };
    Outcome {
        result,
        out: out.contents(),
        err: err.contents(),
    }
}

pub async fn run(network: &MemoryNetwork, args: &[&str]) -> Outcome {
    run_with(network, config(), args).await
}

/// Enable replication of `base_dns` between `ds1` and `host2`.
pub async fn enable(network: &MemoryNetwork, host2: &str, base_dns: &[&str]) -> Outcome {
    enable_between(network, "ds1", host2, base_dns).await
}

/// Enable replication of `base_dns` between `host1` and `host2`.
pub async fn enable_between(network: &MemoryNetwork, host1: &str, host2: &str, base_dns: &[&str]) -> Outcome {
    let mut args = vec![
        "enable",
        "-n",
        "--host1",
        host1,
        "--port1",
        "4444",
        "--bindPassword1",
        ROOT_PASSWORD,
        "-O",
        host2,
        "--port2",
        "4444",
        "--bindPassword2",
        ROOT_PASSWORD,
        "-w",
        ADMIN_PASSWORD,
    ];
    for base_dn in base_dns {
        args.push("-b");
        args.push(base_dn);
    }
    run(network, &args).await
}

/// Add `offset` to the replication server ID and to every domain ID of
/// the server at `address`, as if it had been set up independently.
pub async fn shift_replication_ids(network: &MemoryNetwork, address: &str, offset: u32) {
    let dir = network.directory(address);
    let shift = |entry: &Entry, attr: &str| -> Vec<String> {
        let id: u32 = entry.first(attr).expect("replication ID").parse().expect("numeric ID");
        vec![(id + offset).to_string()]
    };
    if let Some(rs) = network.entry(address, REPLICATION_SERVER_DN) {
        let ids = shift(&rs, "ds-cfg-replication-server-id");
        dir.modify(
            REPLICATION_SERVER_DN,
            &[Modification::Replace("ds-cfg-replication-server-id".to_string(), ids)],
        )
        .await
        .expect("replication server renumbered");
    }
    for domain in network.subtree(address, DOMAINS_DN) {
        if domain.first("ds-cfg-server-id").is_none() {
            continue;
        }
        let ids = shift(&domain, "ds-cfg-server-id");
        dir.modify(&domain.dn, &[Modification::Replace("ds-cfg-server-id".to_string(), ids)])
            .await
            .expect("domain renumbered");
    }
}
