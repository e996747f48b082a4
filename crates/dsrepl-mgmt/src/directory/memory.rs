//! In-process [`Directory`] implementation.
//!
//! A [`MemoryNetwork`] holds the entries of any number of servers keyed by
//! `host:port`, with a small task engine that runs initialization tasks by
//! copying entries between servers. Tests drive it through scripted task
//! outcomes and connection counts.

use super::{
    ConnectionTarget, Connector, Directory, DirectoryError, Entry, Filter, Modification,
    Scope,
};
use crate::server_config::DOMAINS_DN;
use async_trait::async_trait;
use dsrepl_topology::dn;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

const RC_NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
const RC_UNWILLING_TO_PERFORM: u32 = 53;

/// One observation of a task entry made by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStep {
    /// The task reports a state, an optional new log line and extra
    /// attributes.
    Report {
        /// Value of `ds-task-state`.
        state: String,
        /// Appended to `ds-task-log-message`.
        log: Option<String>,
        /// Other attributes to replace.
        attrs: Vec<(String, String)>,
    },
    /// The server removed the task entry.
    Vanish,
}

impl TaskStep {
    /// A report with no log line.
    pub fn state(state: &str) -> Self {
        TaskStep::Report {
            state: state.to_string(),
            log: None,
            attrs: Vec::new(),
        }
    }

    /// A report with a log line.
    pub fn with_log(state: &str, log: &str) -> Self {
        TaskStep::Report {
            state: state.to_string(),
            log: Some(log.to_string()),
            attrs: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct ServerState {
    entries: BTreeMap<String, Entry>,
    root_dn: String,
    root_password: String,
    online: bool,
    untrusted_certificate: bool,
    task_scripts: VecDeque<Vec<TaskStep>>,
    running_tasks: HashMap<String, VecDeque<TaskStep>>,
}

impl ServerState {
    fn insert(&mut self, entry: Entry) {
        self.entries.insert(dn::normalize(&entry.dn), entry);
    }

    fn get(&self, dn_value: &str) -> Option<&Entry> {
        self.entries.get(&dn::normalize(dn_value))
    }

    fn subtree(&self, base: &str) -> Vec<Entry> {
        self.entries
            .values()
            .filter(|e| dn::is_descendant_or_self(&e.dn, base))
            .cloned()
            .collect()
    }

    fn domain(&self, base_dn: &str) -> Option<&Entry> {
        self.entries.values().find(|e| {
            dn::is_child(&e.dn, DOMAINS_DN)
                && e.first("ds-cfg-base-dn")
                    .map(|b| dn::dn_eq(b, base_dn))
                    .unwrap_or(false)
        })
    }

    /// Whether the server holds a domain of `base_dn` that reaches one of
    /// `peers`, with the given domain ID when one is asked for.
    fn has_domain(&self, base_dn: &str, domain_id: Option<u32>, peers: &[String]) -> bool {
        self.domain(base_dn).is_some_and(|e| {
            domain_id
                .map(|id| e.parse::<u32>("ds-cfg-server-id") == Some(id))
                .unwrap_or(true)
                && e.values("ds-cfg-replication-server")
                    .iter()
                    .any(|p| peers.iter().any(|q| q.eq_ignore_ascii_case(p)))
        })
    }

    fn domain_peers(&self, base_dn: &str) -> Vec<String> {
        self.domain(base_dn)
            .map(|e| e.values("ds-cfg-replication-server").to_vec())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    servers: BTreeMap<String, ServerState>,
    connections: usize,
}

impl NetworkState {
    fn server_mut(&mut self, address: &str) -> Result<&mut ServerState, DirectoryError> {
        self.servers
            .get_mut(&address.to_lowercase())
            .filter(|s| s.online)
            .ok_or_else(|| DirectoryError::Connect {
                address: address.to_string(),
                msg: "connection refused".to_string(),
            })
    }

    fn replace_subtree(&mut self, address: &str, base_dn: &str, entries: &[Entry]) -> usize {
        if let Some(server) = self.servers.get_mut(address) {
            server
                .entries
                .retain(|_, e| !dn::is_descendant_or_self(&e.dn, base_dn));
            for entry in entries {
                server.insert(entry.clone());
            }
        }
        entries.len()
    }

    /// Default outcome of a newly created task, running its side effects.
    /// Initializations only reach servers whose domain shares a
    /// replication server with the domain of `address`.
    fn run_task(&mut self, address: &str, task: &Entry) -> Vec<TaskStep> {
        let completed = |count: usize| TaskStep::Report {
            state: "COMPLETED_SUCCESSFULLY".to_string(),
            log: None,
            attrs: vec![
                ("ds-task-processed-entry-count".to_string(), count.to_string()),
                ("ds-task-unprocessed-entry-count".to_string(), "0".to_string()),
            ],
        };

        if task.has_object_class("ds-task-initialize-from-remote-replica") {
            let base_dn = task.first("ds-task-initialize-domain-dn").unwrap_or_default().to_string();
            let source_id = task.parse::<u32>("ds-task-initialize-replica-server-id");
            let peers = self.servers.get(address).map(|s| s.domain_peers(&base_dn)).unwrap_or_default();
            let source = self
                .servers
                .iter()
                .find(|(a, s)| a.as_str() != address && s.online && s.has_domain(&base_dn, source_id, &peers))
                .map(|(_, s)| s.subtree(&base_dn));
            return match source {
                Some(entries) => {
                    let count = self.replace_subtree(address, &base_dn, &entries);
                    vec![completed(count)]
                }
                None => vec![TaskStep::with_log(
                    "STOPPED_BY_ERROR",
                    &format!(
                        "No reachable peer in the domain {} with server id {}",
                        base_dn,
                        source_id.map(|i| i.to_string()).unwrap_or_default()
                    ),
                )],
            };
        }

        if task.has_object_class("ds-task-initialize-remote-replica") {
            let base_dn = task.first("ds-task-initialize-domain-dn").unwrap_or_default().to_string();
            let entries = self
                .servers
                .get(address)
                .map(|s| s.subtree(&base_dn))
                .unwrap_or_default();
            let peers = self.servers.get(address).map(|s| s.domain_peers(&base_dn)).unwrap_or_default();
            let targets: Vec<String> = self
                .servers
                .iter()
                .filter(|(a, s)| a.as_str() != address && s.online && s.has_domain(&base_dn, None, &peers))
                .map(|(a, _)| a.clone())
                .collect();
            let mut count = 0;
            for target in targets {
                count += self.replace_subtree(&target, &base_dn, &entries);
            }
            return vec![completed(count)];
        }

        vec![completed(0)]
    }
}

/// A set of in-process servers reachable through [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// An empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty, online server with a root user.
    pub fn add_server(&self, address: &str, root_dn: &str, root_password: &str) {
        let mut state = self.state.lock();
        state.servers.insert(
            address.to_lowercase(),
            ServerState {
                root_dn: root_dn.to_string(),
                root_password: root_password.to_string(),
                online: true,
                ..ServerState::default()
            },
        );
    }

    /// Store entries as-is, bypassing every check.
    pub fn seed(&self, address: &str, entries: Vec<Entry>) {
        let mut state = self.state.lock();
        if let Some(server) = state.servers.get_mut(&address.to_lowercase()) {
            for entry in entries {
                server.insert(entry);
            }
        }
    }

    /// Read an entry without a connection.
    pub fn entry(&self, address: &str, dn_value: &str) -> Option<Entry> {
        let state = self.state.lock();
        state
            .servers
            .get(&address.to_lowercase())
            .and_then(|s| s.get(dn_value).cloned())
    }

    /// Every entry at or below `base`.
    pub fn subtree(&self, address: &str, base: &str) -> Vec<Entry> {
        let state = self.state.lock();
        state
            .servers
            .get(&address.to_lowercase())
            .map(|s| s.subtree(base))
            .unwrap_or_default()
    }

    /// The steps reported by the next task created on the server.
    pub fn script_task(&self, address: &str, steps: Vec<TaskStep>) {
        let mut state = self.state.lock();
        if let Some(server) = state.servers.get_mut(&address.to_lowercase()) {
            server.task_scripts.push_back(steps);
        }
    }

    /// Make the server present a certificate the client does not trust.
    pub fn set_untrusted_certificate(&self, address: &str, untrusted: bool) {
        let mut state = self.state.lock();
        if let Some(server) = state.servers.get_mut(&address.to_lowercase()) {
            server.untrusted_certificate = untrusted;
        }
    }

    /// Take a server offline or back online.
    pub fn set_online(&self, address: &str, online: bool) {
        let mut state = self.state.lock();
        if let Some(server) = state.servers.get_mut(&address.to_lowercase()) {
            server.online = online;
        }
    }

    /// Number of successful connections so far.
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// A directory on one server of the network, without authentication.
    pub fn directory(&self, address: &str) -> MemoryDirectory {
        MemoryDirectory {
            address: address.to_lowercase(),
            network: self.clone(),
        }
    }
}

#[async_trait]
impl Connector for MemoryNetwork {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn Directory>, DirectoryError> {
        let address = target.address().to_lowercase();
        let mut state = self.state.lock();
        let server = state.server_mut(&address)?;
        if server.untrusted_certificate && !target.trust_all {
            return Err(DirectoryError::UntrustedCertificate {
                address,
                msg: "self-signed certificate".to_string(),
            });
        }
        let root = dn::dn_eq(&server.root_dn, &target.bind_dn) && server.root_password == target.password;
        let user = server
            .get(&target.bind_dn)
            .map(|e| e.values("userpassword").iter().any(|p| *p == target.password))
            .unwrap_or(false);
        if !root && !user {
            return Err(DirectoryError::InvalidCredentials {
                address,
                bind_dn: target.bind_dn.clone(),
            });
        }
        state.connections += 1;
        drop(state);
        Ok(Box::new(self.directory(&address)))
    }
}

/// A connection to one server of a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    address: String,
    network: MemoryNetwork,
}

fn apply_modification(entry: &mut Entry, modification: &Modification) {
    match modification {
        Modification::Add(attr, values) => entry.add_values(attr, values.iter().cloned()),
        Modification::Replace(attr, values) => {
            let key = attr.to_ascii_lowercase();
            if values.is_empty() {
                entry.attrs.remove(&key);
            } else {
                entry.attrs.insert(key, values.clone());
            }
        }
        Modification::Delete(attr, values) => {
            let key = attr.to_ascii_lowercase();
            if values.is_empty() {
                entry.attrs.remove(&key);
                entry.bin_attrs.remove(&key);
            } else if let Some(existing) = entry.attrs.get_mut(&key) {
                existing.retain(|v| !values.iter().any(|d| d.eq_ignore_ascii_case(v)));
                if existing.is_empty() {
                    entry.attrs.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    fn address(&self) -> &str {
        &self.address
    }

    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        _attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        let mut state = self.network.state.lock();
        let server = state.server_mut(&self.address)?;
        let key = dn::normalize(base);

        if scope == Scope::Base {
            if let Some(steps) = server.running_tasks.get_mut(&key) {
                match steps.pop_front() {
                    Some(TaskStep::Vanish) => {
                        server.running_tasks.remove(&key);
                        server.entries.remove(&key);
                    }
                    Some(TaskStep::Report { state, log, attrs }) => {
                        if let Some(entry) = server.entries.get_mut(&key) {
                            entry.attrs.insert("ds-task-state".to_string(), vec![state]);
                            if let Some(log) = log {
                                entry.attrs.entry("ds-task-log-message".to_string()).or_default().push(log);
                            }
                            for (name, value) in attrs {
                                entry.attrs.insert(name.to_ascii_lowercase(), vec![value]);
                            }
                        }
                    }
                    None => {}
                }
            }
        }

        if !server.entries.contains_key(&key) {
            return Err(DirectoryError::NoSuchObject { dn: base.to_string() });
        }
        Ok(server
            .entries
            .values()
            .filter(|e| match scope {
                Scope::Base => dn::normalize(&e.dn) == key,
                Scope::OneLevel => dn::is_child(&e.dn, base),
                Scope::Subtree => dn::is_descendant_or_self(&e.dn, base),
            })
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn add(&self, entry: &Entry) -> Result<(), DirectoryError> {
        let mut state = self.network.state.lock();
        let address = self.address.clone();
        let server = state.server_mut(&address)?;
        if server.get(&entry.dn).is_some() {
            return Err(DirectoryError::AlreadyExists { dn: entry.dn.clone() });
        }
        if let Some(parent) = dn::parent(&entry.dn) {
            if server.get(&parent).is_none() {
                return Err(DirectoryError::NoSuchObject { dn: parent });
            }
        }
        server.insert(entry.clone());

        if entry.has_object_class("ds-task") {
            let scripted = server.task_scripts.pop_front();
            let steps = match scripted {
                Some(steps) => steps,
                None => state.run_task(&address, entry),
            };
            if let Ok(server) = state.server_mut(&address) {
                server
                    .running_tasks
                    .insert(dn::normalize(&entry.dn), steps.into_iter().collect());
            }
        }
        Ok(())
    }

    async fn modify(&self, dn_value: &str, mods: &[Modification]) -> Result<(), DirectoryError> {
        let mut state = self.network.state.lock();
        let server = state.server_mut(&self.address)?;
        let entry = server
            .entries
            .get_mut(&dn::normalize(dn_value))
            .ok_or_else(|| DirectoryError::NoSuchObject { dn: dn_value.to_string() })?;
        if mods.is_empty() {
            return Err(DirectoryError::Operation {
                operation: "modify",
                dn: dn_value.to_string(),
                rc: RC_UNWILLING_TO_PERFORM,
                msg: "empty modification list".to_string(),
            });
        }
        for modification in mods {
            apply_modification(entry, modification);
        }
        Ok(())
    }

    async fn delete(&self, dn_value: &str) -> Result<(), DirectoryError> {
        let mut state = self.network.state.lock();
        let server = state.server_mut(&self.address)?;
        let key = dn::normalize(dn_value);
        if !server.entries.contains_key(&key) {
            return Err(DirectoryError::NoSuchObject { dn: dn_value.to_string() });
        }
        if server.entries.values().any(|e| dn::is_child(&e.dn, dn_value)) {
            return Err(DirectoryError::Operation {
                operation: "delete",
                dn: dn_value.to_string(),
                rc: RC_NOT_ALLOWED_ON_NON_LEAF,
                msg: "entry has children".to_string(),
            });
        }
        server.entries.remove(&key);
        server.running_tasks.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Security;
    use std::time::Duration;

    fn target(address: &str, bind_dn: &str, password: &str) -> ConnectionTarget {
        let (host, port) = address.split_once(':').unwrap();
        ConnectionTarget {
            host: host.to_string(),
            port: port.parse().unwrap(),
            security: Security::Ssl,
            bind_dn: bind_dn.to_string(),
            password: password.to_string(),
            trust_all: false,
            connect_timeout: Duration::from_secs(1),
        }
    }

    fn network() -> MemoryNetwork {
        let network = MemoryNetwork::new();
        network.add_server("ds1:4444", "cn=Directory Manager", "password");
        network.seed(
            "ds1:4444",
            vec![
                Entry::new("dc=example,dc=com").with("objectclass", ["top", "domain"]),
                Entry::new("cn=tasks").with("objectclass", ["top"]),
                Entry::new("cn=Scheduled Tasks,cn=tasks").with("objectclass", ["top"]),
            ],
        );
        network
    }

    #[tokio::test]
    async fn test_bind_checks_credentials() {
        let network = network();
        assert!(network
            .connect(&target("ds1:4444", "cn=directory manager", "password"))
            .await
            .is_ok());
        let err = network
            .connect(&target("ds1:4444", "cn=Directory Manager", "wrong"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DirectoryError::InvalidCredentials { .. }));
        let err = network
            .connect(&target("ds9:4444", "cn=Directory Manager", "password"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DirectoryError::Connect { .. }));
        assert_eq!(network.connections(), 1);
    }

    #[tokio::test]
    async fn test_untrusted_certificate_needs_trust_all() {
        let network = network();
        network.set_untrusted_certificate("ds1:4444", true);
        let mut t = target("ds1:4444", "cn=Directory Manager", "password");
        let err = network.connect(&t).await.err().unwrap();
        assert!(matches!(err, DirectoryError::UntrustedCertificate { .. }));
        t.trust_all = true;
        assert!(network.connect(&t).await.is_ok());
    }

    #[tokio::test]
    async fn test_add_modify_delete() {
        let network = network();
        let dir = network.directory("ds1:4444");
        let entry = Entry::new("ou=people,dc=example,dc=com").with("objectclass", ["organizationalUnit"]);
        dir.add(&entry).await.unwrap();
        assert!(dir.add(&entry).await.unwrap_err().is_already_exists());
        let orphan = Entry::new("cn=x,ou=missing,dc=example,dc=com");
        assert!(dir.add(&orphan).await.unwrap_err().is_no_such_object());

        dir.modify(
            "OU=People,DC=Example,DC=Com",
            &[Modification::Add("description".to_string(), vec!["staff".to_string()])],
        )
        .await
        .unwrap();
        let read = dir.read_entry("ou=people,dc=example,dc=com", &[]).await.unwrap().unwrap();
        assert_eq!(read.first("description"), Some("staff"));

        assert!(dir.delete("dc=example,dc=com").await.is_err());
        dir.delete("ou=people,dc=example,dc=com").await.unwrap();
        assert!(dir.read_entry("ou=people,dc=example,dc=com", &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let network = network();
        let dir = network.directory("ds1:4444");
        let one = dir.search("cn=tasks", Scope::OneLevel, &Filter::any(), &[]).await.unwrap();
        assert_eq!(one.len(), 1);
        let sub = dir.search("cn=tasks", Scope::Subtree, &Filter::any(), &[]).await.unwrap();
        assert_eq!(sub.len(), 2);
        assert!(dir
            .search("cn=nowhere", Scope::Base, &Filter::any(), &[])
            .await
            .unwrap_err()
            .is_no_such_object());
    }

    #[tokio::test]
    async fn test_scripted_task_steps() {
        let network = network();
        network.script_task(
            "ds1:4444",
            vec![TaskStep::state("RUNNING"), TaskStep::with_log("STOPPED_BY_ERROR", "boom"), TaskStep::Vanish],
        );
        let dir = network.directory("ds1:4444");
        let task = Entry::new("ds-task-id=t-1,cn=Scheduled Tasks,cn=tasks")
            .with("objectclass", ["top", "ds-task"]);
        dir.add(&task).await.unwrap();
        let first = dir.read_entry(&task.dn, &[]).await.unwrap().unwrap();
        assert_eq!(first.first("ds-task-state"), Some("RUNNING"));
        let second = dir.read_entry(&task.dn, &[]).await.unwrap().unwrap();
        assert_eq!(second.first("ds-task-log-message"), Some("boom"));
        assert!(dir.read_entry(&task.dn, &[]).await.unwrap().is_none());
    }
}
