//! The administration registry stored under `cn=admin data`, and the
//! truststore holding the certificates of registered servers.

use crate::directory::{Directory, DirectoryError, Entry, Filter, Scope};
use crate::server_config::search_or_empty;
use dsrepl_topology::dn;
use dsrepl_topology::registry::AdministratorProperties;
use dsrepl_topology::{InstanceKey, Registry, ServerProperties};
use tracing::{debug, info};

pub const SERVERS_DN: &str = "cn=Servers,cn=admin data";
pub const SERVER_GROUPS_DN: &str = "cn=Server Groups,cn=admin data";
pub const ADMINISTRATORS_DN: &str = "cn=Administrators,cn=admin data";
pub const INSTANCE_KEYS_DN: &str = "cn=instance keys,cn=admin data";
pub const SECRET_KEYS_DN: &str = "cn=secret keys,cn=admin data";
pub const TRUSTSTORE_DN: &str = "cn=ads-truststore";

const CERTIFICATE_ATTR: &str = "ds-cfg-public-key-certificate;binary";

/// Bind DN of a registry administrator.
pub fn administrator_dn(uid: &str) -> String {
    format!("cn={},{}", dn::escape_rdn_value(uid), ADMINISTRATORS_DN)
}

fn server_dn(id: &str) -> String {
    format!("cn={},{}", dn::escape_rdn_value(id), SERVERS_DN)
}

fn instance_key_dn(base: &str, key_id: &str) -> String {
    format!("ds-cfg-key-id={},{}", dn::escape_rdn_value(key_id), base)
}

fn instance_key_entry(base: &str, key: &InstanceKey) -> Entry {
    Entry::new(instance_key_dn(base, &key.id))
        .with("objectclass", ["top", "ds-cfg-instance-key"])
        .with("ds-cfg-key-id", [key.id.as_str()])
        .with_binary(CERTIFICATE_ATTR, vec![key.certificate.clone()])
}

fn parse_instance_key(entry: &Entry) -> Option<InstanceKey> {
    Some(InstanceKey {
        id: entry.first("ds-cfg-key-id")?.to_string(),
        certificate: entry.binary(CERTIFICATE_ATTR)?.to_vec(),
    })
}

fn server_entry(props: &ServerProperties) -> Entry {
    let mut entry = Entry::new(server_dn(&props.id))
        .with("objectclass", ["top", "ds-cfg-branch", "extensibleobject"])
        .with("cn", [props.id.as_str()])
        .with("id", [props.id.as_str()])
        .with("hostname", [props.host.as_str()])
        .with("adminport", [props.admin_port.to_string()])
        .with("startTLSEnabled", [props.starttls_enabled.to_string()]);
    if let Some(port) = props.ldap_port {
        entry.add_values("ldapport", [port.to_string()]);
    }
    if let Some(port) = props.ldaps_port {
        entry.add_values("ldapsport", [port.to_string()]);
    }
    if let Some(key_id) = &props.instance_key_id {
        entry.add_values("ds-cfg-key-id", [key_id.as_str()]);
    }
    entry
}

fn parse_server(entry: &Entry, keys: &[InstanceKey]) -> Option<ServerProperties> {
    let host = entry.first("hostname")?.to_string();
    let admin_port = entry.parse("adminport")?;
    let instance_key_id = entry.first("ds-cfg-key-id").map(str::to_string);
    let certificate = instance_key_id
        .as_ref()
        .and_then(|id| keys.iter().find(|k| &k.id == id))
        .map(|k| k.certificate.clone());
    Some(ServerProperties {
        id: entry
            .first("id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", host, admin_port))
            .to_lowercase(),
        host,
        admin_port,
        ldap_port: entry.parse("ldapport"),
        ldaps_port: entry.parse("ldapsport"),
        starttls_enabled: entry.flag("starttlsenabled").unwrap_or(false),
        instance_key_id,
        certificate,
    })
}

async fn add_if_missing(dir: &dyn Directory, entry: &Entry) -> Result<bool, DirectoryError> {
    match dir.add(entry).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// The registry of one server.
pub struct AdsContext<'a> {
    dir: &'a dyn Directory,
}

impl<'a> AdsContext<'a> {
    pub fn new(dir: &'a dyn Directory) -> Self {
        Self { dir }
    }

    pub fn address(&self) -> &str {
        self.dir.address()
    }

    /// True when both the server and the administrator branches exist.
    pub async fn has_admin_data(&self) -> Result<bool, DirectoryError> {
        Ok(self.dir.read_entry(SERVERS_DN, &[]).await?.is_some()
            && self.dir.read_entry(ADMINISTRATORS_DN, &[]).await?.is_some())
    }

    /// Create the registry branches that do not exist yet.
    pub async fn create_admin_data(&self) -> Result<(), DirectoryError> {
        let root = Entry::new(dn::ADMIN_DATA_SUFFIX)
            .with("objectclass", ["top", "ds-cfg-branch"])
            .with("cn", ["admin data"]);
        add_if_missing(self.dir, &root).await?;
        for (branch_dn, cn) in [
            (SERVERS_DN, "Servers"),
            (SERVER_GROUPS_DN, "Server Groups"),
            (ADMINISTRATORS_DN, "Administrators"),
            (INSTANCE_KEYS_DN, "instance keys"),
            (SECRET_KEYS_DN, "secret keys"),
        ] {
            let branch = Entry::new(branch_dn)
                .with("objectclass", ["top", "ds-cfg-branch"])
                .with("cn", [cn]);
            add_if_missing(self.dir, &branch).await?;
        }
        info!("created the administration registry on {}", self.address());
        Ok(())
    }

    /// Read servers, administrators and instance keys.
    pub async fn read_registry(&self) -> Result<Registry, DirectoryError> {
        let instance_keys: Vec<InstanceKey> =
            search_or_empty(self.dir, INSTANCE_KEYS_DN, Scope::OneLevel, &Filter::Present("ds-cfg-key-id".to_string()))
                .await?
                .iter()
                .filter_map(parse_instance_key)
                .collect();
        let servers = search_or_empty(self.dir, SERVERS_DN, Scope::OneLevel, &Filter::Present("hostname".to_string()))
            .await?
            .iter()
            .filter_map(|e| parse_server(e, &instance_keys))
            .collect();
        let administrators = search_or_empty(self.dir, ADMINISTRATORS_DN, Scope::OneLevel, &Filter::any())
            .await?
            .iter()
            .filter_map(|e| {
                Some(AdministratorProperties {
                    uid: dn::first_rdn_value(&e.dn)?,
                    description: e.first("description").map(str::to_string),
                })
            })
            .collect();
        Ok(Registry {
            servers,
            administrators,
            instance_keys,
        })
    }

    /// Publish a server and its instance key. Fails with
    /// [`DirectoryError::AlreadyExists`] when the server is registered.
    pub async fn register_server(&self, props: &ServerProperties) -> Result<(), DirectoryError> {
        self.dir.add(&server_entry(props)).await?;
        if let (Some(id), Some(certificate)) = (&props.instance_key_id, &props.certificate) {
            let key = InstanceKey {
                id: id.clone(),
                certificate: certificate.clone(),
            };
            add_if_missing(self.dir, &instance_key_entry(INSTANCE_KEYS_DN, &key)).await?;
        }
        info!("registered {} in the registry of {}", props.id, self.address());
        Ok(())
    }

    /// Remove a server. Its instance key stays published.
    pub async fn unregister_server(&self, id: &str) -> Result<(), DirectoryError> {
        self.dir.delete(&server_dn(id)).await?;
        info!("unregistered {} from the registry of {}", id, self.address());
        Ok(())
    }

    /// Register a server, replacing a previous registration.
    pub async fn register_or_update_server(&self, props: &ServerProperties) -> Result<(), DirectoryError> {
        match self.register_server(props).await {
            Err(e) if e.is_already_exists() => {
                debug!("{} already registered, replacing it", props.id);
                self.unregister_server(&props.id).await?;
                self.register_server(props).await
            }
            other => other,
        }
    }

    /// Create a global administrator unless one with that uid exists.
    pub async fn create_administrator(&self, uid: &str, password: &str) -> Result<bool, DirectoryError> {
        let entry = Entry::new(administrator_dn(uid))
            .with("objectclass", ["top", "person"])
            .with("cn", [uid])
            .with("sn", [uid])
            .with("userpassword", [password])
            .with("description", ["Global Administrator"]);
        let created = add_if_missing(self.dir, &entry).await?;
        if created {
            info!("created administrator {} on {}", uid, self.address());
        }
        Ok(created)
    }

    /// Copy the servers and instance keys of another registry into this one.
    /// Administrators are not copied: their passwords cannot be read back.
    pub async fn merge_registry(&self, other: &Registry) -> Result<(), DirectoryError> {
        for key in &other.instance_keys {
            add_if_missing(self.dir, &instance_key_entry(INSTANCE_KEYS_DN, key)).await?;
        }
        for server in &other.servers {
            self.register_or_update_server(server).await?;
        }
        Ok(())
    }
}

/// Certificates the server trusts for registry replication.
pub async fn trusted_certificates(dir: &dyn Directory) -> Result<Vec<InstanceKey>, DirectoryError> {
    Ok(
        search_or_empty(dir, TRUSTSTORE_DN, Scope::OneLevel, &Filter::Present(CERTIFICATE_ATTR.to_string()))
            .await?
            .iter()
            .filter_map(parse_instance_key)
            .collect(),
    )
}

/// Add every key to the truststore of `dir`. Returns how many were new.
pub async fn seed_trust_store(dir: &dyn Directory, keys: &[InstanceKey]) -> Result<usize, DirectoryError> {
    let mut added = 0;
    for key in keys {
        if add_if_missing(dir, &instance_key_entry(TRUSTSTORE_DN, key)).await? {
            added += 1;
        }
    }
    if added > 0 {
        info!("added {} certificates to the truststore of {}", added, dir.address());
    }
    Ok(added)
}
