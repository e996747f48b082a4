//! [`Directory`] over the network with `ldap3`.

use super::{
    ConnectionTarget, Connector, Directory, DirectoryError, Entry, Filter, Modification, Scope,
    Security, RC_ENTRY_ALREADY_EXISTS, RC_INVALID_CREDENTIALS, RC_NO_SUCH_OBJECT,
};
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, SearchEntry};
use std::collections::HashSet;
use tracing::{debug, warn};

/// LDAP result code `other`, used when the failure is not an LDAP result.
const RC_OTHER: u32 = 80;

/// Opens LDAP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapConnector;

fn result_code(err: &LdapError) -> Option<(u32, String)> {
    match err {
        LdapError::LdapResult { result } => Some((result.rc, result.text.clone())),
        _ => None,
    }
}

fn connect_error(address: &str, err: LdapError) -> DirectoryError {
    let msg = err.to_string();
    if msg.to_lowercase().contains("certificate") {
        DirectoryError::UntrustedCertificate {
            address: address.to_string(),
            msg,
        }
    } else {
        DirectoryError::Connect {
            address: address.to_string(),
            msg,
        }
    }
}

fn operation_error(operation: &'static str, dn: &str, err: LdapError) -> DirectoryError {
    match result_code(&err) {
        Some((RC_NO_SUCH_OBJECT, _)) => DirectoryError::NoSuchObject { dn: dn.to_string() },
        Some((RC_ENTRY_ALREADY_EXISTS, _)) => DirectoryError::AlreadyExists { dn: dn.to_string() },
        Some((rc, msg)) => DirectoryError::Operation {
            operation,
            dn: dn.to_string(),
            rc,
            msg,
        },
        None => DirectoryError::Operation {
            operation,
            dn: dn.to_string(),
            rc: RC_OTHER,
            msg: err.to_string(),
        },
    }
}

#[async_trait]
impl Connector for LdapConnector {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn Directory>, DirectoryError> {
        let address = target.address();
        let url = match target.security {
            Security::Ssl => format!("ldaps://{}", address),
            Security::StartTls | Security::Plain => format!("ldap://{}", address),
        };
        let settings = LdapConnSettings::new()
            .set_conn_timeout(target.connect_timeout)
            .set_starttls(target.security == Security::StartTls)
            .set_no_tls_verify(target.trust_all);

        debug!("connecting to {}", url);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| connect_error(&address, e))?;
        let driver_address = address.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("LDAP connection to {} ended: {}", driver_address, e);
            }
        });

        ldap.simple_bind(&target.bind_dn, &target.password)
            .await
            .and_then(|r| r.success())
            .map_err(|e| match result_code(&e) {
                Some((RC_INVALID_CREDENTIALS, _)) => DirectoryError::InvalidCredentials {
                    address: address.clone(),
                    bind_dn: target.bind_dn.clone(),
                },
                _ => connect_error(&address, e),
            })?;

        Ok(Box::new(LdapDirectory { address, ldap }))
    }
}

/// A bound LDAP connection.
pub struct LdapDirectory {
    address: String,
    ldap: Ldap,
}

fn to_entry(entry: SearchEntry) -> Entry {
    let mut out = Entry::new(entry.dn);
    for (name, values) in entry.attrs {
        out.attrs.insert(name.to_ascii_lowercase(), values);
    }
    for (name, values) in entry.bin_attrs {
        out.bin_attrs.insert(name.to_ascii_lowercase(), values);
    }
    out
}

fn value_set(values: &[String]) -> HashSet<String> {
    values.iter().cloned().collect()
}

#[async_trait]
impl Directory for LdapDirectory {
    fn address(&self) -> &str {
        &self.address
    }

    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        let scope = match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        };
        let attrs: Vec<&str> = if attrs.is_empty() { vec!["*"] } else { attrs.to_vec() };
        let mut ldap = self.ldap.clone();
        let (entries, _) = ldap
            .search(base, scope, &filter.to_ldap_string(), attrs)
            .await
            .and_then(|r| r.success())
            .map_err(|e| operation_error("search", base, e))?;
        Ok(entries
            .into_iter()
            .map(|e| to_entry(SearchEntry::construct(e)))
            .collect())
    }

    async fn add(&self, entry: &Entry) -> Result<(), DirectoryError> {
        let mut attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = Vec::new();
        for (name, values) in &entry.attrs {
            attrs.push((
                name.clone().into_bytes(),
                values.iter().map(|v| v.clone().into_bytes()).collect(),
            ));
        }
        for (name, values) in &entry.bin_attrs {
            attrs.push((name.clone().into_bytes(), values.iter().cloned().collect()));
        }
        let mut ldap = self.ldap.clone();
        ldap.add(&entry.dn, attrs)
            .await
            .and_then(|r| r.success())
            .map_err(|e| operation_error("add", &entry.dn, e))?;
        Ok(())
    }

    async fn modify(&self, dn: &str, mods: &[Modification]) -> Result<(), DirectoryError> {
        let mods: Vec<Mod<String>> = mods
            .iter()
            .map(|m| match m {
                Modification::Add(attr, values) => Mod::Add(attr.clone(), value_set(values)),
                Modification::Replace(attr, values) => Mod::Replace(attr.clone(), value_set(values)),
                Modification::Delete(attr, values) => Mod::Delete(attr.clone(), value_set(values)),
            })
            .collect();
        let mut ldap = self.ldap.clone();
        ldap.modify(dn, mods)
            .await
            .and_then(|r| r.success())
            .map_err(|e| operation_error("modify", dn, e))?;
        Ok(())
    }

    async fn delete(&self, dn: &str) -> Result<(), DirectoryError> {
        let mut ldap = self.ldap.clone();
        ldap.delete(dn)
            .await
            .and_then(|r| r.success())
            .map_err(|e| operation_error("delete", dn, e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DirectoryError> {
        let mut ldap = self.ldap.clone();
        ldap.unbind()
            .await
            .map_err(|e| operation_error("unbind", "", e))
    }
}
