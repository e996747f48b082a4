//! Access to directory servers.
//!
//! Everything the tool does remotely goes through the [`Directory`] trait:
//! a handful of LDAP operations on a single entry model. [`ldap`] talks to
//! real servers, [`ldif::LdifDirectory`] reads the configuration file of a
//! stopped server, and `memory` (tests and the `testing` feature) keeps
//! servers in-process.

pub mod ldap;
pub mod ldif;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// LDAP result code: no such object.
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: invalid credentials.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code: entry already exists.
pub const RC_ENTRY_ALREADY_EXISTS: u32 = 68;

/// Errors from directory operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DirectoryError {
    /// The server could not be reached.
    #[error("cannot connect to {address}: {msg}")]
    Connect {
        /// `host:port` of the server.
        address: String,
        /// Error message.
        msg: String,
    },

    /// The bind was rejected.
    #[error("invalid credentials for {bind_dn} on {address}")]
    InvalidCredentials {
        /// `host:port` of the server.
        address: String,
        /// DN used to bind.
        bind_dn: String,
    },

    /// The server certificate is not trusted.
    #[error("the certificate presented by {address} is not trusted: {msg}")]
    UntrustedCertificate {
        /// `host:port` of the server.
        address: String,
        /// TLS error message.
        msg: String,
    },

    /// The entry does not exist.
    #[error("no such entry: {dn}")]
    NoSuchObject {
        /// The missing entry.
        dn: String,
    },

    /// The entry already exists.
    #[error("entry already exists: {dn}")]
    AlreadyExists {
        /// The existing entry.
        dn: String,
    },

    /// Any other failed operation.
    #[error("{operation} on {dn} failed with result code {rc}: {msg}")]
    Operation {
        /// Operation name.
        operation: &'static str,
        /// Target entry.
        dn: String,
        /// LDAP result code.
        rc: u32,
        /// Diagnostic message.
        msg: String,
    },
}

impl DirectoryError {
    /// True for a missing entry.
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, DirectoryError::NoSuchObject { .. })
    }

    /// True for an existing entry.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DirectoryError::AlreadyExists { .. })
    }
}

/// An entry with lower-cased attribute names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Distinguished name.
    pub dn: String,
    /// Text attributes.
    pub attrs: BTreeMap<String, Vec<String>>,
    /// Binary attributes.
    pub bin_attrs: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// An entry with no attribute.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// Builder: add text values.
    pub fn with<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_values(name, values);
        self
    }

    /// Builder: add binary values.
    pub fn with_binary(mut self, name: &str, values: Vec<Vec<u8>>) -> Self {
        self.bin_attrs
            .entry(name.to_ascii_lowercase())
            .or_default()
            .extend(values);
        self
    }

    /// Append text values, skipping duplicates.
    pub fn add_values<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slot = self.attrs.entry(name.to_ascii_lowercase()).or_default();
        for value in values {
            let value = value.into();
            if !slot.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
                slot.push(value);
            }
        }
    }

    /// Every text value of an attribute.
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// First text value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(|v| v.as_str())
    }

    /// First value of an attribute, parsed.
    pub fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.first(name).and_then(|v| v.trim().parse().ok())
    }

    /// First value of a boolean attribute.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.first(name).map(|v| v.eq_ignore_ascii_case("true"))
    }

    /// First binary value of an attribute.
    pub fn binary(&self, name: &str) -> Option<&[u8]> {
        self.bin_attrs
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(|v| v.as_slice())
    }

    /// Case-insensitive object class check.
    pub fn has_object_class(&self, object_class: &str) -> bool {
        self.values("objectclass")
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(object_class))
    }
}

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The base entry only.
    Base,
    /// Direct children of the base entry.
    OneLevel,
    /// The base entry and everything below.
    Subtree,
}

/// The subset of LDAP filters the tool needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(attr=*)`.
    Present(String),
    /// `(attr=value)`, case-insensitive.
    Equals(String, String),
    /// `(&...)`.
    And(Vec<Filter>),
}

fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

impl Filter {
    /// `(objectClass=*)`, matching every entry.
    pub fn any() -> Self {
        Filter::Present("objectclass".to_string())
    }

    /// `(objectClass=<oc>)`.
    pub fn object_class(oc: &str) -> Self {
        Filter::Equals("objectclass".to_string(), oc.to_string())
    }

    /// RFC 4515 string form.
    pub fn to_ldap_string(&self) -> String {
        match self {
            Filter::Present(attr) => format!("({}=*)", attr),
            Filter::Equals(attr, value) => format!("({}={})", attr, escape_filter_value(value)),
            Filter::And(filters) => format!(
                "(&{})",
                filters.iter().map(|f| f.to_ldap_string()).collect::<String>()
            ),
        }
    }

    /// Evaluate the filter against an entry.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::Present(attr) if attr.eq_ignore_ascii_case("objectclass") => true,
            Filter::Present(attr) => {
                !entry.values(attr).is_empty() || entry.binary(attr).is_some()
            }
            Filter::Equals(attr, value) => entry
                .values(attr)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
        }
    }
}

/// A change to one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Add values.
    Add(String, Vec<String>),
    /// Replace every value; an empty list removes the attribute.
    Replace(String, Vec<String>),
    /// Remove values; an empty list removes the attribute.
    Delete(String, Vec<String>),
}

/// LDAP operations on one connected server.
#[async_trait]
pub trait Directory: Send + Sync {
    /// `host:port` of the server.
    fn address(&self) -> &str;

    /// Search entries.
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError>;

    /// Add an entry.
    async fn add(&self, entry: &Entry) -> Result<(), DirectoryError>;

    /// Modify an entry.
    async fn modify(&self, dn: &str, mods: &[Modification]) -> Result<(), DirectoryError>;

    /// Delete an entry.
    async fn delete(&self, dn: &str) -> Result<(), DirectoryError>;

    /// Read one entry, `None` when it does not exist.
    async fn read_entry(&self, dn: &str, attrs: &[&str]) -> Result<Option<Entry>, DirectoryError> {
        match self.search(dn, Scope::Base, &Filter::any(), attrs).await {
            Ok(mut entries) => Ok(entries.pop()),
            Err(e) if e.is_no_such_object() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Release the connection.
    async fn close(&self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

/// Transport security of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// LDAPS: TLS from the first byte.
    #[default]
    Ssl,
    /// Plain LDAP upgraded with StartTLS.
    StartTls,
    /// Plain LDAP.
    Plain,
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Transport security.
    pub security: Security,
    /// Bind DN.
    pub bind_dn: String,
    /// Bind password.
    pub password: String,
    /// Accept any server certificate.
    pub trust_all: bool,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

impl ConnectionTarget {
    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Same credentials and settings, another server.
    pub fn for_server(&self, host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..self.clone()
        }
    }
}

/// Opens [`Directory`] connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and bind.
    async fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn Directory>, DirectoryError>;
}
