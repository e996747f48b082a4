//! Minimal LDIF reader for server configuration files.

use super::{Directory, DirectoryError, Entry, Filter, Modification, Scope};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dsrepl_topology::dn;
use std::collections::BTreeMap;
use thiserror::Error;

const RC_UNWILLING_TO_PERFORM: u32 = 53;

#[derive(Debug, Error, PartialEq)]
pub enum LdifError {
    #[error("line {line}: expected `name: value`")]
    Syntax { line: usize },
    #[error("line {line}: record does not start with a dn")]
    MissingDn { line: usize },
    #[error("line {line}: invalid base64 value")]
    Base64 { line: usize },
}

/// Unfold continuation lines, keeping the number of the first physical line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let raw = raw.trim_end_matches('\r');
        if let Some(rest) = raw.strip_prefix(' ') {
            if let Some((_, last)) = lines.last_mut() {
                if !last.is_empty() {
                    last.push_str(rest);
                    continue;
                }
            }
        }
        lines.push((i + 1, raw.to_string()));
    }
    lines
}

/// Parse every record of an LDIF document.
pub fn parse(text: &str) -> Result<Vec<Entry>, LdifError> {
    let mut entries = Vec::new();
    let mut current: Option<Entry> = None;

    for (line_no, line) in logical_lines(text) {
        if line.starts_with('#') {
            continue;
        }
        if line.trim().is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(LdifError::Syntax { line: line_no })?;
        let name = name.trim();
        if name.eq_ignore_ascii_case("version") && current.is_none() {
            continue;
        }
        let (text, binary) = if let Some(encoded) = value.strip_prefix(':') {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|_| LdifError::Base64 { line: line_no })?;
            match String::from_utf8(bytes) {
                Ok(s) => (Some(s), None),
                Err(e) => (None, Some(e.into_bytes())),
            }
        } else {
            (Some(value.trim_start().to_string()), None)
        };

        if name.eq_ignore_ascii_case("dn") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(Entry::new(text.unwrap_or_default()));
            continue;
        }
        let entry = current
            .as_mut()
            .ok_or(LdifError::MissingDn { line: line_no })?;
        match (text, binary) {
            (_, Some(bytes)) => {
                entry
                    .bin_attrs
                    .entry(name.to_ascii_lowercase())
                    .or_default()
                    .push(bytes);
            }
            (Some(text), None) if name.to_ascii_lowercase().ends_with(";binary") => {
                entry
                    .bin_attrs
                    .entry(name.to_ascii_lowercase())
                    .or_default()
                    .push(text.into_bytes());
            }
            (Some(text), None) => entry.add_values(name, [text]),
            (None, None) => {}
        }
    }
    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    Ok(entries)
}

/// Read-only [`Directory`] over the records of an LDIF document, such as
/// the configuration file of a stopped server.
#[derive(Debug, Clone)]
pub struct LdifDirectory {
    address: String,
    entries: BTreeMap<String, Entry>,
}

impl LdifDirectory {
    /// Parse `text` into a directory answering as `address`.
    pub fn parse(address: &str, text: &str) -> Result<Self, LdifError> {
        let entries = parse(text)?
            .into_iter()
            .map(|e| (dn::normalize(&e.dn), e))
            .collect();
        Ok(Self {
            address: address.to_string(),
            entries,
        })
    }

    fn read_only(&self, operation: &'static str, dn_value: &str) -> DirectoryError {
        DirectoryError::Operation {
            operation,
            dn: dn_value.to_string(),
            rc: RC_UNWILLING_TO_PERFORM,
            msg: format!("{} is read-only", self.address),
        }
    }
}

#[async_trait]
impl Directory for LdifDirectory {
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
        let key = dn::normalize(base);
        if !self.entries.contains_key(&key) {
            return Err(DirectoryError::NoSuchObject { dn: base.to_string() });
        }
        Ok(self
            .entries
            .iter()
            .filter(|(k, e)| match scope {
                Scope::Base => **k == key,
                Scope::OneLevel => dn::is_child(&e.dn, base),
                Scope::Subtree => dn::is_descendant_or_self(&e.dn, base),
            })
            .map(|(_, e)| e)
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn add(&self, entry: &Entry) -> Result<(), DirectoryError> {
        Err(self.read_only("add", &entry.dn))
    }

    async fn modify(&self, dn_value: &str, _mods: &[Modification]) -> Result<(), DirectoryError> {
        Err(self.read_only("modify", dn_value))
    }

    async fn delete(&self, dn_value: &str) -> Result<(), DirectoryError> {
        Err(self.read_only("delete", dn_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_records() {
        let text = concat!(
            "version: 1\n",
            "# comment\n",
            "dn: cn=config\n",
            "objectClass: top\n",
            "cn: config\n",
            "\n",
            "dn: cn=Replication Server,cn=Multimaster Synchronization,cn=Synchronization Pr\n",
            " oviders,cn=config\n",
            "ds-cfg-replication-port: 8989\n",
            "ds-cfg-replication-server: a:8989\n",
            "ds-cfg-replication-server: b:8989\n",
        );
        let entries = parse(text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].first("cn"), Some("config"));
        assert_eq!(
            entries[1].dn,
            "cn=Replication Server,cn=Multimaster Synchronization,cn=Synchronization Providers,cn=config"
        );
        assert_eq!(entries[1].values("ds-cfg-replication-server").len(), 2);
        assert_eq!(entries[1].parse::<u16>("ds-cfg-replication-port"), Some(8989));
    }

    #[test]
    fn test_base64_values() {
        let text = "dn: cn=x\ndescription:: aGVsbG8=\nds-cfg-public-key-certificate;binary:: AP8=\n";
        let entries = parse(text).unwrap();
        assert_eq!(entries[0].first("description"), Some("hello"));
        assert_eq!(
            entries[0].binary("ds-cfg-public-key-certificate;binary"),
            Some(&[0u8, 255u8][..])
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("cn: x\n"), Err(LdifError::MissingDn { line: 1 }));
        assert_eq!(parse("dn: cn=x\nnot a pair\n"), Err(LdifError::Syntax { line: 2 }));
        assert_eq!(parse("dn: cn=x\ncn:: ###\n"), Err(LdifError::Base64 { line: 2 }));
    }

    #[test]
    fn test_directory_over_records() {
        let text = concat!(
            "dn: cn=config\nobjectClass: top\n\n",
            "dn: cn=Backends,cn=config\nobjectClass: top\n\n",
            "dn: ds-cfg-backend-id=userRoot,cn=Backends,cn=config\n",
            "objectClass: ds-cfg-backend\n",
            "ds-cfg-base-dn: dc=example,dc=com\n",
        );
        let dir = LdifDirectory::parse("localhost:0", text).unwrap();
        tokio_test::block_on(async {
            let backends = dir
                .search("CN=Backends,cn=config", Scope::OneLevel, &Filter::any(), &[])
                .await
                .unwrap();
            assert_eq!(backends.len(), 1);
            assert_eq!(backends[0].first("ds-cfg-base-dn"), Some("dc=example,dc=com"));
            let all = dir.search("cn=config", Scope::Subtree, &Filter::any(), &[]).await.unwrap();
            assert_eq!(all.len(), 3);
            assert!(dir.read_entry("cn=missing", &[]).await.unwrap().is_none());
            assert!(dir.delete("cn=config").await.is_err());
        });
    }
}
