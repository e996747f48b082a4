use crate::directory::Security;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tool settings that are not worth a command-line flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub connect_timeout_ms: u64,
    pub task_poll_interval_ms: u64,
    pub initialize_attempts: u32,
    pub initialize_retry_step_ms: u64,
    pub task_deadline_grace_secs: u64,
    pub default_admin_uid: String,
    pub default_bind_dn: String,
    pub default_admin_port: u16,
    pub default_replication_port: u16,
    pub trust_all: bool,
    /// Security of connections given neither `--useSSL` nor `--useStartTLS`.
    pub default_security: Security,
    pub log_dir: Option<PathBuf>,
    pub local_config_ldif: PathBuf,
    pub offline_purge_command: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            task_poll_interval_ms: 500,
            initialize_attempts: 5,
            initialize_retry_step_ms: 3_000,
            task_deadline_grace_secs: 60,
            default_admin_uid: String::from("admin"),
            default_bind_dn: String::from("cn=Directory Manager"),
            default_admin_port: 4444,
            default_replication_port: 8989,
            trust_all: false,
            default_security: Security::Ssl,
            log_dir: None,
            local_config_ldif: PathBuf::from("config/config.ldif"),
            offline_purge_command: None,
        }
    }
}

impl ToolConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ToolConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ToolConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }

    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.initialize_retry_step_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = ToolConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.initialize_attempts, 5);
        assert_eq!(config.retry_step(), Duration::from_secs(3));
        assert_eq!(config.default_admin_uid, "admin");
        assert_eq!(config.default_bind_dn, "cn=Directory Manager");
        assert_eq!(config.default_replication_port, 8989);
        assert!(!config.trust_all);
        assert_eq!(config.default_security, Security::Ssl);
        assert!(config.offline_purge_command.is_none());
    }

    #[test]
    fn test_from_file_toml_partial() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
connect_timeout_ms = 5000
trust_all = true
default_security = "plain"
offline_purge_command = "/opt/ds/bin/purge-historical"
"#
        )
        .unwrap();

        let config = ToolConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert!(config.trust_all);
        assert_eq!(config.default_security, Security::Plain);
        assert_eq!(
            config.offline_purge_command,
            Some(PathBuf::from("/opt/ds/bin/purge-historical"))
        );
        assert_eq!(config.task_poll_interval_ms, 500);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"task_poll_interval_ms": 10, "default_admin_uid": "repl"}}"#).unwrap();

        let config = ToolConfig::from_file(file.path()).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.default_admin_uid, "repl");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(ToolConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_load_without_path() {
        assert_eq!(ToolConfig::load(None).unwrap(), ToolConfig::default());
    }
}
