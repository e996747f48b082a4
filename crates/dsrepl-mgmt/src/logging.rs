//! Per-invocation log file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The log file of this invocation, kept on failure and removed on success.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    /// Create `dsreplication-*.log` in `dir`, or in the system temp dir.
    pub fn create(dir: Option<&Path>) -> anyhow::Result<(File, Self)> {
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let (file, path) = tempfile::Builder::new()
            .prefix("dsreplication-")
            .suffix(".log")
            .tempfile_in(&dir)?
            .keep()?;
        Ok((file, Self { path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}

/// Send every `tracing` event of the process to a new log file.
/// `RUST_LOG` overrides the default `info` level.
pub fn init(dir: Option<&Path>) -> anyhow::Result<LogFile> {
    let (file, log) = LogFile::create(dir)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()?;
    Ok(log)
}
