use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const LOG_FILE_NAME: &str = "hevcbatch.log";

/// Append-only run log with full command lines and ffmpeg stderr.
/// Disabled instances swallow every message.
#[derive(Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
    // Serializes appends from parallel workers
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOG_FILE_NAME))
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write(&self, message: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "[{}] {}", timestamp, message.trim_end())?;
        Ok(())
    }

    /// Like `write` but a log problem is only reported, never propagated
    pub fn note(&self, message: &str) {
        if let Err(e) = self.write(message) {
            tracing::debug!(error = %e, "run log write failed");
        }
    }
}
