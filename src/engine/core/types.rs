use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::engine::hardware::BackendKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

/// One input file and where its conversion goes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileJob {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub status: JobStatus,
    pub skip_reason: Option<String>,
}

impl FileJob {
    /// Create a new pending job
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path,
            output_path,
            status: JobStatus::Pending,
            skip_reason: None,
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Skipped;
        self.skip_reason = Some(reason.into());
    }

    pub fn display_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }
}

/// Where in the per-file pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    Probe,
    Staging,
    Downmix,
    Encode,
    Finalize,
    Panic,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Probe => "probe",
            Self::Staging => "staging",
            Self::Downmix => "downmix",
            Self::Encode => "encode",
            Self::Finalize => "finalize",
            Self::Panic => "panic",
        })
    }
}

/// Terminal result for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Converted {
        backend: BackendKind,
        attempts: u32,
        output_path: PathBuf,
    },
    Failed {
        stage: FailureStage,
        error: String,
    },
    Skipped {
        reason: String,
    },
}

impl FileOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Converted { .. } => JobStatus::Done,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Skipped { .. } => JobStatus::Skipped,
        }
    }
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converted {
                backend,
                attempts,
                output_path,
            } => {
                write!(f, "converted with {} -> {}", backend, output_path.display())?;
                if *attempts > 1 {
                    write!(f, " (after {} attempts)", attempts)?;
                }
                Ok(())
            }
            Self::Failed { stage, error } => write!(f, "failed during {}: {}", stage, error),
            Self::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}
