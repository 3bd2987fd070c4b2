// Run statistics shared by the batch workers

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::engine::{BackendKind, FileOutcome};

#[derive(Debug)]
pub struct RunStats {
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    input_bytes: AtomicU64,
    output_bytes: AtomicU64,
    /// Successful conversions per backend
    backends: Mutex<BTreeMap<BackendKind, u64>>,
    started: Instant,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            input_bytes: AtomicU64::new(0),
            output_bytes: AtomicU64::new(0),
            backends: Mutex::new(BTreeMap::new()),
            started: Instant::now(),
        }
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one terminal outcome. Sizes are only used for converted files.
    pub fn record(&self, outcome: &FileOutcome, input_bytes: u64, output_bytes: u64) {
        match outcome {
            FileOutcome::Converted { backend, .. } => {
                self.success.fetch_add(1, Ordering::Relaxed);
                self.input_bytes.fetch_add(input_bytes, Ordering::Relaxed);
                self.output_bytes.fetch_add(output_bytes, Ordering::Relaxed);
                let mut tally = self
                    .backends
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                *tally.entry(*backend).or_insert(0) += 1;
            }
            FileOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            FileOutcome::Skipped { .. } => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn summary(&self) -> Summary {
        let backends = self
            .backends
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let success = self.success.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);

        Summary {
            success,
            failed,
            skipped,
            total: success + failed + skipped,
            majority_backend: majority_backend(&backends),
            backends,
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// Most-used backend; ties go to the earlier backend in candidate order
pub fn majority_backend(tally: &BTreeMap<BackendKind, u64>) -> Option<BackendKind> {
    let mut best: Option<(BackendKind, u64)> = None;
    for (&kind, &count) in tally {
        if count > 0 && best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((kind, count));
        }
    }
    best.map(|(kind, _)| kind)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total: u64,
    pub majority_backend: Option<BackendKind>,
    pub backends: BTreeMap<BackendKind, u64>,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub elapsed_secs: f64,
}

impl Summary {
    /// Format space saved
    pub fn format_space_saved(&self) -> String {
        let space_saved = self.input_bytes as i64 - self.output_bytes as i64;
        if space_saved >= 0 {
            format!("{} saved", format_bytes(space_saved as u64))
        } else {
            format!("{} larger", format_bytes((-space_saved) as u64))
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Summary: success={} failed={} skipped={} total={}",
            self.success, self.failed, self.skipped, self.total
        )?;
        match self.majority_backend {
            Some(kind) => writeln!(f, "Encoder used: {}", kind.display_name())?,
            None => writeln!(f, "Encoder used: none")?,
        }
        if self.success > 0 {
            writeln!(
                f,
                "Size: {} -> {} ({})",
                format_bytes(self.input_bytes),
                format_bytes(self.output_bytes),
                self.format_space_saved()
            )?;
        }
        write!(f, "Elapsed: {}", format_duration(self.elapsed_secs))
    }
}

/// Format bytes as human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds as human-readable time
pub fn format_duration(seconds: f64) -> String {
    let total_secs = seconds as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
