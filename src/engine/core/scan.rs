use super::types::FileJob;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions picked up by a scan
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "flv", "m4v", "wmv", "ts", "m2ts", "mpg", "mpeg",
];

/// Marker carried by staging files while an encode is in flight
pub const PARTIAL_MARKER: &str = ".partial.";

/// Check if a path has a video file extension
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Files this tool wrote itself: finished outputs (`name.<suffix>.ext`) and
/// leftover staging files
pub fn is_own_output(path: &Path, output_suffix: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.contains(PARTIAL_MARKER) {
        return true;
    }
    if output_suffix.is_empty() {
        return false;
    }

    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| {
            stem.to_lowercase()
                .ends_with(&format!(".{}", output_suffix.to_lowercase()))
        })
}

/// List convertible video files under `root`, sorted by path.
/// Symlinks are never followed.
pub fn scan(root: &Path, recursive: bool, output_suffix: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e).with_context(|| format!("Failed to read {}", root.display()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().is_file()
            && is_video_file(path)
            && !is_own_output(path, output_suffix)
        {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// How output file names are derived from inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub suffix: String,
    pub extension: String,
    pub output_dir: Option<PathBuf>,
    pub replace_original: bool,
}

/// `<stem>.<suffix>.<ext>` next to the input (or in `output_dir`);
/// `<stem>.<ext>` next to the input in replace mode
pub fn derive_output_path(input_path: &Path, naming: &OutputNaming) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let input_dir = input_path.parent().unwrap_or_else(|| Path::new("."));

    if naming.replace_original {
        return input_dir.join(format!("{}.{}", stem, naming.extension));
    }

    let dir = naming.output_dir.as_deref().unwrap_or(input_dir);
    let filename = if naming.suffix.is_empty() {
        format!("{}.{}", stem, naming.extension)
    } else {
        format!("{}.{}.{}", stem, naming.suffix, naming.extension)
    };
    dir.join(filename)
}

/// Jobs are marked Skipped if the output already exists, unless overwriting
/// or replacing originals
pub fn build_job_from_path(input_path: PathBuf, naming: &OutputNaming, overwrite: bool) -> FileJob {
    let output_path = derive_output_path(&input_path, naming);
    let mut job = FileJob::new(input_path, output_path);

    if !overwrite && !naming.replace_original && job.output_path.exists() {
        job.skip("output already exists");
    }

    job
}

/// Build the jobs for a scan. Two inputs that would write the same output
/// (`a.mkv` and `a.mp4`) keep the first in path order; the later one is
/// skipped, as is any job whose output would land on another input.
pub fn build_job_queue(files: Vec<PathBuf>, naming: &OutputNaming, overwrite: bool) -> Vec<FileJob> {
    let inputs: HashSet<PathBuf> = files.iter().cloned().collect();
    let mut claimed: HashMap<PathBuf, String> = HashMap::new();

    files
        .into_iter()
        .map(|input_path| {
            let mut job = build_job_from_path(input_path, naming, overwrite);
            if job.skip_reason.is_some() {
                return job;
            }

            if job.output_path != job.input_path && inputs.contains(&job.output_path) {
                job.skip(format!(
                    "output {} would overwrite another input",
                    file_name(&job.output_path)
                ));
            } else if let Some(owner) = claimed.get(&job.output_path) {
                job.skip(format!(
                    "output {} is already written by {}",
                    file_name(&job.output_path),
                    owner
                ));
            } else {
                claimed.insert(job.output_path.clone(), job.display_name());
            }

            if let Some(reason) = &job.skip_reason {
                tracing::warn!(file = %job.display_name(), reason = %reason, "output collision");
            }
            job
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
