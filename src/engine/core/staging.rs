//! Temporary storage for in-flight encodes.
//!
//! Output is written to a hidden `.partial.` file, preferably on a RAM-backed
//! directory, and moved to its final name only after a successful encode.
//! Space on the fast directory is reserved per file so parallel workers never
//! overcommit it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

pub const DEFAULT_RAM_DISK_DIR: &str = "/dev/shm";

type CapacityProbe = Box<dyn Fn(&Path) -> io::Result<u64> + Send + Sync>;

pub struct StagingArea {
    fast_dir: Option<PathBuf>,
    reserved: Mutex<u64>,
    capacity: CapacityProbe,
}

impl std::fmt::Debug for StagingArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingArea")
            .field("fast_dir", &self.fast_dir)
            .field("reserved", &self.reserved_bytes())
            .finish()
    }
}

/// A per-file staging directory. Dropping it returns the reservation.
#[derive(Debug)]
pub struct StagingSlot<'a> {
    area: &'a StagingArea,
    dir: PathBuf,
    reserved: u64,
}

impl StagingSlot<'_> {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether this slot lives on the fast directory
    pub fn is_fast(&self) -> bool {
        self.reserved > 0
    }
}

impl Drop for StagingSlot<'_> {
    fn drop(&mut self) {
        if self.reserved > 0 {
            let mut reserved = self.area.lock_reserved();
            *reserved = reserved.saturating_sub(self.reserved);
        }
    }
}

impl StagingArea {
    /// `fast_dir = None` stages everything next to the final output
    pub fn new(fast_dir: Option<PathBuf>) -> Self {
        Self {
            fast_dir,
            reserved: Mutex::new(0),
            capacity: Box::new(available_space),
        }
    }

    pub fn with_capacity_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn(&Path) -> io::Result<u64> + Send + Sync + 'static,
    {
        self.capacity = Box::new(probe);
        self
    }

    pub fn fast_dir(&self) -> Option<&Path> {
        self.fast_dir.as_deref()
    }

    pub fn reserved_bytes(&self) -> u64 {
        *self.lock_reserved()
    }

    fn lock_reserved(&self) -> std::sync::MutexGuard<'_, u64> {
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick where to stage a file of `input_size` bytes. The fast directory is
    /// used only while `available - reserved > input_size`; otherwise the
    /// slot points at `fallback_dir` (the output directory).
    pub fn reserve(&self, input_size: u64, fallback_dir: &Path) -> StagingSlot<'_> {
        let fallback = || StagingSlot {
            area: self,
            dir: fallback_dir.to_path_buf(),
            reserved: 0,
        };

        let Some(fast_dir) = self.fast_dir.as_deref() else {
            return fallback();
        };
        if !fast_dir.is_dir() {
            tracing::debug!(dir = %fast_dir.display(), "RAM staging directory missing");
            return fallback();
        }

        // Check and reserve under one lock
        let mut reserved = self.lock_reserved();
        let available = match (self.capacity)(fast_dir) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(dir = %fast_dir.display(), error = %e, "capacity check failed");
                drop(reserved);
                return fallback();
            }
        };

        // Zero-byte inputs still take a token reservation so the slot reads as fast
        let needed = input_size.max(1);
        if available.saturating_sub(*reserved) > needed {
            *reserved += needed;
            StagingSlot {
                area: self,
                dir: fast_dir.to_path_buf(),
                reserved: needed,
            }
        } else {
            tracing::info!(
                dir = %fast_dir.display(),
                available,
                reserved = *reserved,
                needed,
                "not enough room on RAM staging directory, staging on disk"
            );
            drop(reserved);
            fallback()
        }
    }
}

/// Hidden staging name for an encode output; the job id keeps parallel
/// workers apart
pub fn staged_output_path(dir: &Path, stem: &str, job_id: &Uuid, extension: &str) -> PathBuf {
    dir.join(format!(".{}.{}.partial.{}", stem, job_id.simple(), extension))
}

/// Free bytes for unprivileged users on the filesystem holding `path`
#[cfg(unix)]
pub fn available_space(path: &Path) -> io::Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;

    #[allow(clippy::unnecessary_cast)]
    Ok((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free space query not supported on this platform",
    ))
}

/// Move a finished file into place. A plain rename when both paths share a
/// filesystem; otherwise copy to a hidden sibling of `final_path` and rename
/// that, so readers never see a half-written file. The staged file is gone
/// afterwards on success and on failure.
pub fn finalize(staged: &Path, final_path: &Path) -> io::Result<()> {
    match fs::rename(staged, final_path) {
        Ok(()) => return Ok(()),
        Err(e) if !is_cross_device(&e) => {
            remove_if_exists(staged);
            return Err(e);
        }
        Err(_) => {}
    }

    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
    let temp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = fs::copy(staged, &temp).and_then(|_| fs::rename(&temp, final_path));
    if result.is_err() {
        remove_if_exists(&temp);
    }
    remove_if_exists(staged);
    result
}

fn is_cross_device(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// Best-effort removal; a missing file is fine
pub fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary file");
        }
    }
}
