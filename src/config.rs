// Configuration: built-in defaults overlaid by TOML files, table by table

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::{
    BackendOverride, ComplexityThresholds, Container, DEFAULT_RAM_DISK_DIR, VideoCodec,
};

/// Per-directory override file picked up from the target directory
pub const PROJECT_CONFIG_NAME: &str = ".hevcbatch.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub complexity: ComplexityConfig,

    #[serde(default)]
    pub staging: StagingConfig,

    #[serde(default)]
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_codec")]
    pub codec: VideoCodec,

    #[serde(default = "default_container")]
    pub container: Container,

    /// CRF / CQ / QP override; each backend has its own default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,

    /// Forced backend (gpu, cpu, nvenc, qsv, vaapi); automatic when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendOverride>,

    /// Number of files converted at once
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    #[serde(default)]
    pub recursive: bool,

    /// Re-encode even when the output already exists
    #[serde(default)]
    pub overwrite: bool,

    /// Write `<stem>.<container>` next to the input and delete the input
    #[serde(default)]
    pub replace_original: bool,

    /// Marker between stem and extension; the codec name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_suffix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Extra ffmpeg arguments, shell-quoted
    #[serde(default)]
    pub extra_args: String,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,

    /// Append command lines and ffmpeg errors to hevcbatch.log in the target directory
    #[serde(default = "default_true")]
    pub log_file: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityConfig {
    #[serde(default = "default_medium_pixels")]
    pub medium_pixels: u64,

    #[serde(default = "default_high_pixels")]
    pub high_pixels: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Stage encodes on a RAM-backed directory when it has room
    #[serde(default = "default_true")]
    pub use_ram_disk: bool,

    #[serde(default = "default_ram_disk_dir")]
    pub ram_disk_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Kill an encode after this many seconds; no limit when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encode_timeout_secs: Option<u64>,

    /// Limit for ffprobe and hardware probes
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_codec() -> VideoCodec {
    VideoCodec::Hevc
}

fn default_container() -> Container {
    Container::Mkv
}

fn default_max_workers() -> u32 {
    1
}

fn default_audio_bitrate() -> u32 {
    192
}

fn default_true() -> bool {
    true
}

fn default_medium_pixels() -> u64 {
    ComplexityThresholds::default().medium_pixels
}

fn default_high_pixels() -> u64 {
    ComplexityThresholds::default().high_pixels
}

fn default_ram_disk_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RAM_DISK_DIR)
}

fn default_probe_timeout() -> u64 {
    30
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            container: default_container(),
            quality: None,
            backend: None,
            max_workers: default_max_workers(),
            recursive: false,
            overwrite: false,
            replace_original: false,
            output_suffix: None,
            output_dir: None,
            extra_args: String::new(),
            audio_bitrate_kbps: default_audio_bitrate(),
            log_file: true,
        }
    }
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            medium_pixels: default_medium_pixels(),
            high_pixels: default_high_pixels(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            use_ram_disk: true,
            ram_disk_dir: default_ram_disk_dir(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            encode_timeout_secs: None,
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl ComplexityConfig {
    pub fn thresholds(&self) -> ComplexityThresholds {
        ComplexityThresholds {
            medium_pixels: self.medium_pixels,
            high_pixels: self.high_pixels,
        }
    }
}

impl DefaultsConfig {
    pub fn effective_suffix(&self) -> String {
        self.output_suffix
            .clone()
            .unwrap_or_else(|| self.codec.to_string())
    }
}

/// Recursively overlay `overlay` onto `base`: nested tables merge key by key,
/// any other value replaces the base value
pub fn merge_toml(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_toml(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

impl Config {
    /// Get the path to the user config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("hevcbatch")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("hevcbatch")
        };

        Ok(config_dir.join("config.toml"))
    }

    fn read_table(path: &Path) -> Result<toml::Table> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Merge the given files over the built-in defaults, later files winning.
    /// Files in `optional` are skipped when missing; `required` must exist.
    pub fn load_layers(optional: &[PathBuf], required: Option<&Path>) -> Result<Self> {
        let mut merged = match toml::Value::try_from(Config::default())
            .context("Failed to serialize default config")?
        {
            toml::Value::Table(table) => table,
            _ => anyhow::bail!("default config is not a table"),
        };

        for path in optional.iter().filter(|p| p.is_file()) {
            tracing::debug!(path = %path.display(), "loading config layer");
            merge_toml(&mut merged, Self::read_table(path)?);
        }
        if let Some(path) = required {
            merge_toml(&mut merged, Self::read_table(path)?);
        }

        let config: Config = toml::Value::Table(merged)
            .try_into()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// defaults < user config < `.hevcbatch.toml` in `target_dir` < `explicit`
    pub fn load_cascade(target_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut layers = Vec::new();
        match Self::config_path() {
            Ok(path) => layers.push(path),
            Err(e) => tracing::debug!(error = %e, "no user config directory"),
        }
        layers.push(target_dir.join(PROJECT_CONFIG_NAME));
        Self::load_layers(&layers, explicit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.defaults.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "defaults.max_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if self.defaults.audio_bitrate_kbps == 0 {
            return Err(ConfigError::InvalidValue {
                key: "defaults.audio_bitrate_kbps",
                message: "must be positive".to_string(),
            });
        }
        if self.complexity.medium_pixels > self.complexity.high_pixels {
            return Err(ConfigError::InvalidValue {
                key: "complexity.medium_pixels",
                message: format!(
                    "{} is above high_pixels ({})",
                    self.complexity.medium_pixels, self.complexity.high_pixels
                ),
            });
        }
        if let Some(suffix) = &self.defaults.output_suffix {
            if suffix.contains(['/', '\\']) {
                return Err(ConfigError::InvalidValue {
                    key: "defaults.output_suffix",
                    message: "must not contain path separators".to_string(),
                });
            }
        }
        if !self.defaults.extra_args.trim().is_empty()
            && shlex::split(&self.defaults.extra_args).is_none()
        {
            return Err(ConfigError::InvalidValue {
                key: "defaults.extra_args",
                message: "unbalanced quotes".to_string(),
            });
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
