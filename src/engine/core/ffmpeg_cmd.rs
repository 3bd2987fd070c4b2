use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::analysis::{Complexity, MediaFileAnalysis};
use crate::engine::hardware::{BackendCapability, BackendKind};
use crate::engine::process::CommandLine;
use crate::engine::router::EncodePlan;

/// Render node used when VAAPI detection did not record one
const DEFAULT_RENDER_NODE: &str = "/dev/dri/renderD128";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Hevc,
    H264,
    Av1,
}

impl VideoCodec {
    pub fn is_next_gen(&self) -> bool {
        matches!(self, Self::Av1)
    }

    /// H.264 is always encoded 8-bit; hardware H.264 encoders have no 10-bit path
    pub fn allows_ten_bit(&self) -> bool {
        !matches!(self, Self::H264)
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hevc" | "h265" | "x265" => Ok(Self::Hevc),
            "h264" | "avc" | "x264" => Ok(Self::H264),
            "av1" => Ok(Self::Av1),
            other => Err(format!("unknown codec '{}' (expected hevc, h264 or av1)", other)),
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hevc => "hevc",
            Self::H264 => "h264",
            Self::Av1 => "av1",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mkv,
    Mp4,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Mp4 => "mp4",
        }
    }
}

impl FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_start_matches('.') {
            "mkv" | "matroska" => Ok(Self::Mkv),
            "mp4" => Ok(Self::Mp4),
            other => Err(format!("unknown container '{}' (expected mkv or mp4)", other)),
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// High-level knobs that shape every encode of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub codec: VideoCodec,
    pub container: Container,
    /// Overrides the per-backend default quality value (CRF / CQ / QP)
    pub quality: Option<u32>,
    pub audio_bitrate_kbps: u32,
    /// Appended verbatim (shell-split) before the output path
    pub extra_args: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::Hevc,
            container: Container::Mkv,
            quality: None,
            audio_bitrate_kbps: 192,
            extra_args: String::new(),
        }
    }
}

/// ffmpeg encoder name for a backend / codec pair
pub fn encoder_name(backend: BackendKind, codec: VideoCodec) -> &'static str {
    match (backend, codec) {
        (BackendKind::Software, VideoCodec::Hevc) => "libx265",
        (BackendKind::Software, VideoCodec::H264) => "libx264",
        (BackendKind::Software, VideoCodec::Av1) => "libsvtav1",
        (BackendKind::Nvenc, VideoCodec::Hevc) => "hevc_nvenc",
        (BackendKind::Nvenc, VideoCodec::H264) => "h264_nvenc",
        (BackendKind::Nvenc, VideoCodec::Av1) => "av1_nvenc",
        (BackendKind::Qsv, VideoCodec::Hevc) => "hevc_qsv",
        (BackendKind::Qsv, VideoCodec::H264) => "h264_qsv",
        (BackendKind::Qsv, VideoCodec::Av1) => "av1_qsv",
        (BackendKind::Vaapi, VideoCodec::Hevc) => "hevc_vaapi",
        (BackendKind::Vaapi, VideoCodec::H264) => "h264_vaapi",
        (BackendKind::Vaapi, VideoCodec::Av1) => "av1_vaapi",
    }
}

/// Whether `backend` can produce `codec` at all
pub fn backend_supports_codec(capability: &BackendCapability, codec: VideoCodec) -> bool {
    capability.available && (!codec.is_next_gen() || capability.supports_next_gen_codec)
}

fn default_quality(backend: BackendKind, codec: VideoCodec) -> u32 {
    match (backend, codec) {
        (BackendKind::Software, VideoCodec::Hevc) => 24,
        (BackendKind::Software, VideoCodec::H264) => 21,
        (BackendKind::Software, VideoCodec::Av1) => 30,
        (BackendKind::Nvenc, _) => 26,
        (BackendKind::Qsv, _) => 25,
        (BackendKind::Vaapi, _) => 25,
    }
}

// Bigger frames get faster presets so 4K runs stay within reach
fn x26x_preset(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "slow",
        Complexity::Medium => "medium",
        Complexity::High => "fast",
    }
}

fn svtav1_preset(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "6",
        Complexity::Medium => "8",
        Complexity::High => "10",
    }
}

fn nvenc_preset(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "p6",
        Complexity::Medium => "p5",
        Complexity::High => "p4",
    }
}

fn qsv_preset(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "slow",
        Complexity::Medium => "medium",
        Complexity::High => "faster",
    }
}

/// Whether the output keeps 10-bit depth on this backend
pub fn output_is_ten_bit(
    analysis: &MediaFileAnalysis,
    capability: &BackendCapability,
    codec: VideoCodec,
) -> bool {
    analysis.is_ten_bit() && codec.allows_ten_bit() && capability.supports_ten_bit
}

/// Staged stereo track for one 5.1 stream
pub fn downmix_output_path(staging_dir: &Path, stem: &str, tag: &str, stream_index: u32) -> PathBuf {
    staging_dir.join(format!(".{}.{}.a{}.partial.m4a", stem, tag, stream_index))
}

/// Extract one 5.1 stream and fold it to stereo AAC
pub fn build_downmix_cmd(
    input: &Path,
    stream_index: u32,
    output: &Path,
    bitrate_kbps: u32,
) -> CommandLine {
    let mut cmd = CommandLine::new("ffmpeg");
    cmd.args(["-hide_banner", "-nostdin", "-y", "-i"])
        .arg_path(input)
        .args(["-map".to_string(), format!("0:{}", stream_index)])
        .args(["-vn", "-sn", "-dn", "-c:a", "aac", "-ac", "2"])
        .args(["-b:a".to_string(), format!("{}k", bitrate_kbps.max(32))])
        .args(["-f", "mp4"])
        .arg_path(output);
    cmd
}

/// Full encode invocation: input (plus any downmixed tracks), stream maps,
/// backend-specific video settings, then the output path.
#[allow(clippy::too_many_arguments)]
pub fn build_encode_cmd(
    input: &Path,
    output: &Path,
    analysis: &MediaFileAnalysis,
    plan: &EncodePlan,
    downmixed: &[PathBuf],
    backend: BackendKind,
    capability: &BackendCapability,
    settings: &EncodeSettings,
) -> CommandLine {
    let ten_bit = match backend {
        BackendKind::Software => analysis.is_ten_bit() && settings.codec.allows_ten_bit(),
        _ => output_is_ten_bit(analysis, capability, settings.codec),
    };
    let quality = settings
        .quality
        .unwrap_or_else(|| default_quality(backend, settings.codec))
        .to_string();

    let mut cmd = CommandLine::new("ffmpeg");
    cmd.args(["-hide_banner", "-nostdin", "-y"]);

    // Device setup has to precede the input
    match backend {
        BackendKind::Nvenc => {
            cmd.args(["-hwaccel", "cuda"]);
        }
        BackendKind::Qsv => {
            cmd.args(["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"]);
        }
        BackendKind::Vaapi => {
            let device = capability
                .device_handle
                .as_deref()
                .unwrap_or(DEFAULT_RENDER_NODE);
            cmd.args(["-vaapi_device", device]);
        }
        BackendKind::Software => {}
    }

    cmd.arg("-i").arg_path(input);
    for track in downmixed {
        cmd.arg("-i").arg_path(track);
    }

    let subtitles = subtitles_for(settings.container, analysis, plan);
    for index in plan.video.iter().chain(&subtitles).chain(&plan.copy_audio) {
        cmd.arg("-map").arg(format!("0:{}", index));
    }
    for input_no in 1..=downmixed.len() {
        cmd.arg("-map").arg(format!("{}:a:0", input_no));
    }

    match backend {
        BackendKind::Software => {
            cmd.args(["-c:v", encoder_name(backend, settings.codec)]);
            cmd.args(["-crf", quality.as_str()]);
            let preset = match settings.codec {
                VideoCodec::Av1 => svtav1_preset(analysis.complexity),
                _ => x26x_preset(analysis.complexity),
            };
            cmd.args(["-preset", preset]);
            cmd.args(["-pix_fmt", if ten_bit { "yuv420p10le" } else { "yuv420p" }]);
        }
        BackendKind::Nvenc => {
            cmd.args(["-c:v", encoder_name(backend, settings.codec)]);
            cmd.args(["-rc", "vbr", "-cq", quality.as_str(), "-b:v", "0"]);
            cmd.args(["-preset", nvenc_preset(analysis.complexity)]);
            if ten_bit {
                cmd.args(["-pix_fmt", "p010le"]);
                if settings.codec == VideoCodec::Hevc {
                    cmd.args(["-profile:v", "main10"]);
                }
            }
        }
        BackendKind::Qsv => {
            let fmt = if ten_bit { "p010le" } else { "nv12" };
            cmd.arg("-vf")
                .arg(format!("format={},hwupload=extra_hw_frames=64", fmt));
            cmd.args(["-c:v", encoder_name(backend, settings.codec)]);
            cmd.args(["-global_quality", quality.as_str()]);
            cmd.args(["-preset", qsv_preset(analysis.complexity)]);
            if ten_bit && settings.codec == VideoCodec::Hevc {
                cmd.args(["-profile:v", "main10"]);
            }
        }
        BackendKind::Vaapi => {
            let fmt = if ten_bit { "p010" } else { "nv12" };
            cmd.arg("-vf").arg(format!("format={},hwupload", fmt));
            cmd.args(["-c:v", encoder_name(backend, settings.codec)]);
            cmd.args(["-rc_mode", "CQP", "-qp", quality.as_str()]);
            if ten_bit && settings.codec == VideoCodec::Hevc {
                cmd.args(["-profile:v", "main10"]);
            }
        }
    }

    if plan.has_audio() {
        cmd.args(["-c:a", "copy"]);
    }
    if !subtitles.is_empty() {
        let subtitle_codec = match settings.container {
            Container::Mkv => "copy",
            // MP4 only carries timed text
            Container::Mp4 => "mov_text",
        };
        cmd.args(["-c:s", subtitle_codec]);
    }

    if settings.container == Container::Mp4 {
        if settings.codec == VideoCodec::Hevc {
            cmd.args(["-tag:v", "hvc1"]);
        }
        cmd.args(["-movflags", "+faststart"]);
    }

    apply_extra_args(&mut cmd, &settings.extra_args);

    cmd.args(["-f", muxer_name(settings.container)]);
    cmd.arg_path(output);
    cmd
}

/// Subtitle streams the container can hold. MP4 carries timed text only, so
/// bitmap subtitles are left out there.
pub fn subtitles_for(
    container: Container,
    analysis: &MediaFileAnalysis,
    plan: &EncodePlan,
) -> Vec<u32> {
    match container {
        Container::Mkv => plan.subtitles.clone(),
        Container::Mp4 => plan
            .subtitles
            .iter()
            .copied()
            .filter(|i| !analysis.bitmap_subtitle_streams.contains(i))
            .collect(),
    }
}

fn muxer_name(container: Container) -> &'static str {
    match container {
        Container::Mkv => "matroska",
        Container::Mp4 => "mp4",
    }
}

/// Shell-style split so quoted values survive; unbalanced quotes fall back to
/// whitespace splitting
fn apply_extra_args(cmd: &mut CommandLine, extra_args: &str) {
    if extra_args.trim().is_empty() {
        return;
    }

    match shlex::split(extra_args) {
        Some(args) => {
            cmd.args(args);
        }
        None => {
            tracing::warn!(extra_args, "unbalanced quotes in extra_args, splitting on whitespace");
            cmd.args(extra_args.split_whitespace());
        }
    }
}
