// Input probing using ffprobe

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::process::{CommandLine, ProcessRunner};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe could not be started: {0}")]
    ToolMissing(#[source] std::io::Error),

    #[error("ffprobe rejected {path} ({status}): {stderr}")]
    Unreadable {
        path: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    Parse(String),

    #[error("no audio or video streams in {0}")]
    NoMediaStreams(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

/// One container stream as reported by the probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<u32>,
    pub channels: Option<u32>,
    /// Cover art and thumbnails show up as single-picture video streams
    pub attached_pic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadata {
    pub streams: Vec<StreamInfo>,
    pub format_name: Option<String>,
    pub duration_s: Option<f64>,
}

impl StreamMetadata {
    pub fn of_kind(&self, kind: StreamKind) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }
}

/// Structured stream metadata for a media file
pub trait MediaProbe: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<StreamMetadata, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    // ffprobe prints this one as a string
    bits_per_raw_sample: Option<String>,
    channels: Option<u32>,
    #[serde(default)]
    disposition: FfprobeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

/// `MediaProbe` backed by the ffprobe binary
pub struct FfprobeProbe<'a> {
    runner: &'a dyn ProcessRunner,
    program: String,
}

impl<'a> FfprobeProbe<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self {
            runner,
            program: "ffprobe".to_string(),
        }
    }

    pub fn command(&self, path: &Path) -> CommandLine {
        let mut cmd = CommandLine::new(&self.program);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg_path(path);
        cmd
    }
}

impl MediaProbe for FfprobeProbe<'_> {
    fn inspect(&self, path: &Path) -> Result<StreamMetadata, ProbeError> {
        let output = self
            .runner
            .run(&self.command(path))
            .map_err(ProbeError::ToolMissing)?;

        if !output.success() {
            return Err(ProbeError::Unreadable {
                path: path.display().to_string(),
                status: output.describe_status(),
                stderr: output.stderr_tail(5),
            });
        }

        let metadata = parse_ffprobe_json(&output.stdout)?;
        if metadata.of_kind(StreamKind::Video).next().is_none()
            && metadata.of_kind(StreamKind::Audio).next().is_none()
        {
            return Err(ProbeError::NoMediaStreams(path.display().to_string()));
        }

        Ok(metadata)
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
pub fn parse_ffprobe_json(json: &str) -> Result<StreamMetadata, ProbeError> {
    let raw: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let streams = raw
        .streams
        .into_iter()
        .map(|s| StreamInfo {
            index: s.index,
            kind: match s.codec_type.as_deref() {
                Some("video") => StreamKind::Video,
                Some("audio") => StreamKind::Audio,
                Some("subtitle") => StreamKind::Subtitle,
                _ => StreamKind::Other,
            },
            codec_name: s.codec_name,
            width: s.width.filter(|w| *w > 0),
            height: s.height.filter(|h| *h > 0),
            pix_fmt: s.pix_fmt,
            bits_per_raw_sample: s
                .bits_per_raw_sample
                .and_then(|b| b.trim().parse::<u32>().ok()),
            channels: s.channels,
            attached_pic: s.disposition.attached_pic == 1,
        })
        .collect();

    let (format_name, duration_s) = match raw.format {
        Some(format) => (
            format.format_name,
            format.duration.and_then(|d| d.parse::<f64>().ok()),
        ),
        None => (None, None),
    };

    Ok(StreamMetadata {
        streams,
        format_name,
        duration_s,
    })
}
