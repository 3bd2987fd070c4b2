//! Per-file analysis derived from probe metadata: bit depth, complexity class
//! and the stream inventory the router works from.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::probe::{StreamKind, StreamMetadata};

pub const DEFAULT_MEDIUM_PIXELS: u64 = 2_000_000;
pub const DEFAULT_HIGH_PIXELS: u64 = 8_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Pixel-count cut-offs for the complexity classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityThresholds {
    pub medium_pixels: u64,
    pub high_pixels: u64,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            medium_pixels: DEFAULT_MEDIUM_PIXELS,
            high_pixels: DEFAULT_HIGH_PIXELS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStream {
    pub index: u32,
    pub channels: u32,
}

impl AudioStream {
    pub fn is_surround_51(&self) -> bool {
        self.channels == 6
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaFileAnalysis {
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub video_codec: String,
    pub pixel_format: String,
    pub bit_depth: u8,
    pub video_streams: Vec<u32>,
    pub subtitle_streams: Vec<u32>,
    /// Image-based subtitles (PGS, VobSub, DVB), a subset of `subtitle_streams`
    pub bitmap_subtitle_streams: Vec<u32>,
    pub audio_streams: Vec<AudioStream>,
    pub complexity: Complexity,
    pub duration_s: Option<f64>,
}

impl MediaFileAnalysis {
    pub fn from_metadata(meta: &StreamMetadata, thresholds: &ComplexityThresholds) -> Self {
        // Cover art is a video stream too; prefer a real one for the main picture
        let main_video = meta
            .of_kind(StreamKind::Video)
            .find(|s| !s.attached_pic)
            .or_else(|| meta.of_kind(StreamKind::Video).next());

        let video_width = main_video.and_then(|s| s.width);
        let video_height = main_video.and_then(|s| s.height);
        let pixel_format = main_video
            .and_then(|s| s.pix_fmt.clone())
            .unwrap_or_default();
        let bit_depth = bit_depth_from(&pixel_format, main_video.and_then(|s| s.bits_per_raw_sample));

        Self {
            video_width,
            video_height,
            video_codec: main_video
                .and_then(|s| s.codec_name.clone())
                .unwrap_or_default(),
            pixel_format,
            bit_depth,
            video_streams: meta
                .of_kind(StreamKind::Video)
                .filter(|s| !s.attached_pic)
                .map(|s| s.index)
                .collect(),
            subtitle_streams: meta.of_kind(StreamKind::Subtitle).map(|s| s.index).collect(),
            bitmap_subtitle_streams: meta
                .of_kind(StreamKind::Subtitle)
                .filter(|s| s.codec_name.as_deref().is_some_and(is_bitmap_subtitle))
                .map(|s| s.index)
                .collect(),
            audio_streams: meta
                .of_kind(StreamKind::Audio)
                .map(|s| AudioStream {
                    index: s.index,
                    channels: s.channels.unwrap_or(0),
                })
                .collect(),
            complexity: complexity_class(video_width, video_height, thresholds),
            duration_s: meta.duration_s,
        }
    }

    pub fn is_ten_bit(&self) -> bool {
        self.bit_depth >= 10
    }

    pub fn resolution(&self) -> String {
        match (self.video_width, self.video_height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "unknown".to_string(),
        }
    }
}

/// 10 when either the pixel format or the raw sample depth says so
pub fn bit_depth_from(pix_fmt: &str, bits_per_raw_sample: Option<u32>) -> u8 {
    let fmt = pix_fmt.to_ascii_lowercase();
    let fmt_says_10 = ["p10", "p12", "p16", "p010", "p012", "p016", "x2rgb10", "y210"]
        .iter()
        .any(|m| fmt.contains(m));
    let raw_says_10 = bits_per_raw_sample.is_some_and(|b| b >= 10);

    if fmt_says_10 || raw_says_10 { 10 } else { 8 }
}

/// Resolution bucket; unknown dimensions are treated as medium
pub fn complexity_class(
    width: Option<u32>,
    height: Option<u32>,
    thresholds: &ComplexityThresholds,
) -> Complexity {
    let (Some(w), Some(h)) = (width, height) else {
        return Complexity::Medium;
    };

    let pixels = u64::from(w) * u64::from(h);
    if pixels >= thresholds.high_pixels {
        Complexity::High
    } else if pixels >= thresholds.medium_pixels {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

/// Subtitle codecs stored as images rather than text
pub fn is_bitmap_subtitle(codec_name: &str) -> bool {
    matches!(
        codec_name,
        "hdmv_pgs_subtitle" | "dvd_subtitle" | "dvb_subtitle" | "xsub"
    )
}
