//! Backend selection: scored automatic mode and user overrides.
//!
//! Base scores are 100 points apart and the feature bonuses add up to 30, so
//! a lower tier with every feature can never outrank a higher tier with none.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::hardware::{BackendCapability, BackendKind, HardwareProfile};

pub const NVENC_BASE_SCORE: i32 = 400;
pub const QSV_BASE_SCORE: i32 = 300;
pub const VAAPI_BASE_SCORE: i32 = 200;
pub const SOFTWARE_BASE_SCORE: i32 = 100;

pub const TEN_BIT_BONUS: i32 = 10;
pub const NEXT_GEN_CODEC_BONUS: i32 = 20;

/// User-forced backend choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendOverride {
    /// Best available hardware backend in fixed NVENC > QSV > VAAPI order
    Gpu,
    Cpu,
    Nvenc,
    Qsv,
    Vaapi,
}

impl FromStr for BackendOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(Self::Gpu),
            "cpu" | "software" => Ok(Self::Cpu),
            "nvenc" => Ok(Self::Nvenc),
            "qsv" => Ok(Self::Qsv),
            "vaapi" => Ok(Self::Vaapi),
            other => Err(format!(
                "unknown backend '{}' (expected gpu, cpu, nvenc, qsv or vaapi)",
                other
            )),
        }
    }
}

impl fmt::Display for BackendOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
            Self::Nvenc => "nvenc",
            Self::Qsv => "qsv",
            Self::Vaapi => "vaapi",
        };
        f.write_str(name)
    }
}

/// Primary backend plus the retry target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderChoice {
    pub primary: BackendKind,
    pub fallback: Option<BackendKind>,
}

impl EncoderChoice {
    /// Hardware primaries always fall back to software
    pub fn with_primary(primary: BackendKind) -> Self {
        Self {
            primary,
            fallback: primary.is_hardware().then_some(BackendKind::Software),
        }
    }

    pub fn software() -> Self {
        Self::with_primary(BackendKind::Software)
    }
}

pub fn base_score(kind: BackendKind) -> i32 {
    match kind {
        BackendKind::Nvenc => NVENC_BASE_SCORE,
        BackendKind::Qsv => QSV_BASE_SCORE,
        BackendKind::Vaapi => VAAPI_BASE_SCORE,
        BackendKind::Software => SOFTWARE_BASE_SCORE,
    }
}

/// Score a backend; `None` means ineligible
pub fn score(kind: BackendKind, capability: &BackendCapability) -> Option<i32> {
    if !capability.available {
        return None;
    }

    let mut total = base_score(kind);
    if capability.supports_ten_bit {
        total += TEN_BIT_BONUS;
    }
    if capability.supports_next_gen_codec {
        total += NEXT_GEN_CODEC_BONUS;
    }
    Some(total)
}

/// Every candidate with its score, in fixed candidate order
pub fn ranking(profile: &HardwareProfile) -> Vec<(BackendKind, Option<i32>)> {
    BackendKind::ALL
        .into_iter()
        .map(|kind| (kind, score(kind, profile.capability(kind))))
        .collect()
}

/// Automatic mode: highest score wins, earlier candidate wins ties
pub fn select_auto(profile: &HardwareProfile) -> EncoderChoice {
    let mut best: Option<(BackendKind, i32)> = None;

    for (kind, score) in ranking(profile) {
        let Some(score) = score else { continue };
        // Strict comparison keeps the earlier candidate on ties
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((kind, score));
        }
    }

    let primary = best.map(|(kind, _)| kind).unwrap_or(BackendKind::Software);
    EncoderChoice::with_primary(primary)
}

/// Resolve the encoder for a run, honouring an optional override
pub fn select_encoder(
    profile: &HardwareProfile,
    user_override: Option<BackendOverride>,
) -> EncoderChoice {
    let choice = match user_override {
        None => select_auto(profile),
        Some(BackendOverride::Cpu) => EncoderChoice::software(),
        Some(BackendOverride::Gpu) => BackendKind::HARDWARE
            .into_iter()
            .find(|kind| profile.is_available(*kind))
            .map(EncoderChoice::with_primary)
            .unwrap_or_else(|| {
                tracing::warn!("--gpu requested but no hardware encoder is available, using software");
                EncoderChoice::software()
            }),
        Some(forced) => {
            let kind = match forced {
                BackendOverride::Nvenc => BackendKind::Nvenc,
                BackendOverride::Qsv => BackendKind::Qsv,
                _ => BackendKind::Vaapi,
            };
            if profile.is_available(kind) {
                EncoderChoice::with_primary(kind)
            } else {
                tracing::warn!(
                    backend = %kind,
                    "requested encoder is not available on this host, using software"
                );
                EncoderChoice::software()
            }
        }
    };

    tracing::info!(
        primary = %choice.primary,
        fallback = ?choice.fallback,
        override_ = ?user_override,
        "encoder selected"
    );
    choice
}
