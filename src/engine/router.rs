//! Stream routing: which streams are copied and which 5.1 tracks get a stereo
//! downmix.
//!
//! A 5.1 track is only downmixed when it is the only kind of audio in the
//! file. As soon as any non-5.1 track exists, every 5.1 track is dropped.

use std::collections::BTreeSet;

use super::analysis::{AudioStream, MediaFileAnalysis};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodePlan {
    pub video: Vec<u32>,
    pub subtitles: Vec<u32>,
    pub copy_audio: Vec<u32>,
    pub downmix_audio: Vec<u32>,
    /// 5.1 tracks left out because another audio track exists
    pub dropped_audio: Vec<u32>,
}

impl EncodePlan {
    /// Every stream passed through from the input (video is re-encoded but
    /// mapped the same way)
    pub fn streams_to_copy(&self) -> BTreeSet<u32> {
        self.video
            .iter()
            .chain(&self.subtitles)
            .chain(&self.copy_audio)
            .copied()
            .collect()
    }

    pub fn streams_to_downmix(&self) -> BTreeSet<u32> {
        self.downmix_audio.iter().copied().collect()
    }

    pub fn has_audio(&self) -> bool {
        !self.copy_audio.is_empty() || !self.downmix_audio.is_empty()
    }

    pub fn needs_downmix(&self) -> bool {
        !self.downmix_audio.is_empty()
    }
}

pub fn route(analysis: &MediaFileAnalysis) -> EncodePlan {
    let (surround, other): (Vec<&AudioStream>, Vec<&AudioStream>) = analysis
        .audio_streams
        .iter()
        .partition(|a| a.is_surround_51());

    let surround: Vec<u32> = surround.into_iter().map(|a| a.index).collect();

    let (copy_audio, downmix_audio, dropped_audio) = if !other.is_empty() {
        (other.into_iter().map(|a| a.index).collect(), Vec::new(), surround)
    } else {
        (Vec::new(), surround, Vec::new())
    };

    EncodePlan {
        video: analysis.video_streams.clone(),
        subtitles: analysis.subtitle_streams.clone(),
        copy_audio,
        downmix_audio,
        dropped_audio,
    }
}
