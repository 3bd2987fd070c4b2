#![allow(dead_code)]

use hevcbatch::engine::{
    BackendCapability, BackendKind, ConversionPipeline, CpuInfo, EncoderChoice, FfprobeProbe,
    FileJob, FileOutcome, HardwareProfile, OutputNaming, PipelineOptions, RunLog, StagingArea,
    build_job_queue, run_batch, scan,
};
use hevcbatch::stats::{RunStats, Summary};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::FakeRunner;

pub fn video_stream(index: u32, codec: &str, width: u32, height: u32, pix_fmt: &str) -> Value {
    json!({
        "index": index,
        "codec_type": "video",
        "codec_name": codec,
        "width": width,
        "height": height,
        "pix_fmt": pix_fmt,
        "disposition": { "default": 1, "attached_pic": 0 }
    })
}

pub fn audio_stream(index: u32, channels: u32) -> Value {
    json!({
        "index": index,
        "codec_type": "audio",
        "codec_name": if channels == 6 { "ac3" } else { "aac" },
        "channels": channels
    })
}

pub fn subtitle_stream(index: u32) -> Value {
    json!({
        "index": index,
        "codec_type": "subtitle",
        "codec_name": "subrip"
    })
}

/// Blu-ray PGS subtitle
pub fn bitmap_subtitle_stream(index: u32) -> Value {
    json!({
        "index": index,
        "codec_type": "subtitle",
        "codec_name": "hdmv_pgs_subtitle"
    })
}

/// ffprobe `-print_format json` document for the given streams
pub fn probe_json(streams: Vec<Value>) -> String {
    json!({
        "streams": streams,
        "format": { "format_name": "matroska,webm", "duration": "60.000000" }
    })
    .to_string()
}

/// 1080p 8-bit H.264 with one stereo track
pub fn hd_stereo() -> String {
    probe_json(vec![
        video_stream(0, "h264", 1920, 1080, "yuv420p"),
        audio_stream(1, 2),
    ])
}

/// 4K 10-bit HEVC with only a 5.1 track and a subtitle
pub fn uhd_surround_only() -> String {
    probe_json(vec![
        video_stream(0, "hevc", 3840, 2160, "yuv420p10le"),
        audio_stream(1, 6),
        subtitle_stream(2),
    ])
}

pub fn hardware(ten_bit: bool, next_gen: bool) -> BackendCapability {
    BackendCapability {
        available: true,
        supports_ten_bit: ten_bit,
        supports_next_gen_codec: next_gen,
        device_handle: None,
    }
}

pub fn profile_with(backends: &[(BackendKind, BackendCapability)]) -> HardwareProfile {
    let backends: BTreeMap<_, _> = backends.iter().cloned().collect();
    HardwareProfile::new(CpuInfo::default(), BTreeSet::new(), backends)
}

/// Host with a working NVENC that handles 10-bit but not AV1
pub fn nvenc_host() -> HardwareProfile {
    profile_with(&[(BackendKind::Nvenc, hardware(true, false))])
}

pub fn naming() -> OutputNaming {
    OutputNaming {
        suffix: "hevc".to_string(),
        extension: "mkv".to_string(),
        output_dir: None,
        replace_original: false,
    }
}

pub fn write_inputs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, vec![0u8; 4096]).unwrap();
            path
        })
        .collect()
}

/// Scan `dir` and run every file through a pipeline driven by `runner`
pub fn convert_dir(
    dir: &Path,
    runner: &FakeRunner,
    profile: &HardwareProfile,
    choice: EncoderChoice,
    options: PipelineOptions,
    workers: usize,
) -> (Vec<(FileJob, FileOutcome)>, Summary) {
    let probe = FfprobeProbe::new(runner);
    let staging = StagingArea::new(None);
    let log = RunLog::in_dir(dir);
    let pipeline =
        ConversionPipeline::new(runner, &probe, profile, choice, &staging, &log).with_options(options);

    let files = scan(dir, false, "hevc").unwrap();
    let naming = OutputNaming {
        replace_original: pipeline.options().replace_original,
        ..naming()
    };
    let jobs = build_job_queue(files, &naming, false);

    let stats = RunStats::new();
    let results = run_batch(&pipeline, jobs, workers, &stats, |_, _| {});
    (results, stats.summary())
}

pub fn read_log(dir: &Path) -> String {
    fs::read_to_string(dir.join(hevcbatch::engine::LOG_FILE_NAME)).unwrap_or_default()
}
