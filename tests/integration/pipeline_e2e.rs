// End-to-end runs over a temp directory with a fake ffmpeg/ffprobe

use crate::common::*;
use hevcbatch::engine::{
    BackendKind, Container, EncodeSettings, EncoderChoice, FailureStage, FileOutcome, JobStatus,
    PipelineOptions, select_encoder,
};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_mixed_directory_summary() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["a_1080p.mp4", "b_4k.mkv", "c_corrupt.avi"]);

    let runner = FakeRunner::new()
        .with_probe("a_1080p.mp4", hd_stereo())
        .with_probe("b_4k.mkv", uhd_surround_only());
    let profile = nvenc_host();
    let choice = select_encoder(&profile, None);
    assert_eq!(choice.primary, BackendKind::Nvenc);

    let (results, summary) =
        convert_dir(dir, &runner, &profile, choice, PipelineOptions::default(), 2);

    assert_eq!(
        (summary.success, summary.failed, summary.skipped, summary.total),
        (2, 1, 0, 3)
    );
    assert_eq!(summary.majority_backend, Some(BackendKind::Nvenc));

    assert_eq!(results.len(), 3);
    assert!(matches!(
        results[0].1,
        FileOutcome::Converted {
            backend: BackendKind::Nvenc,
            attempts: 1,
            ..
        }
    ));
    assert!(matches!(results[1].1, FileOutcome::Converted { .. }));
    assert!(matches!(
        results[2].1,
        FileOutcome::Failed {
            stage: FailureStage::Probe,
            ..
        }
    ));
    assert_eq!(results[2].0.status, JobStatus::Failed);

    assert!(dir.join("a_1080p.hevc.mkv").exists());
    assert!(dir.join("b_4k.hevc.mkv").exists());
    assert!(!dir.join("c_corrupt.hevc.mkv").exists());
    assert!(dir.join("a_1080p.mp4").exists(), "originals are kept");
    assert_no_partials(dir);

    let log = read_log(dir);
    assert_eq!(log.matches("✓ Success").count(), 2);
    assert!(log.contains("Failed (probe)"));
}

#[test]
fn test_surround_only_file_is_downmixed() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["b_4k.mkv"]);

    let runner = FakeRunner::new().with_probe("b_4k.mkv", uhd_surround_only());
    let profile = nvenc_host();
    let (_, summary) = convert_dir(
        dir,
        &runner,
        &profile,
        select_encoder(&profile, None),
        PipelineOptions::default(),
        1,
    );
    assert_eq!(summary.success, 1);

    let downmixes = runner.downmix_calls();
    assert_eq!(downmixes.len(), 1);
    assert_eq!(downmixes[0].value_of("-map"), Some("0:1"));
    assert_eq!(downmixes[0].value_of("-c:a"), Some("aac"));

    let encodes = runner.encode_calls();
    assert_eq!(encodes.len(), 1);
    let cmd = encodes[0].to_string();
    assert_cmd_contains(&cmd, "-map 0:0 -map 0:2 -map 1:a:0");
    assert_cmd_not_contains(&cmd, "-map 0:1");
    // 4K lands in the high complexity class
    assert_cmd_has_flag_value(&cmd, "-preset", "p4");
    assert_cmd_has_flag_value(&cmd, "-profile:v", "main10");
    assert_cmd_has_flag_value(&cmd, "-pix_fmt", "p010le");
    assert_cmd_has_flag_value(&cmd, "-c:a", "copy");
    assert_cmd_has_flag_value(&cmd, "-c:s", "copy");

    // The stereo track is gone once the encode is finalized
    assert_no_partials(dir);
}

#[test]
fn test_stereo_file_copies_audio() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["a_1080p.mp4"]);

    let runner = FakeRunner::new().with_probe("a_1080p.mp4", hd_stereo());
    let (_, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        EncoderChoice::with_primary(BackendKind::Nvenc),
        PipelineOptions::default(),
        1,
    );
    assert_eq!(summary.success, 1);
    assert!(runner.downmix_calls().is_empty());

    let cmd = runner.encode_calls()[0].to_string();
    assert_cmd_contains(&cmd, "-map 0:0 -map 0:1");
    assert_cmd_has_flag_value(&cmd, "-preset", "p5");
    assert_cmd_not_contains(&cmd, "-pix_fmt");
}

#[test]
fn test_video_only_file_has_no_audio_codec() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["silent.mp4"]);

    let runner = FakeRunner::new().with_probe(
        "silent.mp4",
        probe_json(vec![video_stream(0, "h264", 1280, 720, "yuv420p")]),
    );
    let (results, _) = convert_dir(
        dir,
        &runner,
        &profile_with(&[]),
        EncoderChoice::software(),
        PipelineOptions::default(),
        1,
    );

    assert!(matches!(results[0].1, FileOutcome::Converted { .. }));
    let cmd = runner.encode_calls()[0].to_string();
    assert_cmd_not_contains(&cmd, "-c:a");
    assert_cmd_has_flag_value(&cmd, "-c:v", "libx265");
    assert_cmd_has_flag_value(&cmd, "-preset", "slow");
}

#[test]
fn test_existing_output_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["a_1080p.mp4"]);
    fs::write(dir.join("a_1080p.hevc.mkv"), b"previous run").unwrap();

    let runner = FakeRunner::new().with_probe("a_1080p.mp4", hd_stereo());
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        EncoderChoice::with_primary(BackendKind::Nvenc),
        PipelineOptions::default(),
        1,
    );

    assert_eq!((summary.skipped, summary.total), (1, 1));
    assert_eq!(results[0].0.status, JobStatus::Skipped);
    assert!(runner.calls().is_empty(), "skipped files are never probed");
    assert_eq!(
        fs::read(dir.join("a_1080p.hevc.mkv")).unwrap(),
        b"previous run"
    );
}

#[test]
fn test_replace_mode_removes_original() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["movie.mp4", "show.mkv"]);

    let runner = FakeRunner::new()
        .with_probe("movie.mp4", hd_stereo())
        .with_probe("show.mkv", hd_stereo());
    let options = PipelineOptions {
        replace_original: true,
        ..Default::default()
    };
    let (_, summary) = convert_dir(
        dir,
        &runner,
        &profile_with(&[]),
        EncoderChoice::software(),
        options,
        1,
    );
    assert_eq!(summary.success, 2);

    assert!(!dir.join("movie.mp4").exists());
    assert!(dir.join("movie.mkv").exists());
    // Same name: the rename itself replaces the original
    assert_eq!(fs::read(dir.join("show.mkv")).unwrap(), b"encoded output");
    assert_no_partials(dir);
}

#[test]
fn test_replace_mode_keeps_same_stem_sibling() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["a.mkv", "a.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("a.mkv", hd_stereo())
        .with_probe("a.mp4", hd_stereo());
    let options = PipelineOptions {
        replace_original: true,
        ..Default::default()
    };
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &profile_with(&[]),
        EncoderChoice::software(),
        options,
        2,
    );

    assert_eq!((summary.success, summary.skipped), (1, 1));
    assert_eq!(results[1].0.display_name(), "a.mp4");
    assert_eq!(
        results[1].1,
        FileOutcome::Skipped {
            reason: "output a.mkv would overwrite another input".to_string()
        }
    );
    assert_eq!(runner.encode_calls().len(), 1);
    assert_eq!(fs::read(dir.join("a.mkv")).unwrap(), b"encoded output");
    assert_eq!(fs::read(dir.join("a.mp4")).unwrap(), vec![0u8; 4096]);
}

#[test]
fn test_same_stem_inputs_get_one_output() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["a.mkv", "a.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("a.mkv", hd_stereo())
        .with_probe("a.mp4", hd_stereo());
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &profile_with(&[]),
        EncoderChoice::software(),
        PipelineOptions::default(),
        2,
    );

    assert_eq!((summary.success, summary.skipped), (1, 1));
    assert_eq!(results[0].1.status(), JobStatus::Done);
    assert_eq!(
        results[1].1,
        FileOutcome::Skipped {
            reason: "output a.hevc.mkv is already written by a.mkv".to_string()
        }
    );
    assert_eq!(runner.encode_calls().len(), 1);
    assert!(dir.join("a.mp4").exists());
}

#[test]
fn test_mp4_output_from_bluray_rip_skips_pgs() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["rip.mkv"]);

    let rip = probe_json(vec![
        video_stream(0, "h264", 1920, 1080, "yuv420p"),
        audio_stream(1, 2),
        subtitle_stream(2),
        bitmap_subtitle_stream(3),
    ]);
    let runner = FakeRunner::new().with_probe("rip.mkv", rip);
    let options = PipelineOptions {
        settings: EncodeSettings {
            container: Container::Mp4,
            ..Default::default()
        },
        ..Default::default()
    };
    let (results, _) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        EncoderChoice::with_primary(BackendKind::Nvenc),
        options,
        1,
    );

    assert!(matches!(
        results[0].1,
        FileOutcome::Converted { attempts: 1, .. }
    ));
    let encode = runner.encode_calls()[0].to_string();
    assert_cmd_contains(&encode, "-map 0:2");
    assert_cmd_not_contains(&encode, "-map 0:3");
    assert_cmd_has_flag_value(&encode, "-c:s", "mov_text");
}

#[test]
fn test_dry_run_encodes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["b_4k.mkv"]);

    let runner = FakeRunner::new().with_probe("b_4k.mkv", uhd_surround_only());
    let options = PipelineOptions {
        dry_run: true,
        ..Default::default()
    };
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        EncoderChoice::with_primary(BackendKind::Nvenc),
        options,
        1,
    );

    assert_eq!(summary.skipped, 1);
    assert!(matches!(
        &results[0].1,
        FileOutcome::Skipped { reason } if reason == "dry run"
    ));
    assert!(runner.calls().iter().all(|c| c.program == "ffprobe"));
    assert!(!dir.join("b_4k.hevc.mkv").exists());
}
