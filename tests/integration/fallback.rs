// Hardware failures retry once in software; software failures are final

use crate::common::*;
use hevcbatch::engine::{
    BackendKind, ConversionPipeline, EncodeSettings, EncoderChoice, FailureStage, FfprobeProbe,
    FileJob, FileOutcome, PipelineOptions, RunLog, StagingArea, VideoCodec,
};
use std::fs;
use tempfile::TempDir;

fn nvenc() -> EncoderChoice {
    EncoderChoice::with_primary(BackendKind::Nvenc)
}

#[test]
fn test_hardware_failure_retries_in_software() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["movie.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("movie.mp4", hd_stereo())
        .failing("hevc_nvenc");
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        nvenc(),
        PipelineOptions::default(),
        1,
    );

    assert_eq!(
        results[0].1,
        FileOutcome::Converted {
            backend: BackendKind::Software,
            attempts: 2,
            output_path: dir.join("movie.hevc.mkv"),
        }
    );
    assert_eq!(runner.encoders_used(), vec!["hevc_nvenc", "libx265"]);
    assert_eq!(summary.majority_backend, Some(BackendKind::Software));

    let log = read_log(dir);
    assert!(log.contains("[fallback] nvenc failed; retrying with software"));
    assert!(log.contains("Error while opening encoder"), "full stderr is logged");
    assert_no_partials(dir);
}

#[test]
fn test_both_attempts_failing_fails_the_file() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["movie.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("movie.mp4", hd_stereo())
        .failing("hevc_nvenc")
        .failing("libx265");
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        nvenc(),
        PipelineOptions::default(),
        1,
    );

    match &results[0].1 {
        FileOutcome::Failed { stage, error } => {
            assert_eq!(*stage, FailureStage::Encode);
            assert!(error.contains("after 2 attempt(s)"), "{}", error);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    // Exactly one retry, never a third attempt
    assert_eq!(runner.encode_calls().len(), 2);
    assert_eq!((summary.failed, summary.success), (1, 0));
    assert!(!dir.join("movie.hevc.mkv").exists());
    assert_no_partials(dir);
}

#[test]
fn test_timeout_counts_as_failure() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["movie.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("movie.mp4", hd_stereo())
        .hanging("hevc_nvenc");
    let (results, _) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        nvenc(),
        PipelineOptions::default(),
        1,
    );

    assert!(matches!(
        results[0].1,
        FileOutcome::Converted {
            backend: BackendKind::Software,
            attempts: 2,
            ..
        }
    ));
    assert!(read_log(dir).contains("timed out"));
}

#[test]
fn test_empty_output_counts_as_failure() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["movie.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("movie.mp4", hd_stereo())
        .empty_output("hevc_nvenc");
    let (results, _) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        nvenc(),
        PipelineOptions::default(),
        1,
    );

    assert!(matches!(
        results[0].1,
        FileOutcome::Converted {
            backend: BackendKind::Software,
            ..
        }
    ));
}

#[test]
fn test_software_primary_is_not_retried() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["movie.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("movie.mp4", hd_stereo())
        .failing("libx265");
    let (results, _) = convert_dir(
        dir,
        &runner,
        &profile_with(&[]),
        EncoderChoice::software(),
        PipelineOptions::default(),
        1,
    );

    assert_eq!(results[0].1.status(), hevcbatch::engine::JobStatus::Failed);
    assert_eq!(runner.encoders_used(), vec!["libx265"]);
}

#[test]
fn test_downmix_runs_once_across_attempts() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["b_4k.mkv"]);

    let runner = FakeRunner::new()
        .with_probe("b_4k.mkv", uhd_surround_only())
        .failing("hevc_nvenc");
    let (_, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        nvenc(),
        PipelineOptions::default(),
        1,
    );
    assert_eq!(summary.success, 1);

    let downmixes = runner.downmix_calls();
    assert_eq!(downmixes.len(), 1);
    let track = downmixes[0].last_arg().unwrap().to_string();

    let encodes = runner.encode_calls();
    assert_eq!(encodes.len(), 2);
    for cmd in &encodes {
        assert!(cmd.args.contains(&track), "every attempt reuses {}", track);
        assert_cmd_contains(&cmd.to_string(), "-map 1:a:0");
    }
    // Software keeps 10-bit even though it is the fallback
    assert_eq!(encodes[1].value_of("-pix_fmt"), Some("yuv420p10le"));
    assert_no_partials(dir);
}

#[test]
fn test_unsupported_codec_skips_straight_to_software() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["movie.mp4"]);

    let runner = FakeRunner::new().with_probe("movie.mp4", hd_stereo());
    let options = PipelineOptions {
        settings: EncodeSettings {
            codec: VideoCodec::Av1,
            ..Default::default()
        },
        ..Default::default()
    };
    // This NVENC has no AV1 encoder
    let (results, _) = convert_dir(dir, &runner, &nvenc_host(), nvenc(), options, 1);

    assert!(matches!(
        results[0].1,
        FileOutcome::Converted {
            backend: BackendKind::Software,
            attempts: 2,
            ..
        }
    ));
    assert_eq!(runner.encoders_used(), vec!["libsvtav1"]);
}

#[test]
fn test_each_file_gets_its_own_retry() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["one.mp4", "two.mp4"]);

    let runner = FakeRunner::new()
        .with_probe("one.mp4", hd_stereo())
        .with_probe("two.mp4", hd_stereo())
        .failing("hevc_nvenc");
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        nvenc(),
        PipelineOptions::default(),
        1,
    );

    assert_eq!(summary.success, 2);
    assert_eq!(
        runner.encoders_used(),
        vec!["hevc_nvenc", "libx265", "hevc_nvenc", "libx265"]
    );
    for (_, outcome) in &results {
        assert!(matches!(
            outcome,
            FileOutcome::Converted {
                backend: BackendKind::Software,
                attempts: 2,
                ..
            }
        ));
    }
}

#[test]
fn test_failed_downmix_removes_finished_tracks() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["concert.mkv"]);

    let two_surround = probe_json(vec![
        video_stream(0, "h264", 1920, 1080, "yuv420p"),
        audio_stream(1, 6),
        audio_stream(2, 6),
    ]);
    let runner = FakeRunner::new()
        .with_probe("concert.mkv", two_surround)
        .failing_downmix(2);
    let (results, summary) = convert_dir(
        dir,
        &runner,
        &nvenc_host(),
        nvenc(),
        PipelineOptions::default(),
        1,
    );

    match &results[0].1 {
        FileOutcome::Failed { stage, error } => {
            assert_eq!(*stage, FailureStage::Downmix);
            assert!(error.contains("audio stream 2"), "{}", error);
        }
        other => panic!("expected downmix failure, got {:?}", other),
    }
    // Stream 1 was written before stream 2 failed
    assert_eq!(runner.downmix_calls().len(), 2);
    assert!(runner.encode_calls().is_empty(), "no encode without its audio");
    assert_eq!(summary.failed, 1);
    assert_no_partials(dir);
}

#[test]
fn test_unmovable_output_fails_at_finalize() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    let input = write_inputs(dir, &["movie.mp4"]).remove(0);

    // A directory squatting on the output name makes the final rename fail
    let output = dir.join("movie.hevc.mkv");
    fs::create_dir(&output).unwrap();

    let runner = FakeRunner::new().with_probe("movie.mp4", hd_stereo());
    let probe = FfprobeProbe::new(&runner);
    let profile = nvenc_host();
    let staging = StagingArea::new(None);
    let log = RunLog::disabled();
    let pipeline = ConversionPipeline::new(&runner, &probe, &profile, nvenc(), &staging, &log);

    let outcome = pipeline.process_file(&FileJob::new(input.clone(), output.clone()));

    match outcome {
        FileOutcome::Failed { stage, error } => {
            assert_eq!(stage, FailureStage::Finalize);
            assert!(error.contains("movie.hevc.mkv"), "{}", error);
        }
        other => panic!("expected finalize failure, got {:?}", other),
    }
    assert_eq!(runner.encoders_used(), vec!["hevc_nvenc"], "finalize is not retried");
    assert!(output.is_dir());
    assert!(input.exists());
    assert_no_partials(dir);
}
