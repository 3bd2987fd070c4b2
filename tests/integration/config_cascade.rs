// Config layers flowing into a conversion run

use crate::common::*;
use hevcbatch::config::{Config, PROJECT_CONFIG_NAME};
use hevcbatch::engine::{
    BackendOverride, EncodeSettings, OutputNaming, PipelineOptions, build_job_queue, scan,
    select_encoder,
};
use std::fs;
use tempfile::TempDir;

fn options_from(config: &Config) -> PipelineOptions {
    PipelineOptions {
        settings: EncodeSettings {
            codec: config.defaults.codec,
            container: config.defaults.container,
            quality: config.defaults.quality,
            audio_bitrate_kbps: config.defaults.audio_bitrate_kbps,
            extra_args: config.defaults.extra_args.clone(),
        },
        thresholds: config.complexity.thresholds(),
        replace_original: config.defaults.replace_original,
        dry_run: false,
    }
}

#[test]
fn test_project_config_shapes_the_encode() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["clip.mp4"]);

    let project = dir.join(PROJECT_CONFIG_NAME);
    fs::write(
        &project,
        r#"
[defaults]
backend = "cpu"
quality = 19
extra_args = "-metadata title='Season One'"
audio_bitrate_kbps = 160

[complexity]
medium_pixels = 100000
high_pixels = 500000
"#,
    )
    .unwrap();

    let config = Config::load_layers(&[project], None).unwrap();
    let profile = nvenc_host();
    let choice = select_encoder(&profile, config.defaults.backend);

    let runner = FakeRunner::new().with_probe("clip.mp4", uhd_surround_only());
    let (_, summary) = convert_dir(dir, &runner, &profile, choice, options_from(&config), 1);
    assert_eq!(summary.success, 1);

    let encode = runner.encode_calls()[0].to_string();
    assert_cmd_has_flag_value(&encode, "-c:v", "libx265");
    assert_cmd_has_flag_value(&encode, "-crf", "19");
    // 4K is far past the lowered high threshold
    assert_cmd_has_flag_value(&encode, "-preset", "fast");
    assert!(runner.encode_calls()[0]
        .args
        .contains(&"title=Season One".to_string()));

    let downmix = &runner.downmix_calls()[0];
    assert_eq!(downmix.value_of("-b:a"), Some("160k"));
}

#[test]
fn test_output_settings_shape_job_queue() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write_inputs(dir, &["clip.mp4", "clip.x265.mp4"]);

    let explicit = dir.join("run.toml");
    fs::write(
        &explicit,
        "[defaults]\noutput_suffix = \"x265\"\ncontainer = \"mp4\"\nbackend = \"gpu\"\n",
    )
    .unwrap();
    let config = Config::load_layers(&[], Some(explicit.as_path())).unwrap();
    assert_eq!(config.defaults.backend, Some(BackendOverride::Gpu));

    let suffix = config.defaults.effective_suffix();
    let files = scan(dir, false, &suffix).unwrap();
    assert_eq!(files, vec![dir.join("clip.mp4")], "own outputs are not rescanned");

    let naming = OutputNaming {
        suffix,
        extension: config.defaults.container.extension().to_string(),
        output_dir: None,
        replace_original: false,
    };
    let jobs = build_job_queue(files, &naming, config.defaults.overwrite);
    assert_eq!(jobs[0].output_path, dir.join("clip.x265.mp4"));
    assert_eq!(
        jobs[0].skip_reason.as_deref(),
        Some("output already exists")
    );
}
