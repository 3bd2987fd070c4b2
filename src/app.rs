use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use hevcbatch::config::Config;
use hevcbatch::engine::{self, BackendKind, ConversionPipeline, HardwareProfile, JobStatus};
use hevcbatch::stats::RunStats;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

pub fn run(mut cli: Cli) {
    if let Some(command) = cli.command.take() {
        match command {
            Commands::List { directory } => handle_list(directory, cli.config.as_deref()),
            Commands::Detect => handle_detect(cli.config.as_deref()),
            Commands::Probe { file } => handle_probe(&file, cli.config.as_deref()),
            Commands::CheckFfmpeg => handle_check_ffmpeg(),
            Commands::InitConfig { force } => handle_init_config(force),
        }
        return;
    }

    let dir = target_dir(cli.directory.clone());
    if !dir.is_dir() {
        eprintln!("Error: directory not found: {}", dir.display());
        process::exit(1);
    }

    let config = match resolve_config(&cli, &dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = handle_convert(&dir, &config, cli.dry_run) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn target_dir(directory: Option<PathBuf>) -> PathBuf {
    directory.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Config cascade for `dir`, with command-line flags applied last
fn resolve_config(cli: &Cli, dir: &Path) -> Result<Config> {
    let mut config = Config::load_cascade(dir, cli.config.as_deref())?;
    let defaults = &mut config.defaults;

    if let Some(backend) = cli.backend_override() {
        defaults.backend = Some(backend);
    }
    if let Some(codec) = cli.codec {
        defaults.codec = codec;
    }
    if let Some(container) = cli.container {
        defaults.container = container;
    }
    if let Some(quality) = cli.quality {
        defaults.quality = Some(quality);
    }
    if let Some(jobs) = cli.jobs {
        defaults.max_workers = jobs;
    }
    defaults.recursive |= cli.recursive;
    defaults.overwrite |= cli.overwrite;
    defaults.replace_original |= cli.replace;

    if let Some(secs) = cli.timeout {
        config.process.encode_timeout_secs = Some(secs);
    }
    if cli.no_ram_disk {
        config.staging.use_ram_disk = false;
    }

    config.validate()?;
    Ok(config)
}

/// Load the cascade for commands that take no conversion flags
fn load_config(dir: &Path, explicit: Option<&Path>) -> Config {
    match Config::load_cascade(dir, explicit) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn output_naming(config: &Config) -> engine::OutputNaming {
    engine::OutputNaming {
        suffix: config.defaults.effective_suffix(),
        extension: config.defaults.container.extension().to_string(),
        output_dir: config.defaults.output_dir.clone(),
        replace_original: config.defaults.replace_original,
    }
}

fn encode_settings(config: &Config) -> engine::EncodeSettings {
    engine::EncodeSettings {
        codec: config.defaults.codec,
        container: config.defaults.container,
        quality: config.defaults.quality,
        audio_bitrate_kbps: config.defaults.audio_bitrate_kbps,
        extra_args: config.defaults.extra_args.clone(),
    }
}

fn handle_convert(dir: &Path, config: &Config, dry_run: bool) -> Result<()> {
    let defaults = &config.defaults;
    let files = engine::scan(dir, defaults.recursive, &defaults.effective_suffix())?;
    if files.is_empty() {
        println!("No video files found in {}", dir.display());
        return Ok(());
    }
    let jobs = engine::build_job_queue(files, &output_naming(config), defaults.overwrite);

    let profile = engine::hardware::host_profile();
    let choice = engine::select_encoder(profile, defaults.backend);

    let encode_runner = engine::SystemRunner::new()
        .with_timeout(config.process.encode_timeout_secs.map(Duration::from_secs));
    let probe_runner = engine::SystemRunner::new()
        .with_timeout(Some(Duration::from_secs(config.process.probe_timeout_secs)));
    let probe = engine::FfprobeProbe::new(&probe_runner);

    let staging = engine::StagingArea::new(
        config
            .staging
            .use_ram_disk
            .then(|| config.staging.ram_disk_dir.clone()),
    );
    let log = if defaults.log_file && !dry_run {
        engine::RunLog::in_dir(dir)
    } else {
        engine::RunLog::disabled()
    };

    let pipeline = ConversionPipeline::new(&encode_runner, &probe, profile, choice, &staging, &log)
        .with_options(engine::PipelineOptions {
            settings: encode_settings(config),
            thresholds: config.complexity.thresholds(),
            replace_original: defaults.replace_original,
            dry_run,
        });

    // Plans print whole, so a dry run stays sequential
    let workers = if dry_run { 1 } else { defaults.max_workers as usize };

    println!(
        "Converting {} file(s) in {} with {} ({} worker(s))",
        jobs.len(),
        dir.display(),
        choice.primary.display_name(),
        workers
    );

    let stats = RunStats::new();
    engine::run_batch(&pipeline, jobs, workers, &stats, |job, outcome| {
        println!("{}: {}", job.display_name(), outcome);
    });

    println!();
    println!("{}", stats.summary());
    if engine::process::is_interrupted() {
        println!("Interrupted: remaining files were skipped");
    }
    if let Some(path) = log.path() {
        tracing::debug!(path = %path.display(), "run log written");
    }
    Ok(())
}

fn handle_list(directory: Option<PathBuf>, explicit: Option<&Path>) {
    let dir = target_dir(directory);
    let config = load_config(&dir, explicit);
    println!("Scanning directory: {}", dir.display());

    match engine::scan(
        &dir,
        config.defaults.recursive,
        &config.defaults.effective_suffix(),
    ) {
        Ok(files) => {
            let jobs =
                engine::build_job_queue(files, &output_naming(&config), config.defaults.overwrite);

            for job in &jobs {
                match job.status {
                    JobStatus::Skipped => println!(
                        "- {} [skip: {}]",
                        job.input_path.display(),
                        job.skip_reason.as_deref().unwrap_or("skipped")
                    ),
                    _ => println!(
                        "- {} -> {}",
                        job.input_path.display(),
                        job.output_path.display()
                    ),
                }
            }
            let pending = jobs
                .iter()
                .filter(|j| j.status == JobStatus::Pending)
                .count();
            println!("Total files: {} ({} pending)", jobs.len(), pending);
        }
        Err(e) => {
            eprintln!("Error scanning directory: {:#}", e);
            process::exit(1);
        }
    }
}

fn print_profile(profile: &HardwareProfile) {
    let cpu = profile.cpu();
    println!("CPU: {:?} ({} cores)", cpu.vendor, cpu.cores);

    if profile.gpus().is_empty() {
        println!("GPUs: none detected");
    } else {
        let gpus: Vec<String> = profile.gpus().iter().map(|g| format!("{:?}", g)).collect();
        println!("GPUs: {}", gpus.join(", "));
    }
    println!();

    println!(
        "{:<16} {:<10} {:<8} {:<8} {:>6}",
        "Backend", "Available", "10-bit", "AV1", "Score"
    );
    for (kind, score) in engine::selector::ranking(profile) {
        let cap = profile.capability(kind);
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        println!(
            "{:<16} {:<10} {:<8} {:<8} {:>6}",
            kind.display_name(),
            yes_no(cap.available),
            yes_no(cap.supports_ten_bit),
            yes_no(cap.supports_next_gen_codec),
            score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
        );
        if let Some(device) = &cap.device_handle {
            println!("{:<16} device {}", "", device);
        }
    }
}

fn handle_detect(explicit: Option<&Path>) {
    let config = load_config(&target_dir(None), explicit);
    let profile = engine::hardware::host_profile();
    print_profile(profile);

    let choice = engine::select_encoder(profile, config.defaults.backend);
    println!();
    match choice.fallback {
        Some(fallback) => println!(
            "Selected: {} (fallback: {})",
            choice.primary.display_name(),
            fallback.display_name()
        ),
        None => println!("Selected: {}", choice.primary.display_name()),
    }
}

fn handle_probe(file: &Path, explicit: Option<&Path>) {
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let config = load_config(dir, explicit);

    let runner = engine::SystemRunner::new()
        .with_timeout(Some(Duration::from_secs(config.process.probe_timeout_secs)));
    let probe = engine::FfprobeProbe::new(&runner);

    let meta = match engine::MediaProbe::inspect(&probe, file) {
        Ok(meta) => meta,
        Err(e) => {
            eprintln!("Error: {:#}", anyhow::Error::new(e));
            process::exit(1);
        }
    };
    let analysis = engine::MediaFileAnalysis::from_metadata(&meta, &config.complexity.thresholds());
    let plan = engine::route(&analysis);

    println!("File: {}", file.display());
    if let Some(format) = &meta.format_name {
        println!("Format: {}", format);
    }
    if let Some(duration) = analysis.duration_s {
        println!("Duration: {:.2} seconds", duration);
    }
    println!(
        "Video: {} {} {} ({}-bit, complexity {})",
        analysis.video_codec,
        analysis.resolution(),
        analysis.pixel_format,
        analysis.bit_depth,
        analysis.complexity
    );
    for audio in &analysis.audio_streams {
        println!("Audio: stream {} ({} channels)", audio.index, audio.channels);
    }
    println!("Subtitles: {:?}", analysis.subtitle_streams);
    println!();
    for line in plan_lines(&analysis, &plan, config.defaults.container) {
        println!("{}", line);
    }
}

/// Routing decisions for `probe`, as printed lines
fn plan_lines(
    analysis: &engine::MediaFileAnalysis,
    plan: &engine::EncodePlan,
    container: engine::Container,
) -> Vec<String> {
    let mut lines = vec![
        format!("Copy: {:?}", plan.streams_to_copy()),
        format!("Downmix to stereo: {:?}", plan.downmix_audio),
    ];
    if !plan.dropped_audio.is_empty() {
        lines.push(format!(
            "Dropped (5.1 alongside other audio): {:?}",
            plan.dropped_audio
        ));
    }

    let kept = engine::subtitles_for(container, analysis, plan);
    let dropped_subs: Vec<u32> = plan
        .subtitles
        .iter()
        .copied()
        .filter(|i| !kept.contains(i))
        .collect();
    if !dropped_subs.is_empty() {
        lines.push(format!(
            "Dropped (bitmap subtitles, {} holds text only): {:?}",
            container, dropped_subs
        ));
    }
    lines
}

fn encoder_report(
    runner: &dyn engine::ProcessRunner,
) -> Result<Vec<(BackendKind, Vec<&'static str>)>> {
    let encoders = engine::available_encoders(runner).context("Failed to list ffmpeg encoders")?;
    let codecs = [
        engine::VideoCodec::Hevc,
        engine::VideoCodec::H264,
        engine::VideoCodec::Av1,
    ];

    Ok(BackendKind::ALL
        .into_iter()
        .map(|kind| {
            let found = codecs
                .iter()
                .map(|&codec| engine::encoder_name(kind, codec))
                .filter(|name| encoders.iter().any(|e| e == name))
                .collect();
            (kind, found)
        })
        .collect())
}

fn handle_check_ffmpeg() {
    let runner = engine::SystemRunner::new().with_timeout(Some(engine::hardware::PROBE_TIMEOUT));

    match engine::ffmpeg_version(&runner) {
        Ok(version) => println!("ffmpeg found: {}", version),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
    match engine::ffprobe_version(&runner) {
        Ok(version) => println!("ffprobe found: {}", version),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }

    match encoder_report(&runner) {
        Ok(report) => {
            println!();
            for (kind, found) in report {
                if found.is_empty() {
                    println!("{}: no encoders", kind.display_name());
                } else {
                    println!("{}: {}", kind.display_name(), found.join(", "));
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn handle_init_config(force: bool) {
    let path = match Config::config_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to replace it with the defaults");
        return;
    }

    if let Err(e) = Config::default().save_to(&path) {
        eprintln!("Failed to save default config: {:#}", e);
        process::exit(1);
    }
    println!("Default config saved to {}", path.display());
}
