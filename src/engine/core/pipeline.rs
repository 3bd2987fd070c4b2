//! Per-file conversion: probe, route, stage, downmix, encode with fallback,
//! finalize.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ffmpeg_cmd::{
    Container, EncodeSettings, backend_supports_codec, build_downmix_cmd, build_encode_cmd,
    downmix_output_path, subtitles_for,
};
use super::log::RunLog;
use super::staging::{StagingArea, finalize, remove_if_exists, staged_output_path};
use super::types::{FailureStage, FileJob, FileOutcome};
use crate::engine::analysis::{ComplexityThresholds, MediaFileAnalysis};
use crate::engine::hardware::{BackendKind, HardwareProfile};
use crate::engine::probe::{MediaProbe, ProbeError};
use crate::engine::process::{CommandLine, ProcessRunner};
use crate::engine::router::{EncodePlan, route};
use crate::engine::selector::EncoderChoice;

/// stderr lines kept in error messages; the run log gets all of it
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("could not prepare staging for {path}: {source}")]
    Staging {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("downmix of audio stream {stream} failed ({status}): {detail}")]
    Downmix {
        stream: u32,
        status: String,
        detail: String,
    },

    #[error("encode failed after {attempts} attempt(s): {last_error}")]
    Encode { attempts: u32, last_error: String },

    #[error("could not move output to {path}: {source}")]
    Finalize {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Probe(_) => FailureStage::Probe,
            Self::Staging { .. } => FailureStage::Staging,
            Self::Downmix { .. } => FailureStage::Downmix,
            Self::Encode { .. } => FailureStage::Encode,
            Self::Finalize { .. } => FailureStage::Finalize,
        }
    }
}

// ============================================================================
// Fallback state machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    Attempting(BackendKind),
    Success(BackendKind),
    Failed,
}

/// Tracks encode attempts for one file. The fallback is tried at most once,
/// and never when it is the backend that just failed.
#[derive(Debug, Clone)]
pub struct FallbackMachine {
    choice: EncoderChoice,
    tried: Vec<BackendKind>,
    state: EncodeState,
}

impl FallbackMachine {
    pub fn new(choice: EncoderChoice) -> Self {
        Self {
            choice,
            tried: Vec::new(),
            state: EncodeState::Attempting(choice.primary),
        }
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    /// Attempts finished so far, successful or not
    pub fn attempts(&self) -> u32 {
        self.tried.len() as u32
    }

    pub fn on_success(&mut self) -> EncodeState {
        if let EncodeState::Attempting(backend) = self.state {
            self.tried.push(backend);
            self.state = EncodeState::Success(backend);
        }
        self.state
    }

    pub fn on_failure(&mut self) -> EncodeState {
        if let EncodeState::Attempting(backend) = self.state {
            self.tried.push(backend);
            self.state = match self.choice.fallback {
                Some(next) if next != backend && !self.tried.contains(&next) => {
                    EncodeState::Attempting(next)
                }
                _ => EncodeState::Failed,
            };
        }
        self.state
    }

    /// Give up without trying the fallback (cancellation)
    pub fn abort(&mut self) -> EncodeState {
        if let EncodeState::Attempting(backend) = self.state {
            self.tried.push(backend);
            self.state = EncodeState::Failed;
        }
        self.state
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub settings: EncodeSettings,
    pub thresholds: ComplexityThresholds,
    /// Remove the input once its replacement is in place
    pub replace_original: bool,
    /// Print the plan and commands without running anything
    pub dry_run: bool,
}

/// Everything decided about a file before any encode runs
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub analysis: MediaFileAnalysis,
    pub plan: EncodePlan,
    pub downmix_cmds: Vec<CommandLine>,
    pub encode_cmd: CommandLine,
}

pub struct ConversionPipeline<'a> {
    runner: &'a dyn ProcessRunner,
    probe: &'a dyn MediaProbe,
    profile: &'a HardwareProfile,
    choice: EncoderChoice,
    staging: &'a StagingArea,
    log: &'a RunLog,
    options: PipelineOptions,
}

struct EncodeSuccess {
    backend: BackendKind,
    attempts: u32,
}

impl<'a> ConversionPipeline<'a> {
    pub fn new(
        runner: &'a dyn ProcessRunner,
        probe: &'a dyn MediaProbe,
        profile: &'a HardwareProfile,
        choice: EncoderChoice,
        staging: &'a StagingArea,
        log: &'a RunLog,
    ) -> Self {
        Self {
            runner,
            probe,
            profile,
            choice,
            staging,
            log,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn choice(&self) -> EncoderChoice {
        self.choice
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run one file to a terminal outcome. Never panics on tool failures;
    /// every error becomes `FileOutcome::Failed`.
    pub fn process_file(&self, job: &FileJob) -> FileOutcome {
        if self.options.dry_run {
            return match self.plan_file(job) {
                Ok(plan) => {
                    print_plan(job, &plan);
                    FileOutcome::Skipped {
                        reason: "dry run".to_string(),
                    }
                }
                Err(e) => self.failed(job, e),
            };
        }

        match self.convert(job) {
            Ok(done) => {
                tracing::info!(
                    file = %job.display_name(),
                    backend = %done.backend,
                    attempts = done.attempts,
                    "converted"
                );
                self.log.note(&format!(
                    "✓ Success: {} -> {} ({})",
                    job.input_path.display(),
                    job.output_path.display(),
                    done.backend
                ));
                FileOutcome::Converted {
                    backend: done.backend,
                    attempts: done.attempts,
                    output_path: job.output_path.clone(),
                }
            }
            Err(e) => self.failed(job, e),
        }
    }

    fn failed(&self, job: &FileJob, error: PipelineError) -> FileOutcome {
        let stage = error.stage();
        tracing::warn!(file = %job.display_name(), %stage, error = %error, "conversion failed");
        self.log.note(&format!(
            "✗ Failed ({}): {}: {}",
            stage,
            job.input_path.display(),
            error
        ));
        FileOutcome::Failed {
            stage,
            error: error.to_string(),
        }
    }

    fn analyze(&self, path: &Path) -> Result<(MediaFileAnalysis, EncodePlan), PipelineError> {
        let meta = self.probe.inspect(path)?;
        let analysis = MediaFileAnalysis::from_metadata(&meta, &self.options.thresholds);
        let plan = route(&analysis);

        tracing::debug!(
            file = %path.display(),
            codec = %analysis.video_codec,
            resolution = %analysis.resolution(),
            bit_depth = analysis.bit_depth,
            complexity = %analysis.complexity,
            "analyzed"
        );
        if !plan.has_audio() {
            tracing::info!(file = %path.display(), "no audio streams, encoding video only");
        }
        if !plan.dropped_audio.is_empty() {
            tracing::info!(
                file = %path.display(),
                dropped = ?plan.dropped_audio,
                "dropping 5.1 tracks, a non-surround track is present"
            );
        }

        if self.options.settings.container == Container::Mp4 {
            let kept = subtitles_for(Container::Mp4, &analysis, &plan);
            if kept.len() < plan.subtitles.len() {
                let dropped: Vec<u32> = plan
                    .subtitles
                    .iter()
                    .copied()
                    .filter(|i| !kept.contains(i))
                    .collect();
                tracing::info!(
                    file = %path.display(),
                    ?dropped,
                    "dropping bitmap subtitles, MP4 only holds text subtitles"
                );
            }
        }

        Ok((analysis, plan))
    }

    /// Probe and route a file and build the commands the primary backend
    /// would run, without touching the filesystem
    pub fn plan_file(&self, job: &FileJob) -> Result<FilePlan, PipelineError> {
        let (analysis, plan) = self.analyze(&job.input_path)?;
        let dir = job.output_path.parent().unwrap_or_else(|| Path::new("."));
        let stem = file_stem(&job.input_path);
        let tag = job.id.simple().to_string();
        let ext = self.options.settings.container.extension();

        let downmixed: Vec<PathBuf> = plan
            .downmix_audio
            .iter()
            .map(|&idx| downmix_output_path(dir, &stem, &tag, idx))
            .collect();
        let downmix_cmds = plan
            .downmix_audio
            .iter()
            .zip(&downmixed)
            .map(|(&idx, out)| {
                build_downmix_cmd(
                    &job.input_path,
                    idx,
                    out,
                    self.options.settings.audio_bitrate_kbps,
                )
            })
            .collect();

        let backend = self.choice.primary;
        let encode_cmd = build_encode_cmd(
            &job.input_path,
            &staged_output_path(dir, &stem, &job.id, ext),
            &analysis,
            &plan,
            &downmixed,
            backend,
            self.profile.capability(backend),
            &self.options.settings,
        );

        Ok(FilePlan {
            analysis,
            plan,
            downmix_cmds,
            encode_cmd,
        })
    }

    fn convert(&self, job: &FileJob) -> Result<EncodeSuccess, PipelineError> {
        let (analysis, plan) = self.analyze(&job.input_path)?;

        let staging_err = |path: &Path, source: io::Error| PipelineError::Staging {
            path: path.display().to_string(),
            source,
        };

        let input_size = fs::metadata(&job.input_path)
            .map_err(|e| staging_err(&job.input_path, e))?
            .len();
        let output_dir = job
            .output_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        fs::create_dir_all(&output_dir).map_err(|e| staging_err(&output_dir, e))?;

        let slot = self.staging.reserve(input_size, &output_dir);
        tracing::debug!(dir = %slot.dir().display(), fast = slot.is_fast(), "staging");

        let stem = file_stem(&job.input_path);
        let tag = job.id.simple().to_string();
        let staged = staged_output_path(
            slot.dir(),
            &stem,
            &job.id,
            self.options.settings.container.extension(),
        );

        // Removed on every exit, unwinding included; a finalized file has
        // already been moved away
        let _scratch = ScratchFiles(
            plan.downmix_audio
                .iter()
                .map(|&idx| downmix_output_path(slot.dir(), &stem, &tag, idx))
                .chain(std::iter::once(staged.clone()))
                .collect(),
        );

        // Downmixed tracks are produced once and shared by every attempt
        let downmixed = self.downmix(job, &plan, slot.dir(), &stem, &tag)?;
        let done = self.encode_with_fallback(job, &analysis, &plan, &downmixed, &staged)?;

        finalize(&staged, &job.output_path).map_err(|source| PipelineError::Finalize {
            path: job.output_path.display().to_string(),
            source,
        })?;

        if self.options.replace_original && job.input_path != job.output_path {
            if let Err(e) = fs::remove_file(&job.input_path) {
                tracing::warn!(
                    file = %job.input_path.display(),
                    error = %e,
                    "converted, but the original could not be removed"
                );
            }
        }

        Ok(done)
    }

    fn downmix(
        &self,
        job: &FileJob,
        plan: &EncodePlan,
        dir: &Path,
        stem: &str,
        tag: &str,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let mut produced: Vec<PathBuf> = Vec::new();

        for &stream in &plan.downmix_audio {
            let out = downmix_output_path(dir, stem, tag, stream);
            let cmd = build_downmix_cmd(
                &job.input_path,
                stream,
                &out,
                self.options.settings.audio_bitrate_kbps,
            );
            tracing::info!(file = %job.display_name(), stream, "downmixing 5.1 to stereo");
            self.log.note(&format!("=== Downmix stream {} ===\n{}", stream, cmd));

            let failure = match self.runner.run(&cmd) {
                Ok(output) if output.success() && is_nonempty(&out) => None,
                Ok(output) => {
                    self.log
                        .note(&format!("Downmix stderr:\n{}", output.stderr));
                    Some((
                        output.describe_status(),
                        output.stderr_tail(STDERR_TAIL_LINES),
                    ))
                }
                Err(e) => Some(("not started".to_string(), e.to_string())),
            };

            if let Some((status, detail)) = failure {
                remove_if_exists(&out);
                for track in &produced {
                    remove_if_exists(track);
                }
                return Err(PipelineError::Downmix {
                    stream,
                    status,
                    detail,
                });
            }
            produced.push(out);
        }

        Ok(produced)
    }

    fn encode_with_fallback(
        &self,
        job: &FileJob,
        analysis: &MediaFileAnalysis,
        plan: &EncodePlan,
        downmixed: &[PathBuf],
        staged: &Path,
    ) -> Result<EncodeSuccess, PipelineError> {
        let settings = &self.options.settings;
        let mut machine = FallbackMachine::new(self.choice);
        let mut last_error = String::from("no encode attempted");

        while let EncodeState::Attempting(backend) = machine.state() {
            let capability = self.profile.capability(backend);

            if !backend_supports_codec(capability, settings.codec) {
                last_error = format!("{} cannot encode {}", backend, settings.codec);
                tracing::warn!(file = %job.display_name(), %backend, "{}", last_error);
                machine.on_failure();
                continue;
            }

            let cmd = build_encode_cmd(
                &job.input_path,
                staged,
                analysis,
                plan,
                downmixed,
                backend,
                capability,
                settings,
            );
            let attempt = machine.attempts() + 1;
            tracing::info!(file = %job.display_name(), %backend, attempt, "encoding");
            self.log
                .note(&format!("=== Attempt {} ({}) ===\n{}", attempt, backend, cmd));

            match self.runner.run(&cmd) {
                Ok(output) if output.success() && is_nonempty(staged) => {
                    machine.on_success();
                }
                Ok(output) => {
                    last_error = if output.success() {
                        "ffmpeg exited cleanly but produced no output".to_string()
                    } else {
                        format!(
                            "{} {}: {}",
                            backend,
                            output.describe_status(),
                            output.stderr_tail(STDERR_TAIL_LINES)
                        )
                    };
                    self.log.note(&format!(
                        "[{}] encode failed ({})\nFFmpeg stderr:\n{}",
                        backend,
                        output.describe_status(),
                        output.stderr
                    ));
                    remove_if_exists(staged);

                    if output.interrupted {
                        machine.abort();
                    } else if let EncodeState::Attempting(next) = machine.on_failure() {
                        tracing::warn!(
                            file = %job.display_name(),
                            failed = %backend,
                            retry = %next,
                            "encode failed, retrying with fallback"
                        );
                        self.log
                            .note(&format!("[fallback] {} failed; retrying with {}", backend, next));
                    }
                }
                Err(e) => {
                    last_error = format!("{}: could not start ffmpeg: {}", backend, e);
                    remove_if_exists(staged);
                    machine.on_failure();
                }
            }
        }

        match machine.state() {
            EncodeState::Success(backend) => Ok(EncodeSuccess {
                backend,
                attempts: machine.attempts(),
            }),
            _ => Err(PipelineError::Encode {
                attempts: machine.attempts(),
                last_error,
            }),
        }
    }
}

/// Staging paths owned by one conversion
struct ScratchFiles(Vec<PathBuf>);

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            remove_if_exists(path);
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

fn is_nonempty(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

fn print_plan(job: &FileJob, plan: &FilePlan) {
    println!("{}", job.input_path.display());
    println!(
        "  video: {} {} {}-bit, complexity {}",
        if plan.analysis.video_codec.is_empty() {
            "unknown"
        } else {
            plan.analysis.video_codec.as_str()
        },
        plan.analysis.resolution(),
        plan.analysis.bit_depth,
        plan.analysis.complexity
    );
    println!(
        "  audio: copy {:?}, downmix {:?}, drop {:?}",
        plan.plan.copy_audio, plan.plan.downmix_audio, plan.plan.dropped_audio
    );
    for cmd in &plan.downmix_cmds {
        println!("  $ {}", cmd);
    }
    println!("  $ {}", plan.encode_cmd);
    println!("  -> {}", job.output_path.display());
}
