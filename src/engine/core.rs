mod ffmpeg_cmd;
mod ffmpeg_info;
mod log;
mod pipeline;
mod scan;
mod staging;
mod types;

pub use ffmpeg_cmd::{
    Container, EncodeSettings, VideoCodec, backend_supports_codec, build_downmix_cmd,
    build_encode_cmd, downmix_output_path, encoder_name, output_is_ten_bit, subtitles_for,
};
pub use ffmpeg_info::{
    available_encoders, ffmpeg_version, ffprobe_version, parse_encoder_list, tool_version,
};
pub use log::{LOG_FILE_NAME, RunLog};
pub use pipeline::{
    ConversionPipeline, EncodeState, FallbackMachine, FilePlan, PipelineError, PipelineOptions,
};
pub use scan::{
    OutputNaming, PARTIAL_MARKER, build_job_from_path, build_job_queue, derive_output_path,
    is_own_output, is_video_file, scan,
};
pub use staging::{
    DEFAULT_RAM_DISK_DIR, StagingArea, StagingSlot, available_space, finalize, remove_if_exists,
    staged_output_path,
};
pub use types::{FailureStage, FileJob, FileOutcome, JobStatus};
