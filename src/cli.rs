use clap::{ArgGroup, Parser, Subcommand};
use hevcbatch::engine::{BackendOverride, Container, VideoCodec};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hevcbatch", version)]
#[command(
    about = "Batch video converter with hardware encoder detection and software fallback",
    long_about = None
)]
#[command(group(
    ArgGroup::new("backend")
        .args(["gpu", "cpu", "nvenc", "vaapi", "qsv"])
        .multiple(false)
))]
pub struct Cli {
    /// Directory to convert (defaults to current directory)
    #[arg(value_name = "DIRECTORY")]
    pub directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Use the first available hardware encoder (NVENC, QSV, VAAPI)
    #[arg(long)]
    pub gpu: bool,

    /// Force software encoding
    #[arg(long)]
    pub cpu: bool,

    /// Force NVIDIA NVENC
    #[arg(long)]
    pub nvenc: bool,

    /// Force VAAPI
    #[arg(long)]
    pub vaapi: bool,

    /// Force Intel Quick Sync
    #[arg(long)]
    pub qsv: bool,

    /// Replace each original with its converted file
    #[arg(long)]
    pub replace: bool,

    /// Convert files whose output already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Walk subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Output video codec (hevc, h264, av1)
    #[arg(long, value_name = "CODEC")]
    pub codec: Option<VideoCodec>,

    /// Output container (mkv, mp4)
    #[arg(long, value_name = "CONTAINER")]
    pub container: Option<Container>,

    /// Quality value for the selected encoder (CRF, CQ or QP)
    #[arg(long, value_name = "N")]
    pub quality: Option<u32>,

    /// Number of files converted in parallel
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<u32>,

    /// Kill an encode after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Stage outputs next to the final file instead of on the RAM disk
    #[arg(long)]
    pub no_ram_disk: bool,

    /// Print the plan and ffmpeg commands without encoding
    #[arg(long)]
    pub dry_run: bool,

    /// Extra config file applied over the user and directory configs
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Backend override selected by the mutually exclusive flags
    pub fn backend_override(&self) -> Option<BackendOverride> {
        if self.gpu {
            Some(BackendOverride::Gpu)
        } else if self.cpu {
            Some(BackendOverride::Cpu)
        } else if self.nvenc {
            Some(BackendOverride::Nvenc)
        } else if self.vaapi {
            Some(BackendOverride::Vaapi)
        } else if self.qsv {
            Some(BackendOverride::Qsv)
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a directory and show each file's state without converting
    List {
        /// Directory to scan (defaults to current directory)
        directory: Option<PathBuf>,
    },

    /// Show detected hardware, backend scores and the chosen encoder
    Detect,

    /// Analyze one file and show how its streams would be routed
    Probe {
        /// Path to the video file
        file: PathBuf,
    },

    /// Check if ffmpeg and ffprobe are installed and list usable encoders
    CheckFfmpeg,

    /// Write the default config to the user config location
    InitConfig {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}
