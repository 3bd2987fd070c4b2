// Conversion engine - independent of the CLI

pub mod analysis;
pub mod core;
pub mod hardware;
pub mod probe;
pub mod process;
pub mod router;
pub mod selector;
pub mod worker;

pub use analysis::{AudioStream, Complexity, ComplexityThresholds, MediaFileAnalysis};
pub use self::core::*;
pub use hardware::{BackendCapability, BackendKind, CpuInfo, CpuVendor, GpuHint, HardwareProfile};
pub use probe::{FfprobeProbe, MediaProbe, ProbeError, StreamMetadata};
pub use process::{CommandLine, ProcessOutput, ProcessRunner, SystemRunner};
pub use router::{EncodePlan, route};
pub use selector::{BackendOverride, EncoderChoice, select_encoder};
pub use worker::{WorkerMessage, run_batch};
