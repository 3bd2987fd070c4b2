//! Host hardware detection: CPU, GPUs and per-backend encode capabilities

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::process::{CommandLine, ProcessRunner, SystemRunner};

/// Timeout for detection subprocesses (vainfo, lspci, test encodes)
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default directory holding DRM render nodes
pub const DRI_DIR: &str = "/dev/dri";

// ============================================================================
// CPU
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CpuVendor {
    Amd,
    Intel,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub vendor: CpuVendor,
    pub cores: usize,
}

impl Default for CpuInfo {
    fn default() -> Self {
        Self {
            vendor: CpuVendor::Unknown,
            cores: 1,
        }
    }
}

/// Map a CPUID vendor string or brand name to a vendor
pub fn classify_cpu_vendor(vendor_id: &str) -> CpuVendor {
    let lower = vendor_id.to_lowercase();
    if lower.contains("genuineintel") || lower.contains("intel") {
        CpuVendor::Intel
    } else if lower.contains("authenticamd") || lower.contains("amd") {
        CpuVendor::Amd
    } else {
        CpuVendor::Unknown
    }
}

/// Read CPU vendor and logical core count. Never fails.
pub fn detect_cpu() -> CpuInfo {
    let mut sys = sysinfo::System::new();
    sys.refresh_cpu();

    let cpus = sys.cpus();
    let vendor = cpus
        .first()
        .map(|cpu| {
            let by_id = classify_cpu_vendor(cpu.vendor_id());
            if by_id == CpuVendor::Unknown {
                classify_cpu_vendor(cpu.brand())
            } else {
                by_id
            }
        })
        .unwrap_or_default();

    CpuInfo {
        vendor,
        cores: cpus.len().max(1),
    }
}

// ============================================================================
// GPU hints
// ============================================================================

/// Coarse GPU classification derived from the PCI device listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GpuHint {
    NvidiaDiscrete,
    AmdDiscrete,
    AmdIntegrated,
    IntelDiscrete,
    IntelIntegrated,
}

impl GpuHint {
    pub fn is_intel(&self) -> bool {
        matches!(self, Self::IntelDiscrete | Self::IntelIntegrated)
    }

    pub fn is_amd(&self) -> bool {
        matches!(self, Self::AmdDiscrete | Self::AmdIntegrated)
    }
}

/// AMD APU graphics families (integrated Radeon)
const AMD_APU_MARKERS: &[&str] = &[
    "renoir",
    "cezanne",
    "barcelo",
    "lucienne",
    "rembrandt",
    "phoenix",
    "hawk point",
    "raphael",
    "mendocino",
    "picasso",
    "raven",
    "van gogh",
    "strix",
];

const INTEL_DISCRETE_MARKERS: &[&str] = &["arc", "dg1", "dg2", "alchemist", "battlemage"];

fn is_display_controller(lower: &str) -> bool {
    lower.contains("vga") || lower.contains("3d controller") || lower.contains("display controller")
}

/// Classify `lspci` output into GPU hints
pub fn classify_gpu_lines(lspci_output: &str) -> BTreeSet<GpuHint> {
    let mut hints = BTreeSet::new();

    for line in lspci_output.lines() {
        let lower = line.to_lowercase();
        if !is_display_controller(&lower) {
            continue;
        }

        // Only the part after the class label names the device
        let device = lower.split_once(": ").map(|(_, d)| d).unwrap_or(&lower);

        if device.contains("nvidia") {
            hints.insert(GpuHint::NvidiaDiscrete);
        } else if device.contains("advanced micro devices")
            || device.contains("amd")
            || device.contains("ati ")
            || device.contains("radeon")
        {
            if AMD_APU_MARKERS.iter().any(|m| device.contains(m)) {
                hints.insert(GpuHint::AmdIntegrated);
            } else {
                hints.insert(GpuHint::AmdDiscrete);
            }
        } else if device.contains("intel") {
            let discrete = INTEL_DISCRETE_MARKERS.iter().any(|m| {
                device
                    .split(|c: char| !c.is_ascii_alphanumeric())
                    .any(|word| word == *m)
            });
            if discrete {
                hints.insert(GpuHint::IntelDiscrete);
            } else {
                hints.insert(GpuHint::IntelIntegrated);
            }
        }
    }

    hints
}

// ============================================================================
// Backends
// ============================================================================

/// The four encode paths, in fixed candidate order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Nvenc,
    Qsv,
    Vaapi,
    Software,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [Self::Nvenc, Self::Qsv, Self::Vaapi, Self::Software];

    pub const HARDWARE: [BackendKind; 3] = [Self::Nvenc, Self::Qsv, Self::Vaapi];

    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Software)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Nvenc => "NVENC (NVIDIA)",
            Self::Qsv => "Quick Sync (Intel)",
            Self::Vaapi => "VA-API",
            Self::Software => "Software (CPU)",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nvenc => "nvenc",
            Self::Qsv => "qsv",
            Self::Vaapi => "vaapi",
            Self::Software => "software",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapability {
    pub available: bool,
    pub supports_ten_bit: bool,
    /// AV1 encode support
    pub supports_next_gen_codec: bool,
    /// Render node, only meaningful for VAAPI
    pub device_handle: Option<String>,
}

impl BackendCapability {
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// The software path: always there, 10-bit and AV1 capable
    pub fn software() -> Self {
        Self {
            available: true,
            supports_ten_bit: true,
            supports_next_gen_codec: true,
            device_handle: None,
        }
    }
}

/// Everything detection learned about the host. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    cpu: CpuInfo,
    gpus: BTreeSet<GpuHint>,
    backends: BTreeMap<BackendKind, BackendCapability>,
}

impl HardwareProfile {
    /// Build a profile. Missing backends are recorded as unavailable and the
    /// software backend is always forced present and available.
    pub fn new(
        cpu: CpuInfo,
        gpus: BTreeSet<GpuHint>,
        mut backends: BTreeMap<BackendKind, BackendCapability>,
    ) -> Self {
        for kind in BackendKind::HARDWARE {
            backends.entry(kind).or_insert_with(BackendCapability::unavailable);
        }
        let software = backends
            .entry(BackendKind::Software)
            .or_insert_with(BackendCapability::software);
        software.available = true;

        Self {
            cpu,
            gpus,
            backends,
        }
    }

    /// A host with nothing but the CPU encoder
    pub fn software_only(cpu: CpuInfo) -> Self {
        Self::new(cpu, BTreeSet::new(), BTreeMap::new())
    }

    pub fn cpu(&self) -> CpuInfo {
        self.cpu
    }

    pub fn gpus(&self) -> &BTreeSet<GpuHint> {
        &self.gpus
    }

    pub fn capability(&self, kind: BackendKind) -> &BackendCapability {
        // new() inserts every kind, so the map lookup cannot miss
        static UNAVAILABLE: BackendCapability = BackendCapability {
            available: false,
            supports_ten_bit: false,
            supports_next_gen_codec: false,
            device_handle: None,
        };
        self.backends.get(&kind).unwrap_or(&UNAVAILABLE)
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.capability(kind).available
    }

    pub fn available_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.is_available(*k))
            .collect()
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Probes the host through a `ProcessRunner`
pub struct HardwareDetector<'a> {
    runner: &'a dyn ProcessRunner,
    dri_dir: PathBuf,
    ffmpeg: String,
}

impl<'a> HardwareDetector<'a> {
    pub fn new(runner: &'a dyn ProcessRunner) -> Self {
        Self {
            runner,
            dri_dir: PathBuf::from(DRI_DIR),
            ffmpeg: "ffmpeg".to_string(),
        }
    }

    /// Look for render nodes somewhere other than /dev/dri (tests)
    pub fn with_dri_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dri_dir = dir.into();
        self
    }

    /// Run every probe and assemble the profile
    pub fn detect(&self, cpu: CpuInfo) -> HardwareProfile {
        let gpus = self.detect_gpus();
        tracing::info!(?cpu, ?gpus, "detected host hardware");

        let mut backends = BTreeMap::new();
        for kind in BackendKind::HARDWARE {
            let capability = if backend_gated_in(kind, &gpus) {
                self.probe_backend(kind)
            } else {
                tracing::debug!(backend = %kind, "no matching GPU, skipping probe");
                BackendCapability::unavailable()
            };
            tracing::info!(
                backend = %kind,
                available = capability.available,
                ten_bit = capability.supports_ten_bit,
                av1 = capability.supports_next_gen_codec,
                device = capability.device_handle.as_deref().unwrap_or("-"),
                "backend probe finished"
            );
            backends.insert(kind, capability);
        }
        backends.insert(BackendKind::Software, BackendCapability::software());

        HardwareProfile::new(cpu, gpus, backends)
    }

    /// Enumerate GPU-like PCI devices. Missing lspci yields an empty set.
    pub fn detect_gpus(&self) -> BTreeSet<GpuHint> {
        let cmd = CommandLine::new("lspci");
        match self.runner.run(&cmd) {
            Ok(output) if output.success() => classify_gpu_lines(&output.stdout),
            Ok(output) => {
                tracing::debug!(status = %output.describe_status(), "lspci failed");
                BTreeSet::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "lspci unavailable");
                BTreeSet::new()
            }
        }
    }

    pub fn probe_backend(&self, kind: BackendKind) -> BackendCapability {
        match kind {
            BackendKind::Vaapi => self.probe_vaapi(),
            BackendKind::Nvenc | BackendKind::Qsv => self.probe_by_test_encode(kind),
            BackendKind::Software => BackendCapability::software(),
        }
    }

    /// Render nodes, sorted so renderD128 comes before renderD129
    pub fn render_devices(&self) -> Vec<PathBuf> {
        list_render_devices(&self.dri_dir)
    }

    fn probe_vaapi(&self) -> BackendCapability {
        for device in self.render_devices() {
            let device_str = device.to_string_lossy().to_string();
            let mut cmd = CommandLine::new("vainfo");
            cmd.args(["--display", "drm", "--device"]).arg(&device_str);

            let output = match self.runner.run(&cmd) {
                Ok(output) if output.success() => output,
                Ok(output) => {
                    tracing::debug!(device = %device_str, status = %output.describe_status(), "vainfo failed");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "vainfo unavailable");
                    return BackendCapability::unavailable();
                }
            };

            let caps = parse_vainfo(&output.stdout);
            if caps.hevc_encode {
                return BackendCapability {
                    available: true,
                    supports_ten_bit: caps.hevc_main10_encode,
                    supports_next_gen_codec: caps.av1_encode,
                    device_handle: Some(device_str),
                };
            }
            tracing::debug!(device = %device_str, "render node has no HEVC encode entrypoint");
        }

        BackendCapability::unavailable()
    }

    fn probe_by_test_encode(&self, kind: BackendKind) -> BackendCapability {
        let available = self.test_encode(kind, TestEncode::Hevc);
        if !available {
            return BackendCapability::unavailable();
        }

        BackendCapability {
            available,
            supports_ten_bit: self.test_encode(kind, TestEncode::HevcMain10),
            supports_next_gen_codec: self.test_encode(kind, TestEncode::Av1),
            device_handle: None,
        }
    }

    fn test_encode(&self, kind: BackendKind, test: TestEncode) -> bool {
        let cmd = build_test_encode_cmd(&self.ffmpeg, kind, test);
        match self.runner.run(&cmd) {
            Ok(output) => {
                let ok = output.success();
                tracing::debug!(backend = %kind, ?test, ok, "test encode");
                ok
            }
            Err(e) => {
                tracing::debug!(backend = %kind, ?test, error = %e, "test encode could not start");
                false
            }
        }
    }
}

/// Whether the detected GPUs make it worth probing a backend at all
fn backend_gated_in(kind: BackendKind, gpus: &BTreeSet<GpuHint>) -> bool {
    match kind {
        BackendKind::Nvenc => gpus.contains(&GpuHint::NvidiaDiscrete),
        BackendKind::Qsv => gpus.iter().any(GpuHint::is_intel),
        BackendKind::Vaapi => gpus.iter().any(|g| g.is_intel() || g.is_amd()),
        BackendKind::Software => true,
    }
}

pub fn list_render_devices(dri_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dri_dir) else {
        return Vec::new();
    };

    let mut devices: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("renderD"))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();

    devices.sort();
    devices
}

/// Encode entrypoints found in `vainfo` output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VainfoCaps {
    pub hevc_encode: bool,
    pub hevc_main10_encode: bool,
    pub av1_encode: bool,
}

pub fn parse_vainfo(output: &str) -> VainfoCaps {
    let mut caps = VainfoCaps::default();

    for line in output.lines() {
        let line = line.trim();
        if !line.contains("VAEntrypointEncSlice") {
            continue;
        }
        let profile = line.split(':').next().unwrap_or("").trim();
        match profile {
            "VAProfileHEVCMain" => caps.hevc_encode = true,
            "VAProfileHEVCMain10" => caps.hevc_main10_encode = true,
            "VAProfileAV1Profile0" => caps.av1_encode = true,
            _ => {}
        }
    }

    caps
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestEncode {
    Hevc,
    HevcMain10,
    Av1,
}

/// One-frame synthetic encode used to confirm an encoder actually initializes
pub fn build_test_encode_cmd(ffmpeg: &str, kind: BackendKind, test: TestEncode) -> CommandLine {
    let mut cmd = CommandLine::new(ffmpeg);
    cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error"]);

    if kind == BackendKind::Qsv {
        cmd.args(["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"]);
    }

    cmd.args(["-f", "lavfi", "-i", "color=black:s=256x256:d=0.1", "-frames:v", "1"]);

    let encoder = match (kind, test) {
        (BackendKind::Nvenc, TestEncode::Av1) => "av1_nvenc",
        (BackendKind::Nvenc, _) => "hevc_nvenc",
        (BackendKind::Qsv, TestEncode::Av1) => "av1_qsv",
        (BackendKind::Qsv, _) => "hevc_qsv",
        (BackendKind::Vaapi, TestEncode::Av1) => "av1_vaapi",
        (BackendKind::Vaapi, _) => "hevc_vaapi",
        (BackendKind::Software, TestEncode::Av1) => "libsvtav1",
        (BackendKind::Software, _) => "libx265",
    };

    let ten_bit = test == TestEncode::HevcMain10;
    let pix_fmt = if ten_bit { "p010le" } else { "nv12" };

    if kind == BackendKind::Qsv {
        cmd.arg("-vf")
            .arg(format!("format={},hwupload=extra_hw_frames=16", pix_fmt));
    } else {
        cmd.args(["-pix_fmt", pix_fmt]);
    }

    cmd.args(["-c:v", encoder]);
    if ten_bit {
        cmd.args(["-profile:v", "main10"]);
    }
    cmd.args(["-f", "null", "-"]);
    cmd
}

/// Process-wide profile, detected on first use with the system runner
pub fn host_profile() -> &'static HardwareProfile {
    static HOST_PROFILE: OnceLock<HardwareProfile> = OnceLock::new();
    HOST_PROFILE.get_or_init(|| {
        let runner = SystemRunner::new().with_timeout(Some(PROBE_TIMEOUT));
        HardwareDetector::new(&runner).detect(detect_cpu())
    })
}
