use serde::{Deserialize, Serialize};

/// GPU vendor, as far as the probes can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Apple,
    Unknown,
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nvidia => write!(f, "nvidia"),
            Self::Amd => write!(f, "amd"),
            Self::Apple => write!(f, "apple"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Normalized description of the host GPU.
///
/// Values are best-effort: `vram_gb` may come from a name-pattern lookup
/// rather than the driver, and the optional fields are filled only when
/// a probe reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub vendor: GpuVendor,
    pub vram_gb: u32,
    /// Marketing/architecture name when known (e.g. "ada", "rdna3").
    pub architecture: Option<String>,
    /// CUDA compute capability for NVIDIA cards (e.g. "8.9").
    pub compute_capability: Option<String>,
}

impl HardwareProfile {
    #[must_use]
    pub fn new(vendor: GpuVendor, vram_gb: u32) -> Self {
        Self { vendor, vram_gb, architecture: None, compute_capability: None }
    }
}
