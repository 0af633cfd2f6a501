//! Best-effort GPU detection.
//!
//! Probes are tried in order and the first hit wins; every failure is
//! absorbed into `None` so callers can fall back to conservative manual
//! defaults. The result is cached for the process lifetime and
//! concurrent callers coalesce onto a single in-flight probe.

use crate::profile::{GpuVendor, HardwareProfile};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Known GPU name patterns and their VRAM sizes in GB.
///
/// Versioned data, not logic: extend this table for new cards instead
/// of touching the probe code. Patterns are matched case-insensitively
/// in order, so more specific names come first.
const GPU_VRAM_TABLE: &[(&str, u32)] = &[
    ("rtx 5090", 32),
    ("rtx 5080", 16),
    ("rtx 4090", 24),
    ("rtx 4080", 16),
    ("rtx 4070 ti", 12),
    ("rtx 4070", 12),
    ("rtx 4060 ti", 16),
    ("rtx 4060", 8),
    ("rtx 3090", 24),
    ("rtx 3080 ti", 12),
    ("rtx 3080", 10),
    ("rtx 3070", 8),
    ("rtx 3060 ti", 8),
    ("rtx 3060", 12),
    ("rtx 2080 ti", 11),
    ("rtx 2080", 8),
    ("rtx 2070", 8),
    ("rtx 2060", 6),
    ("gtx 1660", 6),
    ("gtx 1080 ti", 11),
    ("gtx 1080", 8),
    ("gtx 1070", 8),
    ("gtx 1060", 6),
    ("rx 7900 xtx", 24),
    ("rx 7900 xt", 20),
    ("rx 7800 xt", 16),
    ("rx 7700 xt", 12),
    ("rx 7600", 8),
    ("rx 6900 xt", 16),
    ("rx 6800", 16),
    ("rx 6700 xt", 12),
    ("a100", 40),
    ("h100", 80),
    ("l40", 48),
    ("a6000", 48),
];

/// Conservative guess when a GPU name matches nothing in the table.
const FALLBACK_VRAM_GB: u32 = 8;

/// VRAM size for a GPU marketing name, from the static table.
#[must_use]
pub fn vram_for_name(name: &str) -> u32 {
    let name = name.to_lowercase();
    GPU_VRAM_TABLE
        .iter()
        .find(|(pattern, _)| name.contains(pattern))
        .map_or(FALLBACK_VRAM_GB, |(_, vram)| *vram)
}

/// NVIDIA architecture name from a compute capability string.
fn architecture_for_compute_capability(capability: &str) -> Option<&'static str> {
    let major: u32 = capability.split('.').next()?.parse().ok()?;
    match major {
        6 => Some("pascal"),
        7 => Some("turing"),
        8 if capability.starts_with("8.9") => Some("ada"),
        8 => Some("ampere"),
        9 => Some("hopper"),
        10 | 12 => Some("blackwell"),
        _ => None,
    }
}

/// Parses one `nvidia-smi --query-gpu=name,memory.total,compute_cap` CSV line.
fn parse_nvidia_smi_line(line: &str) -> Option<HardwareProfile> {
    let mut fields = line.split(',').map(str::trim);
    let name = fields.next()?;
    if name.is_empty() {
        return None;
    }

    // memory.total is reported as e.g. "24576 MiB".
    let vram_gb = fields
        .next()
        .and_then(|field| field.split_whitespace().next())
        .and_then(|mib| mib.parse::<u64>().ok())
        .map(|mib| ((mib + 512) / 1024) as u32)
        .filter(|gb| *gb > 0)
        .unwrap_or_else(|| vram_for_name(name));

    let compute_capability = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
    let architecture = compute_capability
        .as_deref()
        .and_then(architecture_for_compute_capability)
        .map(str::to_string);

    Some(HardwareProfile { vendor: GpuVendor::Nvidia, vram_gb, architecture, compute_capability })
}

/// Host GPU prober with a process-lifetime cache.
pub struct HardwareDetector {
    /// Outer `None`: not probed yet. Inner `None`: probed, nothing found.
    cache: Mutex<Option<Option<HardwareProfile>>>,
}

impl Default for HardwareDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HardwareDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareDetector").finish_non_exhaustive()
    }
}

impl HardwareDetector {
    #[must_use]
    pub fn new() -> Self {
        Self { cache: Mutex::new(None) }
    }

    /// Returns the cached profile, probing on first call.
    ///
    /// Never fails: probe errors yield `None`, which callers treat as
    /// "no usable GPU, use conservative manual defaults". Holding the
    /// cache lock across the probe is what coalesces racing callers.
    ///
    /// # Returns
    /// Returns the normalized GPU profile, or `None` when no probe
    /// succeeded.
    pub async fn detect(&self) -> Option<HardwareProfile> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }
        let detected = probe().await;
        match &detected {
            Some(profile) => info!(
                vendor = %profile.vendor,
                vram_gb = profile.vram_gb,
                architecture = ?profile.architecture,
                "Detected GPU"
            ),
            None => info!("No GPU detected; using conservative defaults"),
        }
        *cache = Some(detected.clone());
        detected
    }

    /// Drops the cache and probes again.
    ///
    /// # Returns
    /// Returns the freshly probed profile, or `None` when no probe
    /// succeeded.
    pub async fn refresh(&self) -> Option<HardwareProfile> {
        {
            let mut cache = self.cache.lock().await;
            *cache = None;
        }
        self.detect().await
    }
}

/// Runs the probe chain; first success wins.
async fn probe() -> Option<HardwareProfile> {
    if let Some(profile) = probe_nvidia_smi().await {
        return Some(profile);
    }
    if let Some(profile) = probe_apple_silicon().await {
        return Some(profile);
    }
    if let Some(profile) = probe_amd_sysfs().await {
        return Some(profile);
    }
    None
}

async fn probe_nvidia_smi() -> Option<HardwareProfile> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name,memory.total,compute_cap", "--format=csv,noheader"])
        .output()
        .await;
    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(status = ?output.status, "nvidia-smi exited non-zero");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "nvidia-smi unavailable");
            return None;
        }
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout.lines().find_map(parse_nvidia_smi_line)
}

async fn probe_apple_silicon() -> Option<HardwareProfile> {
    if std::env::consts::OS != "macos" || std::env::consts::ARCH != "aarch64" {
        return None;
    }
    // Unified memory: treat total RAM as the usable pool.
    let output = Command::new("sysctl").args(["-n", "hw.memsize"]).output().await.ok()?;
    let bytes: u64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
    let vram_gb = (bytes / (1024 * 1024 * 1024)) as u32;
    let mut profile = HardwareProfile::new(GpuVendor::Apple, vram_gb.max(8));
    profile.architecture = Some("apple-silicon".to_string());
    Some(profile)
}

async fn probe_amd_sysfs() -> Option<HardwareProfile> {
    let contents =
        tokio::fs::read_to_string("/sys/class/drm/card0/device/mem_info_vram_total").await;
    match contents {
        Ok(contents) => {
            let bytes: u64 = contents.trim().parse().ok()?;
            let vram_gb = (bytes / (1024 * 1024 * 1024)) as u32;
            if vram_gb == 0 {
                return None;
            }
            Some(HardwareProfile::new(GpuVendor::Amd, vram_gb))
        }
        Err(e) => {
            debug!(error = %e, "AMD sysfs probe unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vram_lookup_known_names() {
        assert_eq!(vram_for_name("NVIDIA GeForce RTX 4090"), 24);
        assert_eq!(vram_for_name("AMD Radeon RX 7900 XTX"), 24);
        assert_eq!(vram_for_name("NVIDIA GeForce RTX 3060"), 12);
    }

    #[test]
    fn test_vram_lookup_prefers_specific_pattern() {
        // "rtx 4070 ti" must not fall through to "rtx 4070" first.
        assert_eq!(vram_for_name("RTX 4070 Ti SUPER"), 12);
        assert_eq!(vram_for_name("RTX 3080 Ti"), 12);
        assert_eq!(vram_for_name("RTX 3080"), 10);
    }

    #[test]
    fn test_vram_lookup_falls_back_conservatively() {
        assert_eq!(vram_for_name("Totally Unknown GPU 9000"), FALLBACK_VRAM_GB);
    }

    #[test]
    fn test_parse_nvidia_smi_line() {
        let profile =
            parse_nvidia_smi_line("NVIDIA GeForce RTX 4090, 24564 MiB, 8.9").expect("parses");
        assert_eq!(profile.vendor, GpuVendor::Nvidia);
        assert_eq!(profile.vram_gb, 24);
        assert_eq!(profile.architecture.as_deref(), Some("ada"));
        assert_eq!(profile.compute_capability.as_deref(), Some("8.9"));
    }

    #[test]
    fn test_parse_nvidia_smi_line_without_memory_uses_table() {
        let profile = parse_nvidia_smi_line("NVIDIA GeForce RTX 3070, , ").expect("parses");
        assert_eq!(profile.vram_gb, 8);
        assert!(profile.compute_capability.is_none());
    }

    #[test]
    fn test_parse_rejects_empty_line() {
        assert!(parse_nvidia_smi_line("").is_none());
        assert!(parse_nvidia_smi_line(" , , ").is_none());
    }

    #[test]
    fn test_architecture_mapping() {
        assert_eq!(architecture_for_compute_capability("8.9"), Some("ada"));
        assert_eq!(architecture_for_compute_capability("8.6"), Some("ampere"));
        assert_eq!(architecture_for_compute_capability("9.0"), Some("hopper"));
        assert_eq!(architecture_for_compute_capability("6.1"), Some("pascal"));
        assert_eq!(architecture_for_compute_capability("nonsense"), None);
    }

    #[tokio::test]
    async fn test_detect_is_memoized() {
        let detector = HardwareDetector::new();
        let first = detector.detect().await;
        let second = detector.detect().await;
        // Whatever the host has, repeated calls agree without re-probing.
        assert_eq!(first, second);
    }
}
