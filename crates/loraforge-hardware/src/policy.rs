//! Tiered VRAM optimization policy.
//!
//! The tier table is the authoritative mapping from detected VRAM to
//! training parameters; the UI-facing presets in `VramPreset` mirror it
//! so both paths hand out identical settings.

use crate::profile::{GpuVendor, HardwareProfile};
use loraforge_training::{Precision, TrainingConfig};
use serde::{Deserialize, Serialize};

/// Bump when `MODERN_ARCHITECTURES` changes; lets downstream tooling
/// detect stale policy data.
pub const GPU_GENERATION_TABLE_VERSION: u32 = 1;

/// Architecture substrings considered "modern" enough for bf16.
/// Matched case-insensitively against `HardwareProfile::architecture`.
const MODERN_ARCHITECTURES: &[(GpuVendor, &str)] = &[
    (GpuVendor::Nvidia, "ampere"),
    (GpuVendor::Nvidia, "ada"),
    (GpuVendor::Nvidia, "hopper"),
    (GpuVendor::Nvidia, "blackwell"),
    (GpuVendor::Amd, "rdna3"),
    (GpuVendor::Amd, "rdna4"),
];

/// Resource-driven parameter suggestions for one hardware profile.
///
/// Non-authoritative: the UI may override any field before a run is
/// started, and nothing here is persisted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VramOptimizations {
    pub batch_size: u32,
    pub gradient_checkpointing: bool,
    pub precision: Precision,
    pub low_vram_mode: bool,
    pub cpu_offload: bool,
    pub gradient_accumulation_steps: u32,
    pub max_resolution: u32,
    pub memory_efficient_attention: bool,
}

fn is_modern_gpu(profile: &HardwareProfile) -> bool {
    let Some(architecture) = &profile.architecture else {
        return false;
    };
    let architecture = architecture.to_lowercase();
    MODERN_ARCHITECTURES
        .iter()
        .any(|(vendor, pattern)| *vendor == profile.vendor && architecture.contains(pattern))
}

/// Maps a hardware profile to the tiered optimization table.
///
/// Pure and total: identical input always yields identical output, and
/// every VRAM size lands in exactly one tier.
#[must_use]
pub fn vram_optimizations(profile: &HardwareProfile) -> VramOptimizations {
    let nvidia = profile.vendor == GpuVendor::Nvidia;
    match profile.vram_gb {
        vram if vram >= 16 => VramOptimizations {
            batch_size: 4,
            gradient_checkpointing: false,
            precision: if nvidia { Precision::Bf16 } else { Precision::Fp16 },
            low_vram_mode: false,
            cpu_offload: false,
            gradient_accumulation_steps: 1,
            max_resolution: 1024,
            memory_efficient_attention: true,
        },
        vram if vram >= 8 => VramOptimizations {
            batch_size: 2,
            gradient_checkpointing: true,
            precision: if nvidia && is_modern_gpu(profile) {
                Precision::Bf16
            } else {
                Precision::Fp16
            },
            low_vram_mode: false,
            cpu_offload: false,
            gradient_accumulation_steps: 2,
            max_resolution: 768,
            memory_efficient_attention: true,
        },
        vram if vram >= 4 => VramOptimizations {
            batch_size: 1,
            gradient_checkpointing: true,
            precision: Precision::Fp16,
            low_vram_mode: true,
            cpu_offload: true,
            gradient_accumulation_steps: 4,
            max_resolution: 512,
            memory_efficient_attention: true,
        },
        _ => VramOptimizations {
            batch_size: 1,
            gradient_checkpointing: true,
            precision: Precision::Fp16,
            low_vram_mode: true,
            cpu_offload: true,
            gradient_accumulation_steps: 8,
            max_resolution: 512,
            memory_efficient_attention: true,
        },
    }
}

/// Applies a suggestion record to a config, producing a new config.
///
/// The resolution is only tightened, never raised above what the user
/// asked for.
#[must_use]
pub fn apply_optimizations(
    config: &TrainingConfig,
    optimizations: &VramOptimizations,
) -> TrainingConfig {
    let mut tuned = config.clone();
    tuned.batch_size = optimizations.batch_size;
    tuned.precision = optimizations.precision;
    tuned.gradient_checkpointing = optimizations.gradient_checkpointing;
    tuned.memory_efficient_attention = optimizations.memory_efficient_attention;
    tuned.gradient_accumulation_steps = optimizations.gradient_accumulation_steps;
    tuned.low_vram_mode = optimizations.low_vram_mode;

    let cap = optimizations.max_resolution;
    let capped = match &config.resolution {
        Some(resolution) => {
            let clamped: Vec<String> = resolution
                .split(',')
                .map(|part| match part.trim().parse::<u32>() {
                    Ok(size) => size.min(cap).to_string(),
                    Err(_) => part.trim().to_string(),
                })
                .collect();
            clamped.join(",")
        }
        None => cap.to_string(),
    };
    tuned.resolution = Some(capped);
    tuned
}

/// Named preset tiers exposed to the UI preset picker.
///
/// These mirror `vram_optimizations` exactly; the detector-driven path
/// is the source of truth and the presets are derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VramPreset {
    High,
    Medium,
    Low,
    Minimal,
}

impl VramPreset {
    /// Preset tier for a manually entered VRAM size.
    #[must_use]
    pub fn for_gb(vram_gb: u32) -> Self {
        match vram_gb {
            vram if vram >= 16 => Self::High,
            vram if vram >= 8 => Self::Medium,
            vram if vram >= 4 => Self::Low,
            _ => Self::Minimal,
        }
    }

    /// The optimization record for this preset, assuming an unknown GPU
    /// (so the conservative precision branch applies).
    #[must_use]
    pub fn optimizations(&self) -> VramOptimizations {
        let representative_gb = match self {
            Self::High => 24,
            Self::Medium => 12,
            Self::Low => 6,
            Self::Minimal => 2,
        };
        vram_optimizations(&HardwareProfile::new(GpuVendor::Unknown, representative_gb))
    }
}
