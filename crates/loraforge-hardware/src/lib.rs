//! LoRAForge Hardware
//!
//! Best-effort host introspection and resource-aware parameter tuning:
//! - Probing the GPU into a normalized `HardwareProfile` (`detect`)
//! - Heuristic training memory estimation (`estimate`)
//! - The tiered VRAM optimization policy (`policy`)

pub mod detect;
pub mod error;
pub mod estimate;
pub mod policy;
pub mod profile;

pub use detect::HardwareDetector;
pub use error::{HardwareError, HardwareResult};
pub use estimate::{estimate_memory, optimal_batch_size, MemoryRequirement};
pub use policy::{apply_optimizations, vram_optimizations, VramOptimizations, VramPreset};
pub use profile::{GpuVendor, HardwareProfile};
