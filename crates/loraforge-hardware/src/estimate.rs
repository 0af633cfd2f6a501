//! Heuristic training memory estimation.
//!
//! These numbers are order-of-magnitude approximations, not exact
//! hardware accounting: they exist to pick a batch size that will not
//! immediately OOM, and the 15% safety margin in `optimal_batch_size`
//! absorbs the slack.

use loraforge_training::{ModelFamily, Precision};
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

/// Largest batch size the scan in `optimal_batch_size` will consider.
const MAX_BATCH_SIZE: u32 = 32;

/// Fraction of available VRAM the estimate is allowed to fill.
const SAFETY_MARGIN: f64 = 0.85;

/// Approximate base-model parameter count per family.
fn param_count(family: ModelFamily) -> u64 {
    match family {
        ModelFamily::Flux => 12_000_000_000,
        ModelFamily::Sdxl => 3_500_000_000,
    }
}

/// Layers whose activations are held for the backward pass.
fn layer_count(family: ModelFamily) -> u64 {
    match family {
        ModelFamily::Flux => 57,
        ModelFamily::Sdxl => 70,
    }
}

/// Hidden width used to size the adapter parameter estimate.
fn hidden_dim(family: ModelFamily) -> u64 {
    match family {
        ModelFamily::Flux => 3072,
        ModelFamily::Sdxl => 1280,
    }
}

/// Gradient checkpointing recomputes most activations instead of
/// storing them; roughly 30% survive in practice.
const CHECKPOINT_RETENTION: f64 = 0.3;

/// Adam keeps two fp32 moments per trained parameter.
const OPTIMIZER_BYTES_PER_PARAM: u64 = 8;

/// Estimated memory footprint of one training configuration, in MB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRequirement {
    pub model_mb: u64,
    pub activation_mb: u64,
    pub gradient_mb: u64,
    pub optimizer_mb: u64,
    pub total_mb: u64,
}

/// LoRA parameter count for a given rank: two rank-projection matrices
/// per adapted layer.
fn adapter_param_count(family: ModelFamily, rank: u32) -> u64 {
    u64::from(rank) * 2 * hidden_dim(family) * layer_count(family)
}

/// Estimates the training memory footprint for one configuration.
///
/// `adapter_only` is the LoRA case: gradients and optimizer state are
/// sized for the adapter, not the frozen base model.
#[must_use]
#[allow(clippy::fn_params_excessive_bools)]
pub fn estimate_memory(
    family: ModelFamily,
    batch_size: u32,
    resolution: u32,
    precision: Precision,
    rank: u32,
    gradient_checkpointing: bool,
    adapter_only: bool,
) -> MemoryRequirement {
    let bytes = precision.bytes_per_param();

    let model_mb = param_count(family) * bytes / MB;

    let trained_params = if adapter_only {
        adapter_param_count(family, rank)
    } else {
        param_count(family)
    };
    let gradient_mb = trained_params * bytes / MB;
    let optimizer_mb = trained_params * OPTIMIZER_BYTES_PER_PARAM / MB;

    let stored_layers = if gradient_checkpointing {
        (layer_count(family) as f64 * CHECKPOINT_RETENTION).ceil() as u64
    } else {
        layer_count(family)
    };
    let activation_mb =
        u64::from(batch_size) * u64::from(resolution) * u64::from(resolution) * 3 * stored_layers
            * bytes
            / MB;

    MemoryRequirement {
        model_mb,
        activation_mb,
        gradient_mb,
        optimizer_mb,
        total_mb: model_mb + activation_mb + gradient_mb + optimizer_mb,
    }
}

/// Largest batch size in `1..=32` whose estimated footprint fits in
/// `available_mb` with the safety margin applied.
///
/// A linear scan is fine here: the estimate is monotone in batch size,
/// so the first size that overflows ends the search.
#[must_use]
pub fn optimal_batch_size(
    family: ModelFamily,
    available_mb: u64,
    resolution: u32,
    precision: Precision,
    rank: u32,
    gradient_checkpointing: bool,
) -> u32 {
    let budget = (available_mb as f64 * SAFETY_MARGIN) as u64;
    let mut best = 1;
    for batch in 1..=MAX_BATCH_SIZE {
        let estimate = estimate_memory(
            family,
            batch,
            resolution,
            precision,
            rank,
            gradient_checkpointing,
            true,
        );
        if estimate.total_mb > budget {
            break;
        }
        best = batch;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_is_sum_of_components() {
        let req = estimate_memory(ModelFamily::Flux, 2, 1024, Precision::Bf16, 32, true, true);
        assert_eq!(
            req.total_mb,
            req.model_mb + req.activation_mb + req.gradient_mb + req.optimizer_mb
        );
    }

    #[test]
    fn test_memory_monotone_in_batch_size() {
        let mut previous = 0;
        for batch in 1..=8 {
            let req =
                estimate_memory(ModelFamily::Sdxl, batch, 1024, Precision::Fp16, 32, false, true);
            assert!(req.total_mb >= previous);
            previous = req.total_mb;
        }
    }

    #[test]
    fn test_checkpointing_shrinks_activations_only() {
        let off = estimate_memory(ModelFamily::Flux, 4, 1024, Precision::Bf16, 32, false, true);
        let on = estimate_memory(ModelFamily::Flux, 4, 1024, Precision::Bf16, 32, true, true);
        assert!(on.activation_mb < off.activation_mb);
        assert_eq!(on.model_mb, off.model_mb);
        assert_eq!(on.gradient_mb, off.gradient_mb);
    }

    #[test]
    fn test_adapter_only_is_much_cheaper_than_full() {
        let adapter = estimate_memory(ModelFamily::Flux, 1, 512, Precision::Bf16, 32, true, true);
        let full = estimate_memory(ModelFamily::Flux, 1, 512, Precision::Bf16, 32, true, false);
        assert!(adapter.gradient_mb < full.gradient_mb / 10);
        assert!(adapter.optimizer_mb < full.optimizer_mb / 10);
    }

    #[test]
    fn test_fp32_doubles_model_memory() {
        let half = estimate_memory(ModelFamily::Sdxl, 1, 512, Precision::Fp16, 16, true, true);
        let full = estimate_memory(ModelFamily::Sdxl, 1, 512, Precision::Fp32, 16, true, true);
        // Truncating to whole MB can leave the two sides 1MB apart.
        assert!(full.model_mb.abs_diff(half.model_mb * 2) <= 1);
    }

    #[test]
    fn test_optimal_batch_nondecreasing_in_available_memory() {
        let mut previous = 0;
        for available in [8_000, 12_000, 16_000, 24_000, 48_000, 96_000] {
            let batch =
                optimal_batch_size(ModelFamily::Sdxl, available, 1024, Precision::Fp16, 32, true);
            assert!(batch >= previous, "batch shrank as memory grew");
            previous = batch;
        }
    }

    #[test]
    fn test_optimal_batch_nonincreasing_in_resolution() {
        let mut previous = u32::MAX;
        for resolution in [512, 768, 1024, 1536, 2048] {
            let batch =
                optimal_batch_size(ModelFamily::Sdxl, 24_000, resolution, Precision::Fp16, 32, true);
            assert!(batch <= previous, "batch grew as resolution grew");
            previous = batch;
        }
    }

    #[test]
    fn test_optimal_batch_floor_is_one() {
        // Tiny budget: nothing fits, but the floor is still batch 1.
        let batch = optimal_batch_size(ModelFamily::Flux, 100, 2048, Precision::Fp32, 128, false);
        assert_eq!(batch, 1);
    }
}
