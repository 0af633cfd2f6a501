use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Supported base-model architectures.
///
/// Each family maps to a different external training script and a
/// different flag vocabulary (see `command`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Flux,
    Sdxl,
}

impl ModelFamily {
    /// The external training script invoked for this family.
    #[must_use]
    pub fn script_name(&self) -> &'static str {
        match self {
            Self::Flux => "flux_train_network.py",
            Self::Sdxl => "sdxl_train_network.py",
        }
    }

    /// The adapter network module the script should load.
    #[must_use]
    pub fn network_module(&self) -> &'static str {
        match self {
            Self::Flux => "networks.lora_flux",
            Self::Sdxl => "networks.lora",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flux => write!(f, "flux"),
            Self::Sdxl => write!(f, "sdxl"),
        }
    }
}

/// Numeric precision used for training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Fp16,
    Bf16,
    Fp32,
}

impl Precision {
    #[must_use]
    pub fn bytes_per_param(&self) -> u64 {
        match self {
            Self::Fp16 | Self::Bf16 => 2,
            Self::Fp32 => 4,
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fp16 => write!(f, "fp16"),
            Self::Bf16 => write!(f, "bf16"),
            Self::Fp32 => write!(f, "fp32"),
        }
    }
}

/// One LoRA training intent, supplied by the UI layer.
///
/// The core never mutates a config in place: resource-driven overrides
/// (`with_batch_size` and friends) produce a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub family: ModelFamily,

    /// Base checkpoint to attach the adapter to. Required.
    pub base_model_path: PathBuf,
    /// CLIP-L text encoder (flux only; the script falls back to a default).
    pub clip_l_path: Option<PathBuf>,
    /// T5-XXL text encoder (flux only; the script falls back to a default).
    pub t5xxl_path: Option<PathBuf>,

    /// Directory of captioned training images. Required.
    pub dataset_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_name: String,

    /// Either a single size (`"1024"`) or an explicit `"W,H"` pair.
    pub resolution: Option<String>,

    pub learning_rate: f64,
    pub batch_size: u32,
    pub epochs: u32,
    pub network_dim: u32,
    pub network_alpha: u32,

    pub optimizer: String,
    pub lr_scheduler: String,
    pub lr_warmup_steps: u32,

    pub precision: Precision,
    pub gradient_checkpointing: bool,
    pub memory_efficient_attention: bool,
    pub gradient_accumulation_steps: u32,
    /// Family-specific low-memory path (fp8 base weights + block-selective
    /// training for flux, lowram for sdxl).
    pub low_vram_mode: bool,

    pub cache_latents: bool,
    pub cache_latents_to_disk: bool,
    /// Cache text-encoder outputs (sdxl only).
    pub cache_text_encoder_outputs: bool,
    /// Resolution bucketing (sdxl only).
    pub enable_bucket: bool,
    pub bucket_reso_steps: u32,
    pub bucket_no_upscale: bool,

    pub sample_prompts: Vec<String>,
    /// Path the UI materialized the sample prompts to, if any.
    pub sample_prompt_file: Option<PathBuf>,
    /// Generate preview samples every N epochs (0 disables sampling).
    pub sample_every_n_epochs: u32,
    pub save_every_n_epochs: u32,

    pub logging_dir: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl TrainingConfig {
    /// A config with sensible defaults for the given family; the caller
    /// still has to fill in the required paths before it validates.
    #[must_use]
    pub fn new(family: ModelFamily) -> Self {
        Self {
            family,
            base_model_path: PathBuf::new(),
            clip_l_path: None,
            t5xxl_path: None,
            dataset_path: PathBuf::new(),
            output_dir: PathBuf::new(),
            output_name: String::new(),
            resolution: None,
            learning_rate: 1e-4,
            batch_size: 1,
            epochs: 10,
            network_dim: 32,
            network_alpha: 16,
            optimizer: "adamw8bit".to_string(),
            lr_scheduler: "cosine".to_string(),
            lr_warmup_steps: 0,
            precision: Precision::Bf16,
            gradient_checkpointing: true,
            memory_efficient_attention: true,
            gradient_accumulation_steps: 1,
            low_vram_mode: false,
            cache_latents: true,
            cache_latents_to_disk: false,
            cache_text_encoder_outputs: false,
            enable_bucket: false,
            bucket_reso_steps: 64,
            bucket_no_upscale: false,
            sample_prompts: default_sample_prompts(family),
            sample_prompt_file: None,
            sample_every_n_epochs: 1,
            save_every_n_epochs: 1,
            logging_dir: None,
            seed: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    #[must_use]
    pub fn with_gradient_accumulation_steps(mut self, steps: u32) -> Self {
        self.gradient_accumulation_steps = steps;
        self
    }
}

/// Fixed per-family preview prompts, used when the user supplies none.
#[must_use]
pub fn default_sample_prompts(family: ModelFamily) -> Vec<String> {
    match family {
        ModelFamily::Flux => vec![
            "a photo of a person, professional portrait, studio lighting".to_string(),
            "a landscape painting, golden hour, detailed".to_string(),
        ],
        ModelFamily::Sdxl => vec![
            "masterpiece, best quality, portrait of a person".to_string(),
            "masterpiece, best quality, scenic landscape, sunset".to_string(),
        ],
    }
}

/// Total optimizer steps for a run: `ceil(images / batch) * epochs`.
///
/// Estimation only; the external script owns the authoritative count.
#[must_use]
pub fn calculate_total_steps(config: &TrainingConfig, dataset_image_count: u64) -> u64 {
    let batch = u64::from(config.batch_size.max(1));
    dataset_image_count.div_ceil(batch) * u64::from(config.epochs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_steps_rounds_partial_batches_up() {
        let config = TrainingConfig::new(ModelFamily::Flux).with_batch_size(4);
        // 10 images / batch 4 = 3 steps per epoch, 10 epochs
        assert_eq!(calculate_total_steps(&config, 10), 30);
    }

    #[test]
    fn test_total_steps_exact_batches() {
        let mut config = TrainingConfig::new(ModelFamily::Sdxl).with_batch_size(2);
        config.epochs = 5;
        assert_eq!(calculate_total_steps(&config, 8), 20);
    }

    #[test]
    fn test_default_prompts_differ_per_family() {
        assert_ne!(
            default_sample_prompts(ModelFamily::Flux),
            default_sample_prompts(ModelFamily::Sdxl)
        );
        assert!(!default_sample_prompts(ModelFamily::Flux).is_empty());
    }

    #[test]
    fn test_with_batch_size_leaves_original_untouched() {
        let base = TrainingConfig::new(ModelFamily::Flux);
        let tuned = base.clone().with_batch_size(8);
        assert_eq!(base.batch_size, 1);
        assert_eq!(tuned.batch_size, 8);
    }
}
