//! Command compilation: turns a validated `TrainingConfig` into the
//! argument list for the family's external training script.
//!
//! Argument order is not significant to the scripts but is kept fixed
//! and deterministic so compiled commands are directly comparable in
//! tests and logs.

use crate::config::{ModelFamily, TrainingConfig};
use crate::error::{TrainingError, TrainingResult};
use crate::validate::validate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A fully compiled invocation of an external training script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingCommand {
    /// Script file name, one of two fixed names selected by family.
    pub script: String,
    /// Ordered argument list, ready to pass to the process launcher.
    pub args: Vec<String>,
    /// Working directory for the spawned process, if any.
    pub working_dir: Option<PathBuf>,
}

/// Appends `--flag value`, skipping the pair entirely when the value is empty.
fn push_arg(args: &mut Vec<String>, flag: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn push_path(args: &mut Vec<String>, flag: &str, path: &Path) {
    push_arg(args, flag, &path.to_string_lossy());
}

fn push_opt_path(args: &mut Vec<String>, flag: &str, path: Option<&PathBuf>) {
    if let Some(path) = path {
        push_path(args, flag, path);
    }
}

/// Appends a bare boolean switch.
fn push_switch(args: &mut Vec<String>, flag: &str, enabled: bool) {
    if enabled {
        args.push(flag.to_string());
    }
}

/// Compiles a config into a `TrainingCommand` for its family's script.
///
/// Refuses to compile while validation errors exist; warnings never block.
pub fn compile(config: &TrainingConfig) -> TrainingResult<TrainingCommand> {
    let report = validate(config);
    if !report.is_valid() {
        return Err(TrainingError::InvalidConfig(report.errors.join("; ")));
    }

    let mut args = Vec::new();

    push_path(&mut args, "--pretrained_model_name_or_path", &config.base_model_path);
    if config.family == ModelFamily::Flux {
        push_opt_path(&mut args, "--clip_l", config.clip_l_path.as_ref());
        push_opt_path(&mut args, "--t5xxl", config.t5xxl_path.as_ref());
    }

    push_path(&mut args, "--train_data_dir", &config.dataset_path);
    push_path(&mut args, "--output_dir", &config.output_dir);
    push_arg(&mut args, "--output_name", &config.output_name);
    // Output format is fixed; the UI offers no alternative.
    push_arg(&mut args, "--save_model_as", "safetensors");

    push_arg(&mut args, "--network_module", config.family.network_module());
    push_arg(&mut args, "--network_dim", &config.network_dim.to_string());
    push_arg(&mut args, "--network_alpha", &config.network_alpha.to_string());

    push_arg(&mut args, "--learning_rate", &config.learning_rate.to_string());
    push_arg(&mut args, "--train_batch_size", &config.batch_size.to_string());
    push_arg(&mut args, "--max_train_epochs", &config.epochs.to_string());

    push_arg(&mut args, "--optimizer_type", &config.optimizer);
    push_arg(&mut args, "--lr_scheduler", &config.lr_scheduler);
    if config.lr_warmup_steps > 0 {
        push_arg(&mut args, "--lr_warmup_steps", &config.lr_warmup_steps.to_string());
    }

    push_arg(&mut args, "--mixed_precision", &config.precision.to_string());
    push_switch(&mut args, "--gradient_checkpointing", config.gradient_checkpointing);
    push_switch(&mut args, "--sdpa", config.memory_efficient_attention);
    if config.gradient_accumulation_steps > 1 {
        push_arg(
            &mut args,
            "--gradient_accumulation_steps",
            &config.gradient_accumulation_steps.to_string(),
        );
    }

    if let Some(resolution) = &config.resolution {
        push_arg(&mut args, "--resolution", resolution);
    }

    push_switch(&mut args, "--cache_latents", config.cache_latents);
    push_switch(&mut args, "--cache_latents_to_disk", config.cache_latents_to_disk);

    match config.family {
        ModelFamily::Flux => {
            if config.low_vram_mode {
                // fp8 base weights plus block-selective adapter training
                // keep the transformer resident on low-memory cards.
                push_switch(&mut args, "--fp8_base", true);
                push_switch(&mut args, "--split_mode", true);
                push_arg(&mut args, "--network_args", "train_blocks=single");
            }
        }
        ModelFamily::Sdxl => {
            push_switch(
                &mut args,
                "--cache_text_encoder_outputs",
                config.cache_text_encoder_outputs,
            );
            push_switch(
                &mut args,
                "--cache_text_encoder_outputs_to_disk",
                config.cache_text_encoder_outputs,
            );
            if config.enable_bucket {
                push_switch(&mut args, "--enable_bucket", true);
                push_arg(&mut args, "--bucket_reso_steps", &config.bucket_reso_steps.to_string());
                push_switch(&mut args, "--bucket_no_upscale", config.bucket_no_upscale);
            }
            push_switch(&mut args, "--lowram", config.low_vram_mode);
        }
    }

    if let Some(prompt_file) = &config.sample_prompt_file {
        push_path(&mut args, "--sample_prompts", prompt_file);
        if config.sample_every_n_epochs > 0 {
            push_arg(
                &mut args,
                "--sample_every_n_epochs",
                &config.sample_every_n_epochs.to_string(),
            );
        }
    }
    if config.save_every_n_epochs > 0 {
        push_arg(&mut args, "--save_every_n_epochs", &config.save_every_n_epochs.to_string());
    }
    push_opt_path(&mut args, "--logging_dir", config.logging_dir.as_ref());
    if let Some(seed) = config.seed {
        push_arg(&mut args, "--seed", &seed.to_string());
    }

    tracing::debug!(
        family = %config.family,
        script = config.family.script_name(),
        arg_count = args.len(),
        "Compiled training command"
    );

    Ok(TrainingCommand {
        script: config.family.script_name().to_string(),
        args,
        working_dir: None,
    })
}
