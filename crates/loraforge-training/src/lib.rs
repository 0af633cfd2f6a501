//! LoRAForge Training
//!
//! Backend-agnostic LoRA training primitives for:
//! - Describing a training intent (`TrainingConfig`)
//! - Pre-flight validation (`validate` / `ValidationReport`)
//! - Compiling a config into an argument list for an external
//!   training script (`compile` / `TrainingCommand`)

pub mod command;
pub mod config;
pub mod error;
pub mod validate;

pub use command::{compile, TrainingCommand};
pub use config::{
    calculate_total_steps, default_sample_prompts, ModelFamily, Precision, TrainingConfig,
};
pub use error::{TrainingError, TrainingResult};
pub use validate::{validate, ValidationReport};
