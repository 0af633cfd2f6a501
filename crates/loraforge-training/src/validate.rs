//! Pre-flight validation for training configs.
//!
//! Errors block compilation; warnings are advisory and surfaced to the
//! UI alongside them.

use crate::config::{ModelFamily, TrainingConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(,\d+)?$").expect("resolution regex is valid"));

/// Outcome of validating one config. Derived fresh on every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Validates a config against the rules the external scripts expect.
#[must_use]
pub fn validate(config: &TrainingConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.base_model_path.as_os_str().is_empty() {
        report.error("base model path is required");
    }
    if config.dataset_path.as_os_str().is_empty() {
        report.error("dataset path is required");
    }
    if config.output_dir.as_os_str().is_empty() {
        report.error("output directory is required");
    }
    if config.output_name.trim().is_empty() {
        report.error("output name is required");
    }

    // The flux script falls back to bundled encoders, so these are advisory.
    if config.family == ModelFamily::Flux {
        if config.clip_l_path.is_none() {
            report.warning("no CLIP-L model path set; the script default will be used");
        }
        if config.t5xxl_path.is_none() {
            report.warning("no T5-XXL model path set; the script default will be used");
        }
    }

    if let Some(resolution) = &config.resolution {
        if !RESOLUTION_RE.is_match(resolution) {
            report.error(format!(
                "resolution '{resolution}' must be a single size or 'W,H'"
            ));
        }
    }

    if config.learning_rate <= 0.0 || config.learning_rate > 1e-3 {
        report.warning(format!(
            "learning rate {} is outside the typical range (0, 0.001]",
            config.learning_rate
        ));
    }
    if !(1..=32).contains(&config.batch_size) {
        report.warning(format!(
            "batch size {} is outside the typical range [1, 32]",
            config.batch_size
        ));
    }
    if !(1..=1000).contains(&config.epochs) {
        report.warning(format!(
            "epoch count {} is outside the typical range [1, 1000]",
            config.epochs
        ));
    }
    if !(1..=1024).contains(&config.network_dim) {
        report.warning(format!(
            "network dim {} is outside the typical range [1, 1024]",
            config.network_dim
        ));
    }

    if config.sample_prompts.is_empty() {
        report.warning("no sample prompts configured; preview sampling is disabled");
    }

    tracing::debug!(
        family = %config.family,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Validated training config"
    );
    report
}
