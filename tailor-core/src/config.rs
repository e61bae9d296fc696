use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level Tailor configuration, matching `tailor.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailorConfig {
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub encoding: EncodingSection,
    #[serde(default)]
    pub split: SplitSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub training: TrainingSection,
}

impl TailorConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let split = &self.split;
        if !(split.train_ratio > 0.0 && split.train_ratio < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "split.train_ratio must be in (0, 1), got {}",
                split.train_ratio
            )));
        }
        if split.validation_ratio < 0.0 || split.train_ratio + split.validation_ratio >= 1.0 {
            return Err(ConfigError::Invalid(
                "split.train_ratio + split.validation_ratio must leave room for a test split"
                    .to_string(),
            ));
        }
        let training = &self.training;
        if training.batch_size == 0 {
            return Err(ConfigError::Invalid("training.batch_size must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&training.threshold) {
            return Err(ConfigError::Invalid(format!(
                "training.threshold must be in [0, 1], got {}",
                training.threshold
            )));
        }
        if training.validate_every == 0 {
            return Err(ConfigError::Invalid(
                "training.validate_every must be > 0".to_string(),
            ));
        }
        if training.hidden_dim == 0 {
            return Err(ConfigError::Invalid("training.hidden_dim must be > 0".to_string()));
        }
        if self.embedding.dim == 0 || self.embedding.window == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dim and embedding.window must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    /// Globs (relative to the source root) to extract; empty means all files.
    pub include_patterns: Vec<String>,
    /// Globs (relative to the source root) skipped during extraction.
    pub exclude_patterns: Vec<String>,
    /// Re-extract from source when a cached bundle fails to load.
    pub allow_reextract: bool,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: vec![
                "**/.git/**".into(),
                "**/build/**".into(),
                "**/target/**".into(),
            ],
            allow_reextract: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingSection {
    /// Directory holding `clone_labels.txt` / `code_smell_labels.csv`.
    pub label_dir: Option<PathBuf>,
}

/// What happens to the final, short batch of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LastBatch {
    /// Keep it unpadded: `ceil(n / batch_size)` batches.
    #[default]
    Keep,
    /// Drop it: `floor(n / batch_size)` batches.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSection {
    pub train_ratio: f64,
    pub validation_ratio: f64,
    pub seed: u64,
    /// Clone task: keep train and test function sets disjoint.
    pub generalization: bool,
    pub last_batch: LastBatch,
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            train_ratio: 0.8,
            validation_ratio: 0.1,
            seed: 2022,
            generalization: true,
            last_batch: LastBatch::Keep,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub dim: usize,
    /// Context window on each side of the center node.
    pub window: usize,
    pub negatives: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            dim: 32,
            window: 2,
            negatives: 3,
            epochs: 3,
            learning_rate: 0.025,
            seed: 2022,
        }
    }
}

/// Where the run's embedding table (and possibly model) comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PretrainMode {
    /// Train a fresh embedding table from the encoded corpus.
    #[default]
    Init,
    /// Load a stored embedding table.
    LoadEmbedding,
    /// Load the stored table, then the stored checkpoint for further tuning.
    LoadModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct TrainingSection {
    pub epochs: usize,
    pub batch_size: usize,
    /// Width of the graph encoder's hidden layer.
    pub hidden_dim: usize,
    pub learning_rate: f32,
    /// Zero-based epoch after which the learning rate drops.
    pub decay_epoch: usize,
    pub decay_factor: f32,
    /// Decision threshold: `score >= threshold` is positive.
    pub threshold: f32,
    /// Validate every N epochs.
    pub validate_every: usize,
    pub save_model: bool,
    pub fine_tune_embedding: bool,
    /// Run supervised training, validation and testing.
    pub supervised: bool,
    pub skip_single_class_batches: bool,
    pub pretrain: PretrainMode,
    pub seed: u64,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            hidden_dim: 32,
            learning_rate: 0.1,
            decay_epoch: 10,
            decay_factor: 0.1,
            threshold: 0.5,
            validate_every: 1,
            save_model: false,
            fine_tune_embedding: false,
            supervised: true,
            skip_single_class_batches: true,
            pretrain: PretrainMode::Init,
            seed: 2022,
        }
    }
}

impl TrainingSection {
    /// Piecewise-constant schedule: one drop after `decay_epoch`.
    pub fn learning_rate_for(&self, epoch: usize) -> f32 {
        if epoch > self.decay_epoch {
            self.learning_rate * self.decay_factor
        } else {
            self.learning_rate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TailorConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_partial_toml() {
        let config: TailorConfig = toml::from_str(
            "[training]\nepochs = 3\npretrain = \"load-embedding\"\n\n\
             [split]\ntrain_ratio = 0.7\nvalidation_ratio = 0.15\nlast_batch = \"drop\"\n",
        )
        .unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.pretrain, PretrainMode::LoadEmbedding);
        assert_eq!(config.split.last_batch, LastBatch::Drop);
        assert!(config.split.generalization);
        assert!(config.extraction.allow_reextract);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_ratios_without_test_split() {
        let mut config = TailorConfig::default();
        config.split.train_ratio = 0.9;
        config.split.validation_ratio = 0.1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn learning_rate_steps_down_once() {
        let training = TrainingSection::default();
        assert!((training.learning_rate_for(0) - 0.1).abs() < 1e-6);
        assert!((training.learning_rate_for(10) - 0.1).abs() < 1e-6);
        assert!((training.learning_rate_for(11) - 0.01).abs() < 1e-6);
        assert!((training.learning_rate_for(50) - 0.01).abs() < 1e-6);
    }
}
