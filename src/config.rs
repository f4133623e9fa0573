//! Decoder Configuration
//!
//! Hyperparameters for the attention LSTM decoder, plus the execution
//! [`Device`]. Everything the decoder needs is passed in through this value;
//! nothing is read from ambient global state.
//!
//! ## Example
//!
//! ```rust
//! use scrivener::{DecoderConfig, Device};
//!
//! let mut config = DecoderConfig::tiny(100);
//! config.device = Device::CpuParallel;
//! config.validate().unwrap();
//! ```

use crate::error::{CaptionError, Result};
use serde::{Deserialize, Serialize};

/// Reserved index of the start token.
pub const START_TOKEN: usize = 0;
/// Reserved index of the end token.
pub const END_TOKEN: usize = 1;
/// Default cap on greedy caption length.
pub const DEFAULT_MAX_SENTENCE: usize = 20;

/// Where batch entries are computed
///
/// Batch entries never interact, so both variants produce identical results;
/// `CpuParallel` hands independent entries to Rayon workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// Process batch entries one after another on the calling thread
    #[default]
    Cpu,
    /// Dispatch batch entries across the Rayon thread pool
    CpuParallel,
}

impl Device {
    pub fn is_parallel(self) -> bool {
        matches!(self, Device::CpuParallel)
    }
}

/// How a self-fed token is chosen from the previous step's logits during
/// scheduled sampling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackPolicy {
    /// Arg-max of the temperature-scaled log-probabilities
    #[default]
    TopOne,
    /// Draw from the temperature-scaled distribution
    Sample,
}

/// Decoder configuration
///
/// # Fields
///
/// - `num_features`: size of each FeatureMap slot vector (feature_dim)
/// - `embedding_dim`: word embedding width
/// - `hidden_dim`: LSTM state width, also the attention projection width
/// - `vocab_size`: number of entries in the vocabulary (index 0 = start, 1 = end)
/// - `dropout_rate`: dropout applied to `h` after every training step
/// - `sample_prob`: chance that a step after the first feeds back the
///   model's own prediction instead of the ground truth
/// - `sample_temp`: temperature applied to logits before picking the fed-back token
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub num_features: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub vocab_size: usize,
    pub dropout_rate: f32,
    pub sample_prob: f32,
    pub sample_temp: f32,
    pub feedback: FeedbackPolicy,
    pub max_sentence: usize,
    pub device: Device,
    /// Fail with `NumericInstability` when logits contain NaN/inf
    pub check_numerics: bool,
    /// Seed for weight initialization
    pub seed: u64,
}

impl DecoderConfig {
    /// Create a config with the given dimensions and default training knobs
    pub fn new(
        num_features: usize,
        embedding_dim: usize,
        hidden_dim: usize,
        vocab_size: usize,
    ) -> Self {
        Self {
            num_features,
            embedding_dim,
            hidden_dim,
            vocab_size,
            dropout_rate: 0.5,
            sample_prob: 0.5,
            sample_temp: 0.5,
            feedback: FeedbackPolicy::TopOne,
            max_sentence: DEFAULT_MAX_SENTENCE,
            device: Device::Cpu,
            check_numerics: false,
            seed: 42,
        }
    }

    /// Create a tiny config for tests and quick experiments
    ///
    /// 16-d features, 8-d embeddings, 16 hidden units.
    pub fn tiny(vocab_size: usize) -> Self {
        Self::new(16, 8, 16, vocab_size)
    }

    /// The classic show-attend-tell sizes over a ResNet-style 2048-d feature grid
    pub fn show_attend_tell(vocab_size: usize) -> Self {
        Self::new(2048, 256, 512, vocab_size)
    }

    /// Check every dimension and rate
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("num_features", self.num_features),
            ("embedding_dim", self.embedding_dim),
            ("hidden_dim", self.hidden_dim),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(CaptionError::Configuration(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        if self.vocab_size <= END_TOKEN {
            return Err(CaptionError::Configuration(format!(
                "vocab_size {} leaves no room for the start and end tokens",
                self.vocab_size
            )));
        }
        if !(0.0..=1.0).contains(&self.dropout_rate) {
            return Err(CaptionError::Configuration(format!(
                "dropout_rate {} must be within [0, 1]",
                self.dropout_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.sample_prob) {
            return Err(CaptionError::Configuration(format!(
                "sample_prob {} must be within [0, 1]",
                self.sample_prob
            )));
        }
        if !(self.sample_temp > 0.0 && self.sample_temp.is_finite()) {
            return Err(CaptionError::Configuration(format!(
                "sample_temp {} must be a positive finite number",
                self.sample_temp
            )));
        }
        if self.max_sentence == 0 {
            return Err(CaptionError::Configuration(
                "max_sentence must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
