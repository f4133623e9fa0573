//! Attention LSTM Sequence Decoder
//!
//! Turns a FeatureMap into a caption one token at a time. Each step attends
//! over the feature slots with the current hidden state, fuses the context
//! with the previous token's embedding, advances the LSTM cell, and projects
//! the new hidden state to vocabulary logits.
//!
//! ## Step
//!
//! ```text
//! context, weights = attention(features, h)
//! x                = [embed(token) ; context]          [batch, embedding_dim + feature_dim]
//! (h, c)           = lstm(x, (h, c))
//! h                = dropout(h)                        (training only)
//! logits           = fc(h)                             [batch, vocab_size]
//! ```
//!
//! The hidden state starts from the per-example mean of the feature slots,
//! projected once by `init_h` for `h` and once by `init_c` for `c`.
//!
//! ## Training: Scheduled Sampling
//!
//! [`SequenceDecoder::forward`] runs over a ground-truth caption batch. At
//! every step after the first a single coin flip (shared by the whole batch)
//! decides whether the input is the ground-truth token or the model's own
//! choice from the previous step's logits:
//!
//! ```text
//! t = 0                  ground truth
//! t > 0, draw <  p       pick_feedback_token(previous logits / temperature)
//! t > 0, draw >= p       ground truth
//! ```
//!
//! The decision itself is the pure function [`choose_token_source`].
//!
//! ## Inference: Greedy Search
//!
//! [`SequenceDecoder::greedy_search`] starts from the start token and feeds
//! back the arg-max token until it emits the end token or reaches the length
//! cap. Dropout is a pass-through.
//!
//! ## Example
//!
//! ```rust
//! use scrivener::{DecoderConfig, SequenceDecoder, Tensor};
//! use rand::SeedableRng;
//!
//! let decoder = SequenceDecoder::new(DecoderConfig::tiny(10)).unwrap();
//! let features = Tensor::zeros(vec![2, 5, 16]);
//!
//! // Training forward pass over two captions of three tokens each
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let out = decoder.forward(&[vec![0, 4, 5], vec![0, 6, 1]], &features, &mut rng).unwrap();
//! assert_eq!(out.logits.shape, vec![2, 3, 10]);
//! assert_eq!(out.attention_weights.shape, vec![2, 3, 5]);
//!
//! // Greedy captioning of a single example
//! let caption = decoder.greedy_search(&Tensor::zeros(vec![1, 5, 16]), Some(8)).unwrap();
//! assert!(caption.tokens.len() <= 8);
//! ```

use crate::config::{DecoderConfig, Device, FeedbackPolicy, END_TOKEN, START_TOKEN};
use crate::error::{CaptionError, Result};
use crate::layers::{
    validate_feature_map, AttentionScorer, Dropout, Embedding, Linear, LstmCell, LstmState,
};
use crate::tensor::Tensor;
use rand::{Rng, RngCore};
use rayon::prelude::*;

/// Where the input token of a training step comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenSource {
    /// The ground-truth caption token at this position
    GroundTruth,
    /// The model's own choice from the previous step's logits
    Predicted,
}

/// Scheduled-sampling decision for one training step
///
/// Step 0 always uses the ground truth. Later steps use the model's
/// prediction when `draw < sample_prob`, where `draw` is uniform in `[0, 1)`.
pub fn choose_token_source(step: usize, sample_prob: f32, draw: f32) -> TokenSource {
    if step > 0 && draw < sample_prob {
        TokenSource::Predicted
    } else {
        TokenSource::GroundTruth
    }
}

/// Choose the token fed back from one row of logits
///
/// Logits are divided by `temperature` (below 1 sharpens, above 1 flattens)
/// and turned into log-probabilities. `TopOne` takes the arg-max, `Sample`
/// draws from the scaled distribution.
///
/// `logits_row` must not be empty.
pub fn pick_feedback_token<R: Rng + ?Sized>(
    logits_row: &[f32],
    temperature: f32,
    policy: FeedbackPolicy,
    rng: &mut R,
) -> usize {
    assert!(!logits_row.is_empty(), "cannot pick a token from empty logits");
    let scaled = Tensor::new(logits_row.to_vec(), vec![1, logits_row.len()]).div_scalar(temperature);

    match policy {
        FeedbackPolicy::TopOne => scaled.log_softmax_last().argmax_last()[0],
        FeedbackPolicy::Sample => {
            let probs = scaled.softmax_last();
            let draw: f32 = rng.random();
            let mut cumulative = 0.0;
            for (i, &p) in probs.data.iter().enumerate() {
                cumulative += p;
                if draw < cumulative {
                    return i;
                }
            }
            // Rounding left the total just below the draw
            probs.data.len() - 1
        }
    }
}

/// How a single recurrent step treats dropout
pub enum StepMode<'a> {
    /// Dropout active, masks drawn from the given RNG
    Train(&'a mut dyn RngCore),
    /// Dropout is a pass-through
    Inference,
}

/// Result of one recurrent step
#[derive(Clone, Debug)]
pub struct StepOutput {
    /// `[batch, vocab_size]`
    pub logits: Tensor,
    /// `[batch, slots]`
    pub attention_weights: Tensor,
    /// State to pass into the next step
    pub state: LstmState,
}

/// Result of a training forward pass
#[derive(Clone, Debug)]
pub struct DecoderOutput {
    /// `[batch, seq_len, vocab_size]`
    pub logits: Tensor,
    /// `[batch, seq_len, slots]`
    pub attention_weights: Tensor,
    /// Input source used at each step
    pub token_sources: Vec<TokenSource>,
}

impl DecoderOutput {
    /// Fail with `NumericInstability` if any logit is NaN or infinite
    pub fn check_finite(&self) -> Result<()> {
        let bad = self.logits.count_non_finite();
        if bad > 0 {
            return Err(CaptionError::NumericInstability(format!(
                "{} of {} logits are not finite",
                bad,
                self.logits.data.len()
            )));
        }
        Ok(())
    }
}

/// A greedily generated caption
#[derive(Clone, Debug, PartialEq)]
pub struct Caption {
    /// Emitted tokens, including the final end token when one was produced
    pub tokens: Vec<usize>,
    /// Attention distribution over the slots at every emitted step
    pub attention_weights: Vec<Vec<f32>>,
    /// True when generation stopped on the end token
    pub finished: bool,
}

impl Caption {
    /// Fail with `NumericInstability` if any attention weight is NaN or infinite
    pub fn check_finite(&self) -> Result<()> {
        for (t, weights) in self.attention_weights.iter().enumerate() {
            if weights.iter().any(|w| !w.is_finite()) {
                return Err(CaptionError::NumericInstability(format!(
                    "attention weights at step {} are not finite",
                    t
                )));
            }
        }
        Ok(())
    }
}

/// Attention LSTM decoder
#[derive(Clone, Debug)]
pub struct SequenceDecoder {
    pub embedding: Embedding,
    pub attention: AttentionScorer,
    pub lstm: LstmCell,
    /// Hidden state to vocabulary logits
    pub fc: Linear,
    pub init_h: Linear,
    pub init_c: Linear,
    pub dropout: Dropout,
    config: DecoderConfig,
}

impl SequenceDecoder {
    /// Create a decoder with freshly initialized weights
    pub fn new(config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed;
        let nf = config.num_features;
        let hd = config.hidden_dim;

        let embedding = Embedding::new(config.vocab_size, config.embedding_dim, seed)?;
        let attention = AttentionScorer::new(nf, hd, seed + 10)?;
        let lstm = LstmCell::new(config.embedding_dim + nf, hd, seed + 20);
        let fc = Linear::new(hd, config.vocab_size, seed + 30);
        let init_h = Linear::new(nf, hd, seed + 40);
        let init_c = Linear::new(nf, hd, seed + 50);

        Self::from_parts(config, embedding, attention, lstm, fc, init_h, init_c)
    }

    /// Assemble a decoder from existing layers
    ///
    /// Every matrix is checked against `config`; any disagreement is a
    /// `Configuration` error.
    pub fn from_parts(
        config: DecoderConfig,
        embedding: Embedding,
        attention: AttentionScorer,
        lstm: LstmCell,
        fc: Linear,
        init_h: Linear,
        init_c: Linear,
    ) -> Result<Self> {
        config.validate()?;
        let nf = config.num_features;
        let hd = config.hidden_dim;

        if embedding.vocab_size() != config.vocab_size
            || embedding.embedding_dim() != config.embedding_dim
        {
            return Err(CaptionError::Configuration(format!(
                "embedding table is [{}, {}], config expects [{}, {}]",
                embedding.vocab_size(),
                embedding.embedding_dim(),
                config.vocab_size,
                config.embedding_dim
            )));
        }
        if attention.num_features != nf || attention.hidden_dim != hd {
            return Err(CaptionError::Configuration(format!(
                "attention expects features {} / hidden {}, config has {} / {}",
                attention.num_features, attention.hidden_dim, nf, hd
            )));
        }
        if lstm.input_dim() != config.embedding_dim + nf || lstm.hidden_dim != hd {
            return Err(CaptionError::Configuration(format!(
                "lstm maps {} -> {}, expected {} -> {}",
                lstm.input_dim(),
                lstm.hidden_dim,
                config.embedding_dim + nf,
                hd
            )));
        }
        fc.expect_dims("output projection", hd, config.vocab_size)?;
        init_h.expect_dims("init_h", nf, hd)?;
        init_c.expect_dims("init_c", nf, hd)?;

        let dropout = Dropout::new(config.dropout_rate)?;
        let attention = attention.with_device(config.device);

        let decoder = Self {
            embedding,
            attention,
            lstm,
            fc,
            init_h,
            init_c,
            dropout,
            config,
        };
        tracing::debug!(
            parameters = decoder.num_parameters(),
            vocab_size = decoder.config.vocab_size,
            device = ?decoder.config.device,
            "decoder ready"
        );
        Ok(decoder)
    }

    /// Hyperparameters this decoder was built with
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Switch the execution device for both attention and `caption_batch`
    pub fn with_device(mut self, device: Device) -> Self {
        self.config.device = device;
        self.attention = self.attention.with_device(device);
        self
    }

    /// Fail every step on non-finite logits
    pub fn with_check_numerics(mut self, enabled: bool) -> Self {
        self.config.check_numerics = enabled;
        self
    }

    /// Initial `(h, c)` from the slot-mean of the feature map
    pub fn init_hidden(&self, features: &Tensor) -> Result<LstmState> {
        validate_feature_map(features, self.config.num_features)?;
        let mean = features.mean_axis1();
        Ok(LstmState {
            h: self.init_h.forward(&mean),
            c: self.init_c.forward(&mean),
        })
    }

    /// One recurrent step
    ///
    /// # Arguments
    ///
    /// * `features` - FeatureMap `[batch, slots, feature_dim]`
    /// * `input_embedding` - Embedded input tokens `[batch, embedding_dim]`
    /// * `state` - State from the previous step (or [`init_hidden`](Self::init_hidden))
    /// * `mode` - Whether dropout is applied
    pub fn step(
        &self,
        features: &Tensor,
        input_embedding: &Tensor,
        state: &LstmState,
        mode: StepMode<'_>,
    ) -> Result<StepOutput> {
        let batch = features.shape.first().copied().unwrap_or(0);
        if input_embedding.shape != vec![batch, self.config.embedding_dim] {
            return Err(CaptionError::Validation(format!(
                "input embedding {:?} does not match [batch = {}, embedding_dim = {}]",
                input_embedding.shape, batch, self.config.embedding_dim
            )));
        }
        if state.c.shape != state.h.shape {
            return Err(CaptionError::Validation(format!(
                "cell state {:?} does not match hidden state {:?}",
                state.c.shape, state.h.shape
            )));
        }

        let (context, attention_weights) = self.attention.forward(features, &state.h)?;
        let x = Tensor::concat_last(&[input_embedding, &context]);
        let next = self.lstm.step(&x, state);

        let h = match mode {
            StepMode::Train(rng) => self.dropout.forward(&next.h, rng),
            StepMode::Inference => self.dropout.inference(&next.h),
        };
        let logits = self.fc.forward(&h);

        if self.config.check_numerics && !logits.is_finite() {
            let bad = logits.count_non_finite();
            tracing::warn!(bad, "non-finite logits");
            return Err(CaptionError::NumericInstability(format!(
                "{} of {} logits are not finite",
                bad,
                logits.data.len()
            )));
        }

        Ok(StepOutput {
            logits,
            attention_weights,
            state: LstmState { h, c: next.c },
        })
    }

    /// Training forward pass with scheduled sampling
    ///
    /// # Arguments
    ///
    /// * `captions` - One token sequence per batch entry, all the same length
    /// * `features` - FeatureMap `[batch, slots, feature_dim]`
    /// * `rng` - Source of coin flips, dropout masks and sampled tokens
    ///
    /// # Returns
    ///
    /// Logits `[batch, seq_len, vocab_size]` and attention weights
    /// `[batch, seq_len, slots]` for external loss computation.
    pub fn forward<R: Rng>(
        &self,
        captions: &[Vec<usize>],
        features: &Tensor,
        rng: &mut R,
    ) -> Result<DecoderOutput> {
        validate_feature_map(features, self.config.num_features)?;
        let seq_len = self.validate_captions(captions, features.shape[0])?;
        let vocab_size = self.config.vocab_size;

        let mut state = self.init_hidden(features)?;
        let mut logits_steps: Vec<Tensor> = Vec::with_capacity(seq_len);
        let mut weight_steps = Vec::with_capacity(seq_len);
        let mut token_sources = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let source = choose_token_source(t, self.config.sample_prob, rng.random());
            let tokens: Vec<usize> = match (source, logits_steps.last()) {
                (TokenSource::Predicted, Some(previous)) => previous
                    .data
                    .chunks(vocab_size)
                    .map(|row| {
                        pick_feedback_token(
                            row,
                            self.config.sample_temp,
                            self.config.feedback,
                            &mut *rng,
                        )
                    })
                    .collect(),
                _ => captions.iter().map(|caption| caption[t]).collect(),
            };

            let embedded = self.embedding.lookup(&tokens)?;
            let out = self.step(features, &embedded, &state, StepMode::Train(&mut *rng))?;

            state = out.state;
            logits_steps.push(out.logits);
            weight_steps.push(out.attention_weights);
            token_sources.push(source);
        }

        Ok(DecoderOutput {
            logits: Tensor::stack_steps(&logits_steps),
            attention_weights: Tensor::stack_steps(&weight_steps),
            token_sources,
        })
    }

    /// Greedy captioning of a single example
    ///
    /// # Arguments
    ///
    /// * `features` - FeatureMap `[1, slots, feature_dim]`
    /// * `max_sentence` - Length cap, `None` for the configured default
    ///
    /// Stops after emitting the end token or `max_sentence` tokens.
    pub fn greedy_search(&self, features: &Tensor, max_sentence: Option<usize>) -> Result<Caption> {
        validate_feature_map(features, self.config.num_features)?;
        if features.shape[0] != 1 {
            return Err(CaptionError::Validation(format!(
                "greedy search captions one example, got batch of {}",
                features.shape[0]
            )));
        }
        let max_sentence = max_sentence.unwrap_or(self.config.max_sentence);
        if max_sentence == 0 {
            return Err(CaptionError::Validation(
                "max_sentence must be at least 1".to_string(),
            ));
        }

        let mut state = self.init_hidden(features)?;
        let mut token = START_TOKEN;
        let mut tokens = Vec::new();
        let mut attention_weights = Vec::new();
        let mut finished = false;

        while tokens.len() < max_sentence {
            let embedded = self.embedding.lookup(&[token])?;
            let out = self.step(features, &embedded, &state, StepMode::Inference)?;
            token = out.logits.log_softmax_last().argmax_last()[0];

            tokens.push(token);
            attention_weights.push(out.attention_weights.data);
            state = out.state;

            if token == END_TOKEN {
                finished = true;
                break;
            }
        }

        tracing::debug!(len = tokens.len(), finished, "greedy search done");
        Ok(Caption {
            tokens,
            attention_weights,
            finished,
        })
    }

    /// Greedy captioning of independent examples
    ///
    /// Each entry is a `[1, slots, feature_dim]` map. Under
    /// `Device::CpuParallel` examples are decoded on Rayon workers; the
    /// results are the same as decoding them one by one.
    pub fn caption_batch(
        &self,
        features: &[Tensor],
        max_sentence: Option<usize>,
    ) -> Result<Vec<Caption>> {
        if self.config.device.is_parallel() {
            features
                .par_iter()
                .map(|f| self.greedy_search(f, max_sentence))
                .collect()
        } else {
            features
                .iter()
                .map(|f| self.greedy_search(f, max_sentence))
                .collect()
        }
    }

    /// Total number of learned parameters
    pub fn num_parameters(&self) -> usize {
        self.embedding.num_parameters()
            + self.attention.num_parameters()
            + self.lstm.num_parameters()
            + self.fc.num_parameters()
            + self.init_h.num_parameters()
            + self.init_c.num_parameters()
    }

    fn validate_captions(&self, captions: &[Vec<usize>], batch: usize) -> Result<usize> {
        if captions.len() != batch {
            return Err(CaptionError::Validation(format!(
                "{} captions for a feature batch of {}",
                captions.len(),
                batch
            )));
        }
        let seq_len = captions[0].len();
        if seq_len == 0 {
            return Err(CaptionError::Validation("captions are empty".to_string()));
        }
        for (i, caption) in captions.iter().enumerate() {
            if caption.len() != seq_len {
                return Err(CaptionError::Validation(format!(
                    "caption {} has length {}, expected {}",
                    i,
                    caption.len(),
                    seq_len
                )));
            }
            if let Some(&bad) = caption.iter().find(|&&id| id >= self.config.vocab_size) {
                return Err(CaptionError::Validation(format!(
                    "caption {} has token {} outside vocabulary of {}",
                    i, bad, self.config.vocab_size
                )));
            }
        }
        Ok(seq_len)
    }
}
