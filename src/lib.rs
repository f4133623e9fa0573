//! Scrivener: Attention LSTM Caption Decoder
//!
//! An image-caption decoder written from scratch in Rust: additive
//! attention over image feature slots, an LSTM cell driven one token at a
//! time, scheduled sampling for training, and greedy decoding for
//! inference. Image features come from an external encoder; this crate
//! turns them into words.
//!
//! # Modules
//!
//! - [`tensor`] - Minimal row-major `f32` tensor
//! - [`layers`] - Linear, embedding, dropout, LSTM, and attention layers
//! - [`decoder`] - The sequence decoder (training forward, greedy search)
//! - [`vocab`] - Word <-> index vocabulary with JSON persistence
//! - [`data`] - Caption batching
//! - [`loss`] - Masked sequence cross-entropy
//! - [`checkpoint`] - Binary save/load of decoder + vocabulary
//! - [`config`] - Hyperparameters and execution device
//!
//! # Example
//!
//! ```rust
//! use scrivener::{DecoderConfig, SequenceDecoder, Tensor, VocabularyIndex};
//!
//! let vocab = VocabularyIndex::build(&["a dog on the grass", "a cat on a mat"], 1);
//! let decoder = SequenceDecoder::new(DecoderConfig::tiny(vocab.len())).unwrap();
//!
//! // One example, 49 feature slots of 16 values each
//! let features = Tensor::zeros(vec![1, 49, 16]);
//! let caption = decoder.greedy_search(&features, None).unwrap();
//! println!("{}", vocab.decode(&caption.tokens));
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod decoder;
pub mod error;
pub mod layers;
pub mod loss;
pub mod tensor;
pub mod vocab;

// Re-export main types for convenience
pub use checkpoint::Checkpoint;
pub use config::{DecoderConfig, Device, FeedbackPolicy, DEFAULT_MAX_SENTENCE, END_TOKEN, START_TOKEN};
pub use data::{stack_features, CaptionBatch, CaptionDataLoader};
pub use decoder::{
    choose_token_source, pick_feedback_token, Caption, DecoderOutput, SequenceDecoder, StepMode,
    StepOutput, TokenSource,
};
pub use error::{CaptionError, Result};
pub use layers::{AttentionScorer, LstmState};
pub use loss::{masked_cross_entropy, perplexity};
pub use tensor::Tensor;
pub use vocab::{tokenize, VocabStats, VocabularyIndex, DEFAULT_MIN_COUNT, UNK_TOKEN};
