//! Neural Network Layers
//!
//! Building blocks for the attention LSTM decoder. Every layer owns its
//! parameters as plain [`Tensor`](crate::tensor::Tensor)s and exposes a
//! `forward`/`step` function that is a pure function of those parameters
//! and its inputs.
//!
//! ## Layers
//!
//! - **activation**: sigmoid and tanh
//! - **linear**: Fully connected layer
//! - **embedding**: Word embedding lookup table
//! - **dropout**: Dropout regularization (training only)
//! - **lstm**: LSTM cell and its explicit `(h, c)` state
//! - **attention**: Additive attention over feature-map slots
//!
//! ## Design Pattern
//!
//! ```rust,ignore
//! pub struct Layer {
//!     // Parameters (weights, biases, etc.)
//! }
//!
//! impl Layer {
//!     pub fn new(dims..., seed: u64) -> Self { }
//!     pub fn from_parts(params...) -> Result<Self> { }
//!     pub fn forward(&self, x: &Tensor) -> Tensor { }
//! }
//! ```
//!
//! `new` draws seeded weights; `from_parts` accepts existing matrices and
//! rejects any that do not fit together.

pub mod activation;
pub mod attention;
pub mod dropout;
pub mod embedding;
pub mod linear;
pub mod lstm;

// Re-export main types for convenience
pub use activation::{sigmoid, tanh};
pub use attention::{context_from_weights, validate_feature_map, AttentionScorer};
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use linear::{random_init, Linear};
pub use lstm::{LstmCell, LstmState};
