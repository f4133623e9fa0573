//! Activation Functions
//!
//! The two saturating nonlinearities of a recurrent decoder:
//!
//! ```text
//! sigmoid(x) = 1 / (1 + e^(-x))      LSTM input/forget/output gates
//! tanh(x)                            LSTM candidate and cell output,
//!                                    additive attention energy
//! ```
//!
//! Both are applied element-wise in parallel.

use crate::tensor::Tensor;

/// Logistic sigmoid, element-wise
pub fn sigmoid(x: &Tensor) -> Tensor {
    x.map(|val| 1.0 / (1.0 + (-val).exp()))
}

/// Hyperbolic tangent, element-wise
pub fn tanh(x: &Tensor) -> Tensor {
    x.map(f32::tanh)
}
