//! Linear Layer (Fully Connected)
//!
//! Performs an affine transformation `y = x @ W + b` on the last axis:
//!
//! ```text
//! Input:  x [..., in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]
//! Output: y [..., out_features]
//! ```
//!
//! Leading axes are flattened for the matmul and restored afterwards, so the
//! same layer projects a hidden state `[batch, hidden]` or every slot of a
//! FeatureMap `[batch, num_slots, feature_dim]`.
//!
//! ## Initialization
//!
//! Weights are drawn uniformly from `[-1/√in_features, 1/√in_features]`
//! with a seeded LCG so that a given seed always yields the same model.
//! Bias starts at zero.

use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;

/// Seeded uniform initialization in `[-scale, scale)`
///
/// Uses a simple LCG (Linear Congruential Generator) for reproducibility.
pub fn random_init(size: usize, seed: u64, scale: f32) -> Vec<f32> {
    let mut rng = seed;
    (0..size)
        .map(|_| {
            rng = rng.wrapping_mul(1103515245).wrapping_add(12345);
            let val = ((rng / 65536) % 32768) as f32 / 32768.0;
            (val - 0.5) * 2.0 * scale
        })
        .collect()
}

/// Linear layer (fully connected)
#[derive(Clone, Debug)]
pub struct Linear {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Linear {
    /// Create a new linear layer
    ///
    /// # Arguments
    ///
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `seed` - Random seed for reproducibility
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        let scale = 1.0 / (in_features.max(1) as f32).sqrt();
        Self {
            weight: Tensor::new(
                random_init(in_features * out_features, seed, scale),
                vec![in_features, out_features],
            ),
            bias: Tensor::zeros(vec![out_features]),
        }
    }

    /// Build a layer from explicit parameters
    ///
    /// `weight` must be `[in_features, out_features]` and `bias`
    /// `[out_features]`.
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        if weight.rank() != 2 {
            return Err(CaptionError::Configuration(format!(
                "linear weight must be 2-D, got {:?}",
                weight.shape
            )));
        }
        if bias.shape != vec![weight.shape[1]] {
            return Err(CaptionError::Configuration(format!(
                "linear bias {:?} does not match weight {:?}",
                bias.shape, weight.shape
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape[1]
    }

    /// Check that this layer maps `in_features -> out_features`
    pub(crate) fn expect_dims(&self, name: &str, in_features: usize, out_features: usize) -> Result<()> {
        if self.in_features() != in_features || self.out_features() != out_features {
            return Err(CaptionError::Configuration(format!(
                "{} maps {} -> {}, expected {} -> {}",
                name,
                self.in_features(),
                self.out_features(),
                in_features,
                out_features
            )));
        }
        Ok(())
    }

    /// Forward pass: y = x @ W + b over the last axis
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let in_features = self.in_features();
        assert_eq!(
            x.last_dim(),
            in_features,
            "Linear expects last dim {}, got {:?}",
            in_features,
            x.shape
        );

        let rows = x.data.len() / in_features;
        let y_2d = x.reshape(&[rows, in_features]).matmul(&self.weight);

        let mut out_shape = x.shape.clone();
        if let Some(last) = out_shape.last_mut() {
            *last = self.out_features();
        }
        y_2d.reshape(&out_shape).add(&self.bias)
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.data.len() + self.bias.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_init_is_reproducible_and_bounded() {
        let a = random_init(100, 7, 0.5);
        let b = random_init(100, 7, 0.5);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 0.5));
        assert_ne!(a, random_init(100, 8, 0.5));
    }

    #[test]
    fn test_forward_2d() {
        let layer = Linear::from_parts(
            Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]),
            Tensor::new(vec![0.5, -0.5], vec![2]),
        )
        .unwrap();
        let x = Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]);
        let y = layer.forward(&x);
        assert_eq!(y.shape, vec![1, 2]);
        assert_eq!(y.data, vec![4.5, 4.5]);
    }

    #[test]
    fn test_forward_3d_keeps_leading_axes() {
        let layer = Linear::new(4, 3, 1);
        let x = Tensor::new((0..2 * 5 * 4).map(|v| v as f32 * 0.01).collect(), vec![2, 5, 4]);
        let y = layer.forward(&x);
        assert_eq!(y.shape, vec![2, 5, 3]);

        // Slot (1, 2) must equal projecting that slot alone
        let slot = Tensor::new(x.data[(5 + 2) * 4..(5 + 2) * 4 + 4].to_vec(), vec![1, 4]);
        let alone = layer.forward(&slot);
        assert_eq!(&y.data[(5 + 2) * 3..(5 + 2) * 3 + 3], &alone.data[..]);
    }

    #[test]
    fn test_from_parts_rejects_bad_bias() {
        let result = Linear::from_parts(Tensor::zeros(vec![3, 2]), Tensor::zeros(vec![3]));
        assert!(matches!(result, Err(CaptionError::Configuration(_))));
    }
}
