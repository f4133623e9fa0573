//! Dropout Layer
//!
//! Dropout randomly zeros activations during training to prevent overfitting
//! and scales the survivors by `1 / (1 - rate)` so the expected value is
//! unchanged. During inference it passes values through untouched.
//!
//! The random source is supplied by the caller, which keeps training runs
//! reproducible under a seeded RNG.

use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;
use rand::Rng;

/// Inverted dropout
#[derive(Clone, Debug)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    /// Create a new dropout layer
    ///
    /// # Arguments
    ///
    /// * `rate` - Dropout probability (0.0 = no dropout, 1.0 = drop all)
    pub fn new(rate: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(CaptionError::Configuration(format!(
                "dropout rate {} must be between 0.0 and 1.0",
                rate
            )));
        }
        Ok(Self { rate })
    }

    /// Training-mode forward pass
    pub fn forward<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> Tensor {
        if self.rate == 0.0 {
            return x.clone();
        }
        if self.rate >= 1.0 {
            return Tensor::zeros(x.shape.clone());
        }

        let scale = 1.0 / (1.0 - self.rate);
        let data = x
            .data
            .iter()
            .map(|&v| {
                if rng.random::<f32>() >= self.rate {
                    v * scale
                } else {
                    0.0
                }
            })
            .collect();
        Tensor::new(data, x.shape.clone())
    }

    /// Inference-mode forward pass (identity)
    pub fn inference(&self, x: &Tensor) -> Tensor {
        x.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_invalid_rate() {
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(1.1).is_err());
    }

    #[test]
    fn test_inference_is_identity() {
        let dropout = Dropout::new(0.9).unwrap();
        let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![1, 3]);
        assert_eq!(dropout.inference(&x), x);
    }

    #[test]
    fn test_training_scales_survivors() {
        let dropout = Dropout::new(0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let x = Tensor::full(vec![1, 1000], 1.0);
        let y = dropout.forward(&x, &mut rng);

        let kept = y.data.iter().filter(|&&v| v != 0.0).count();
        assert!(y.data.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(kept > 400 && kept < 600, "kept {}", kept);
    }

    #[test]
    fn test_extreme_rates() {
        let mut rng = StdRng::seed_from_u64(0);
        let x = Tensor::full(vec![2, 2], 3.0);
        assert_eq!(Dropout::new(0.0).unwrap().forward(&x, &mut rng), x);
        assert!(Dropout::new(1.0)
            .unwrap()
            .forward(&x, &mut rng)
            .data
            .iter()
            .all(|&v| v == 0.0));
    }
}
