//! Additive (Bahdanau) Attention
//!
//! Scores every FeatureMap slot against the decoder's current hidden state
//! and reduces the slots to one context vector.
//!
//! ## Algorithm
//!
//! ```text
//! features  [batch, slots, feature_dim]
//! hidden    [batch, hidden_dim]
//!
//! energy  = tanh(features @ W_a + b_W  (+)  hidden @ U_a + b_U)   [batch, slots, hidden_dim]
//! scores  = energy @ v_a + b_v                                    [batch, slots]
//! weights = softmax(scores) over slots                            [batch, slots]
//! context = Σ_s weights[s] · features[s]                          [batch, feature_dim]
//! ```
//!
//! `(+)` broadcasts the projected hidden state over every slot of its own
//! batch entry.
//!
//! ## Why Additive Attention?
//!
//! Feature slots and hidden state live in different spaces with different
//! widths, so they are first projected into a shared `hidden_dim` space and
//! compared through a small learned network rather than a raw dot product.
//!
//! The scorer is stateless: the result depends only on its three learned
//! maps and the current inputs.

use super::linear::Linear;
use crate::config::Device;
use crate::error::{CaptionError, Result};
use crate::layers::activation::tanh;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Additive attention over FeatureMap slots
#[derive(Clone, Debug)]
pub struct AttentionScorer {
    /// Feature projection W_a: [feature_dim, hidden_dim]
    pub w_a: Linear,
    /// Hidden-state projection U_a: [hidden_dim, hidden_dim]
    pub u_a: Linear,
    /// Score projection v_a: [hidden_dim, 1]
    pub v_a: Linear,
    pub num_features: usize,
    pub hidden_dim: usize,
    pub device: Device,
}

impl AttentionScorer {
    /// Create a new scorer with seeded weights
    ///
    /// # Arguments
    ///
    /// * `num_features` - Width of each FeatureMap slot
    /// * `hidden_dim` - Width of the decoder hidden state
    /// * `seed` - Random seed for initialization
    pub fn new(num_features: usize, hidden_dim: usize, seed: u64) -> Result<Self> {
        if num_features == 0 || hidden_dim == 0 {
            return Err(CaptionError::Configuration(format!(
                "attention dimensions must be positive (features {}, hidden {})",
                num_features, hidden_dim
            )));
        }
        Self::from_parts(
            Linear::new(num_features, hidden_dim, seed),
            Linear::new(hidden_dim, hidden_dim, seed + 1),
            Linear::new(hidden_dim, 1, seed + 2),
        )
    }

    /// Build from explicit projections, checking they chain together
    pub fn from_parts(w_a: Linear, u_a: Linear, v_a: Linear) -> Result<Self> {
        let num_features = w_a.in_features();
        let hidden_dim = w_a.out_features();
        u_a.expect_dims("attention U_a", hidden_dim, hidden_dim)?;
        v_a.expect_dims("attention v_a", hidden_dim, 1)?;

        Ok(Self {
            w_a,
            u_a,
            v_a,
            num_features,
            hidden_dim,
            device: Device::Cpu,
        })
    }

    /// Run the slot reduction on the given device
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Score the slots and build the context vector
    ///
    /// # Returns
    ///
    /// `(context [batch, feature_dim], weights [batch, slots])`
    pub fn forward(&self, features: &Tensor, hidden: &Tensor) -> Result<(Tensor, Tensor)> {
        self.validate(features, hidden)?;
        let batch = features.shape[0];
        let slots = features.shape[1];

        let projected_features = self.w_a.forward(features);
        let projected_hidden = self.u_a.forward(hidden);
        let energy = tanh(&projected_features.add_per_batch(&projected_hidden));

        let scores = self.v_a.forward(&energy).reshape(&[batch, slots]);
        let weights = scores.softmax_last();
        let context = reduce_slots(features, &weights, self.device);

        Ok((context, weights))
    }

    fn validate(&self, features: &Tensor, hidden: &Tensor) -> Result<()> {
        validate_feature_map(features, self.num_features)?;
        if hidden.shape != vec![features.shape[0], self.hidden_dim] {
            return Err(CaptionError::Validation(format!(
                "hidden state {:?} does not match [batch = {}, hidden_dim = {}]",
                hidden.shape, features.shape[0], self.hidden_dim
            )));
        }
        Ok(())
    }

    pub fn num_parameters(&self) -> usize {
        self.w_a.num_parameters() + self.u_a.num_parameters() + self.v_a.num_parameters()
    }
}

/// Check that `features` is a non-empty `[batch, slots, num_features]` map
pub fn validate_feature_map(features: &Tensor, num_features: usize) -> Result<()> {
    if features.rank() != 3 {
        return Err(CaptionError::Validation(format!(
            "feature map must be [batch, slots, feature_dim], got {:?}",
            features.shape
        )));
    }
    if features.shape[0] == 0 || features.shape[1] == 0 {
        return Err(CaptionError::Validation(format!(
            "feature map {:?} has no examples or no slots",
            features.shape
        )));
    }
    if features.shape[2] != num_features {
        return Err(CaptionError::Validation(format!(
            "feature_dim {} does not match configured {}",
            features.shape[2], num_features
        )));
    }
    Ok(())
}

/// Weighted sum of FeatureMap slots
///
/// `features [batch, slots, dim]` and `weights [batch, slots]` give
/// `[batch, dim]`. With one-hot weights the result is exactly the selected
/// slot's vector.
pub fn context_from_weights(features: &Tensor, weights: &Tensor, device: Device) -> Result<Tensor> {
    if features.rank() != 3 || weights.shape != features.shape[..2].to_vec() {
        return Err(CaptionError::Validation(format!(
            "weights {:?} do not cover the slots of {:?}",
            weights.shape, features.shape
        )));
    }
    Ok(reduce_slots(features, weights, device))
}

fn reduce_slots(features: &Tensor, weights: &Tensor, device: Device) -> Tensor {
    let batch = features.shape[0];
    let slots = features.shape[1];
    let dim = features.shape[2];

    let reduce_one = |b: usize, out: &mut [f32]| {
        for s in 0..slots {
            let w = weights.data[b * slots + s];
            let start = (b * slots + s) * dim;
            for (o, &f) in out.iter_mut().zip(&features.data[start..start + dim]) {
                *o += w * f;
            }
        }
    };

    let mut context = vec![0.0; batch * dim];
    if device.is_parallel() {
        context
            .par_chunks_mut(dim)
            .enumerate()
            .for_each(|(b, out)| reduce_one(b, out));
    } else {
        context
            .chunks_mut(dim)
            .enumerate()
            .for_each(|(b, out)| reduce_one(b, out));
    }

    Tensor::new(context, vec![batch, dim])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> Tensor {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Tensor::new(data, vec![n, n])
    }

    /// Scorer that turns large feature values into large scores
    fn peaked_scorer(dim: usize) -> AttentionScorer {
        AttentionScorer::from_parts(
            Linear::from_parts(identity(dim), Tensor::zeros(vec![dim])).unwrap(),
            Linear::from_parts(Tensor::zeros(vec![dim, dim]), Tensor::zeros(vec![dim])).unwrap(),
            Linear::from_parts(Tensor::full(vec![dim, 1], 50.0), Tensor::zeros(vec![1])).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_weights_sum_to_one() {
        let scorer = AttentionScorer::new(6, 5, 3).unwrap();
        let features = Tensor::new(
            (0..4 * 7 * 6).map(|v| ((v * 37 % 11) as f32 - 5.0) * 0.3).collect(),
            vec![4, 7, 6],
        );
        let hidden = Tensor::new((0..4 * 5).map(|v| v as f32 * 0.1).collect(), vec![4, 5]);

        let (context, weights) = scorer.forward(&features, &hidden).unwrap();
        assert_eq!(context.shape, vec![4, 6]);
        assert_eq!(weights.shape, vec![4, 7]);
        for row in weights.data.chunks(7) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn test_one_hot_weights_reproduce_slot() {
        let features = Tensor::new((0..2 * 3 * 4).map(|v| v as f32).collect(), vec![2, 3, 4]);
        let weights = Tensor::new(vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0], vec![2, 3]);

        let context = context_from_weights(&features, &weights, Device::Cpu).unwrap();
        assert_eq!(context.data[..4], features.data[4..8]);
        assert_eq!(context.data[4..], features.data[20..24]);
    }

    #[test]
    fn test_extreme_scores_select_dominant_slot() {
        // (1, 5, 4): slot 3 is distinctly larger than the rest
        let mut data = vec![0.01; 5 * 4];
        data[12..16].copy_from_slice(&[3.0, 3.0, 3.0, 3.0]);
        let features = Tensor::new(data, vec![1, 5, 4]);
        let hidden = Tensor::zeros(vec![1, 4]);

        let (context, weights) = peaked_scorer(4).forward(&features, &hidden).unwrap();
        assert!(weights.data[3] > 0.999);
        for (c, expected) in context.data.iter().zip(&[3.0, 3.0, 3.0, 3.0]) {
            assert!((c - expected).abs() < 1e-2, "context {:?}", context.data);
        }
    }

    #[test]
    fn test_hidden_state_steers_attention() {
        // Slots 0..4 are 0.5 * e_s, slot 4 is -0.5 * e_0; no slot wins on features alone
        let mut data = vec![0.0; 5 * 4];
        for s in 0..4 {
            data[s * 4 + s] = 0.5;
        }
        data[16] = -0.5;
        let features = Tensor::new(data, vec![1, 5, 4]);

        // U_a pushes every energy dimension except the one h points at to tanh(-2)
        let u_weight = (0..16)
            .map(|v| if v / 4 == v % 4 { 0.0 } else { -2.0 })
            .collect();
        let scorer = AttentionScorer::from_parts(
            Linear::from_parts(identity(4), Tensor::zeros(vec![4])).unwrap(),
            Linear::from_parts(Tensor::new(u_weight, vec![4, 4]), Tensor::zeros(vec![4])).unwrap(),
            Linear::from_parts(Tensor::full(vec![4, 1], 50.0), Tensor::zeros(vec![1])).unwrap(),
        )
        .unwrap();

        for k in 0..4 {
            let mut h = vec![0.0; 4];
            h[k] = 1.0;
            let hidden = Tensor::new(h, vec![1, 4]);

            let (context, weights) = scorer.forward(&features, &hidden).unwrap();
            assert!(weights.data[k] > 0.999, "h = e_{}: weights {:?}", k, weights.data);
            for (j, c) in context.data.iter().enumerate() {
                let expected = if j == k { 0.5 } else { 0.0 };
                assert!((c - expected).abs() < 1e-2, "context {:?}", context.data);
            }
        }
    }

    #[test]
    fn test_parallel_device_matches_cpu() {
        let scorer = AttentionScorer::new(3, 4, 8).unwrap();
        let features = Tensor::new((0..5 * 2 * 3).map(|v| (v as f32).sin()).collect(), vec![5, 2, 3]);
        let hidden = Tensor::new((0..5 * 4).map(|v| (v as f32).cos()).collect(), vec![5, 4]);

        let cpu = scorer.forward(&features, &hidden).unwrap();
        let parallel = scorer
            .clone()
            .with_device(Device::CpuParallel)
            .forward(&features, &hidden)
            .unwrap();
        assert_eq!(cpu, parallel);
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let scorer = AttentionScorer::new(4, 3, 0).unwrap();
        let hidden = Tensor::zeros(vec![1, 3]);

        let wrong_dim = Tensor::zeros(vec![1, 2, 5]);
        assert!(matches!(
            scorer.forward(&wrong_dim, &hidden),
            Err(CaptionError::Validation(_))
        ));

        let wrong_rank = Tensor::zeros(vec![2, 4]);
        assert!(scorer.forward(&wrong_rank, &hidden).is_err());

        let features = Tensor::zeros(vec![2, 2, 4]);
        assert!(scorer.forward(&features, &hidden).is_err());
    }

    #[test]
    fn test_from_parts_rejects_broken_chain() {
        let result = AttentionScorer::from_parts(
            Linear::new(4, 3, 0),
            Linear::new(3, 2, 0),
            Linear::new(3, 1, 0),
        );
        assert!(matches!(result, Err(CaptionError::Configuration(_))));
        assert!(AttentionScorer::new(0, 3, 0).is_err());
    }
}
