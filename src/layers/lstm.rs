//! LSTM Cell
//!
//! One step of a long short-term memory cell. The recurrent state is an
//! explicit [`LstmState`] value: `step` takes the previous state and returns
//! the next one, nothing is stored inside the cell.
//!
//! ```text
//! gates = x @ W_x + b_x + h @ W_h + b_h        [batch, 4 * hidden]
//! i, f, g, o = split(gates)
//! i = σ(i)   f = σ(f)   g = tanh(g)   o = σ(o)
//! c' = f ⊙ c + i ⊙ g
//! h' = o ⊙ tanh(c')
//! ```
//!
//! Gate order along the last axis is input, forget, cell, output.

use super::activation::{sigmoid, tanh};
use super::linear::Linear;
use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;

/// Hidden and cell vectors of one sequence batch, each `[batch, hidden_dim]`
#[derive(Clone, Debug, PartialEq)]
pub struct LstmState {
    pub h: Tensor,
    pub c: Tensor,
}

impl LstmState {
    pub fn zeros(batch: usize, hidden_dim: usize) -> Self {
        Self {
            h: Tensor::zeros(vec![batch, hidden_dim]),
            c: Tensor::zeros(vec![batch, hidden_dim]),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.h.shape[0]
    }
}

/// LSTM cell with separate input and recurrent projections
#[derive(Clone, Debug)]
pub struct LstmCell {
    pub input_proj: Linear,
    pub hidden_proj: Linear,
    pub hidden_dim: usize,
}

impl LstmCell {
    pub fn new(input_dim: usize, hidden_dim: usize, seed: u64) -> Self {
        Self {
            input_proj: Linear::new(input_dim, 4 * hidden_dim, seed),
            hidden_proj: Linear::new(hidden_dim, 4 * hidden_dim, seed + 1),
            hidden_dim,
        }
    }

    /// Build from explicit projections
    ///
    /// `input_proj` must map `input_dim -> 4 * hidden_dim` and `hidden_proj`
    /// `hidden_dim -> 4 * hidden_dim`.
    pub fn from_parts(input_proj: Linear, hidden_proj: Linear) -> Result<Self> {
        let hidden_dim = hidden_proj.in_features();
        if hidden_proj.out_features() != 4 * hidden_dim {
            return Err(CaptionError::Configuration(format!(
                "recurrent projection maps {} -> {}, expected 4 gates of {}",
                hidden_dim,
                hidden_proj.out_features(),
                hidden_dim
            )));
        }
        if input_proj.out_features() != 4 * hidden_dim {
            return Err(CaptionError::Configuration(format!(
                "input projection produces {} gate values, expected {}",
                input_proj.out_features(),
                4 * hidden_dim
            )));
        }
        Ok(Self {
            input_proj,
            hidden_proj,
            hidden_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_proj.in_features()
    }

    /// Advance one step: `x [batch, input_dim]` and the previous state give
    /// the next state
    pub fn step(&self, x: &Tensor, state: &LstmState) -> LstmState {
        let h = self.hidden_dim;
        let gates = self
            .input_proj
            .forward(x)
            .add(&self.hidden_proj.forward(&state.h));

        let input_gate = sigmoid(&gates.narrow_last(0, h));
        let forget_gate = sigmoid(&gates.narrow_last(h, h));
        let candidate = tanh(&gates.narrow_last(2 * h, h));
        let output_gate = sigmoid(&gates.narrow_last(3 * h, h));

        let c = forget_gate
            .mul(&state.c)
            .add(&input_gate.mul(&candidate));
        let h = output_gate.mul(&tanh(&c));

        LstmState { h, c }
    }

    pub fn num_parameters(&self) -> usize {
        self.input_proj.num_parameters() + self.hidden_proj.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_shapes() {
        let cell = LstmCell::new(6, 4, 5);
        let state = LstmState::zeros(3, 4);
        let x = Tensor::full(vec![3, 6], 0.1);
        let next = cell.step(&x, &state);
        assert_eq!(next.h.shape, vec![3, 4]);
        assert_eq!(next.c.shape, vec![3, 4]);
        assert!(next.h.data.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_step_matches_hand_computation() {
        // hidden_dim = 1, all weights zero, biases pick the gate values
        let input_proj = Linear::from_parts(
            Tensor::zeros(vec![2, 4]),
            Tensor::new(vec![0.0, 0.0, 0.0, 0.0], vec![4]),
        )
        .unwrap();
        let hidden_proj = Linear::from_parts(
            Tensor::zeros(vec![1, 4]),
            Tensor::new(vec![100.0, -100.0, 0.5, 100.0], vec![4]),
        )
        .unwrap();
        let cell = LstmCell::from_parts(input_proj, hidden_proj).unwrap();

        let state = LstmState {
            h: Tensor::new(vec![0.3], vec![1, 1]),
            c: Tensor::new(vec![7.0], vec![1, 1]),
        };
        let next = cell.step(&Tensor::zeros(vec![1, 2]), &state);

        // input gate open, forget gate closed: c' = tanh(0.5)
        let expected_c = 0.5f32.tanh();
        assert!((next.c.data[0] - expected_c).abs() < 1e-5);
        assert!((next.h.data[0] - expected_c.tanh()).abs() < 1e-5);
    }

    #[test]
    fn test_step_is_pure() {
        let cell = LstmCell::new(3, 2, 9);
        let state = LstmState::zeros(1, 2);
        let x = Tensor::new(vec![0.2, -0.4, 0.9], vec![1, 3]);
        assert_eq!(cell.step(&x, &state), cell.step(&x, &state));
    }

    #[test]
    fn test_from_parts_rejects_wrong_gate_count() {
        let result = LstmCell::from_parts(Linear::new(3, 8, 0), Linear::new(2, 6, 0));
        assert!(matches!(result, Err(CaptionError::Configuration(_))));
    }
}
