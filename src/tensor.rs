//! Tensor Operations for the Caption Decoder
//!
//! A minimal row-major tensor covering exactly what an attention LSTM
//! decoder needs: affine maps, broadcasting adds, gate slicing, softmax over
//! the last axis and the slot-axis reductions used by attention.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, num_slots, feature_dim]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! ## Shapes Used Throughout the Crate
//!
//! ```text
//! FeatureMap        [batch, num_slots, feature_dim]
//! hidden / cell     [batch, hidden_dim]
//! step logits       [batch, vocab_size]
//! attention weights [batch, num_slots]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use scrivener::Tensor;
//!
//! let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let c = a.matmul(&b);
//! assert_eq!(c.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Matrix multiplication, element-wise maps and softmax rows run on Rayon.
//! Shapes are validated by the layers before they reach this module, so the
//! checks here are `assert!`s guarding internal invariants.

use rayon::prelude::*;

/// A multi-dimensional array for neural network computations
///
/// For shape `[2, 3]`, data is stored as
/// `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]`
/// and strides are `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use scrivener::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a tensor filled with a constant
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Size of the last dimension (1 for a scalar-shaped tensor)
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// SIMD-friendly inner loop: `result[j] += a_val * b[j]`
    #[inline(always)]
    fn matmul_inner_simd(a_val: f32, b: &[f32], result: &mut [f32]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// 2-D matrix multiplication
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result is
    /// `[m, n]`. Small products run sequentially; from 1K multiply-adds on,
    /// the cache-blocked parallel kernel takes over.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2-D or the inner dimensions differ
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.rank() == 2 && other.rank() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                Self::matmul_inner_simd(
                    a_val,
                    &other.data[l * n..(l + 1) * n],
                    &mut result[i * n..(i + 1) * n],
                );
            }
        }
        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Output rows are split into 8-row blocks handed to Rayon workers; the
    /// inner dimension is walked in 8-wide tiles so both operands stay in L1.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Softmax over the last axis
    ///
    /// Uses the numerically stable form
    ///
    /// ```text
    /// softmax(x)[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    /// ```
    ///
    /// Every row along the last axis sums to 1. Rows are processed in
    /// parallel.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use scrivener::Tensor;
    /// let scores = Tensor::new(vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0], vec![2, 3]);
    /// let probs = scores.softmax_last();
    /// let first_row: f32 = probs.data[..3].iter().sum();
    /// assert!((first_row - 1.0).abs() < 1e-6);
    /// ```
    pub fn softmax_last(&self) -> Tensor {
        let cols = self.last_dim();
        let result: Vec<f32> = self
            .data
            .par_chunks(cols)
            .flat_map_iter(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let exp_values: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
                let sum: f32 = exp_values.iter().sum();
                exp_values.into_iter().map(move |val| val / sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Log-softmax over the last axis
    pub fn log_softmax_last(&self) -> Tensor {
        let cols = self.last_dim();
        let result: Vec<f32> = self
            .data
            .par_chunks(cols)
            .flat_map_iter(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
                row.iter().map(move |&x| x - max - log_sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise addition with broadcasting
    ///
    /// Supports:
    ///
    /// 1. **Exact match**: Same shape
    /// 2. **Broadcast last dim**: `[*, n] + [n]` (bias addition)
    ///
    /// For `[batch, slots, dim] + [batch, dim]` use [`Tensor::add_per_batch`];
    /// it is kept separate because the two patterns are ambiguous when
    /// `batch == slots`.
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        let last_dim = self.last_dim();
        if self.rank() > other.rank() && other.data.len() == last_dim {
            let result: Vec<f32> = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, &x)| x + other.data[i % last_dim])
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// Broadcast-add one row per batch entry to every slot of that entry
    ///
    /// `[batch, slots, dim] + [batch, dim] -> [batch, slots, dim]`
    pub fn add_per_batch(&self, rows: &Tensor) -> Tensor {
        assert_eq!(self.rank(), 3, "add_per_batch expects a 3-D tensor");
        assert_eq!(
            rows.shape,
            vec![self.shape[0], self.shape[2]],
            "add_per_batch: {:?} cannot broadcast over {:?}",
            rows.shape,
            self.shape
        );

        let slots = self.shape[1];
        let dim = self.shape[2];
        let result: Vec<f32> = self
            .data
            .par_iter()
            .enumerate()
            .map(|(i, &x)| {
                let b = i / (slots * dim);
                let d = i % dim;
                x + rows.data[b * dim + d]
            })
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise multiplication (same shape)
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for multiplication"
        );
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Divide all elements by scalar
    pub fn div_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x / scalar)
    }

    /// Apply a function to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} to {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Mean over axis 1 of a 3-D tensor
    ///
    /// `[batch, slots, dim] -> [batch, dim]`, the per-example average of a
    /// FeatureMap used to seed the recurrent state.
    pub fn mean_axis1(&self) -> Tensor {
        assert_eq!(self.rank(), 3, "mean_axis1 expects a 3-D tensor");
        let batch = self.shape[0];
        let slots = self.shape[1];
        let dim = self.shape[2];

        let mut result = vec![0.0; batch * dim];
        result
            .par_chunks_mut(dim)
            .enumerate()
            .for_each(|(b, out)| {
                for s in 0..slots {
                    let start = (b * slots + s) * dim;
                    for (o, &x) in out.iter_mut().zip(&self.data[start..start + dim]) {
                        *o += x;
                    }
                }
                for o in out.iter_mut() {
                    *o /= slots as f32;
                }
            });

        Tensor::new(result, vec![batch, dim])
    }

    /// Concatenate 2-D tensors along the last axis
    ///
    /// All parts must have the same number of rows.
    pub fn concat_last(parts: &[&Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_last needs at least one tensor");
        let rows = parts[0].shape[0];
        for part in parts {
            assert!(
                part.rank() == 2 && part.shape[0] == rows,
                "concat_last: {:?} does not have {} rows",
                part.shape,
                rows
            );
        }

        let total_cols: usize = parts.iter().map(|p| p.shape[1]).sum();
        let mut result = Vec::with_capacity(rows * total_cols);
        for r in 0..rows {
            for part in parts {
                let cols = part.shape[1];
                result.extend_from_slice(&part.data[r * cols..(r + 1) * cols]);
            }
        }
        Tensor::new(result, vec![rows, total_cols])
    }

    /// Take columns `[start, start + len)` of a 2-D tensor
    pub fn narrow_last(&self, start: usize, len: usize) -> Tensor {
        assert_eq!(self.rank(), 2, "narrow_last expects a 2-D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        assert!(
            start + len <= cols,
            "narrow_last: [{}, {}) out of {} columns",
            start,
            start + len,
            cols
        );

        let mut result = Vec::with_capacity(rows * len);
        for r in 0..rows {
            result.extend_from_slice(&self.data[r * cols + start..r * cols + start + len]);
        }
        Tensor::new(result, vec![rows, len])
    }

    /// Select one entry of the leading axis, keeping it as a size-1 axis
    ///
    /// `[batch, ...] -> [1, ...]`
    pub fn select_batch(&self, index: usize) -> Tensor {
        assert!(
            index < self.shape[0],
            "select_batch: index {} out of {}",
            index,
            self.shape[0]
        );
        let stride = self.strides[0];
        let mut shape = self.shape.clone();
        shape[0] = 1;
        Tensor::new(
            self.data[index * stride..(index + 1) * stride].to_vec(),
            shape,
        )
    }

    /// Index of the maximum value in every row along the last axis
    ///
    /// Ties resolve to the lowest index.
    pub fn argmax_last(&self) -> Vec<usize> {
        self.data
            .chunks(self.last_dim())
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(best_i, best), (i, &x)| {
                        if x > best {
                            (i, x)
                        } else {
                            (best_i, best)
                        }
                    })
                    .0
            })
            .collect()
    }

    /// Stack per-step `[batch, width]` tensors into `[batch, steps, width]`
    pub fn stack_steps(steps: &[Tensor]) -> Tensor {
        assert!(!steps.is_empty(), "stack_steps needs at least one step");
        let batch = steps[0].shape[0];
        let width = steps[0].shape[1];
        for step in steps {
            assert_eq!(
                step.shape,
                vec![batch, width],
                "stack_steps: inconsistent step shape"
            );
        }

        let num_steps = steps.len();
        let mut result = vec![0.0; batch * num_steps * width];
        for (t, step) in steps.iter().enumerate() {
            for b in 0..batch {
                let dst = (b * num_steps + t) * width;
                result[dst..dst + width].copy_from_slice(&step.data[b * width..(b + 1) * width]);
            }
        }
        Tensor::new(result, vec![batch, num_steps, width])
    }

    /// True when every element is finite (no NaN or infinity)
    pub fn is_finite(&self) -> bool {
        self.data.par_iter().all(|x| x.is_finite())
    }

    /// Number of NaN or infinite elements
    pub fn count_non_finite(&self) -> usize {
        self.data.par_iter().filter(|x| !x.is_finite()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_small_and_blocked_agree() {
        let a = Tensor::new((0..24).map(|x| x as f32 * 0.1).collect(), vec![4, 6]);
        let b = Tensor::new((0..30).map(|x| (x % 7) as f32).collect(), vec![6, 5]);
        let small = a.matmul(&b);

        let big_a = Tensor::new((0..24 * 10).map(|x| (x % 13) as f32).collect(), vec![24, 10]);
        let big_b = Tensor::new((0..10 * 9).map(|x| (x % 5) as f32).collect(), vec![10, 9]);
        let blocked = big_a.matmul(&big_b);

        assert_eq!(small.shape, vec![4, 5]);
        assert_eq!(blocked.shape, vec![24, 9]);

        // Reference for one blocked entry
        let mut expected = 0.0;
        for l in 0..10 {
            expected += big_a.data[17 * 10 + l] * big_b.data[l * 9 + 4];
        }
        assert!((blocked.data[17 * 9 + 4] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, -5.0, 0.0, 100.0], vec![1, 2, 3]);
        let s = t.softmax_last();
        for row in s.data.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let t = Tensor::new(vec![0.5, -1.0, 2.0], vec![1, 3]);
        let log_p = t.log_softmax_last();
        let p = t.softmax_last();
        for (lp, p) in log_p.data.iter().zip(&p.data) {
            assert!((lp.exp() - p).abs() < 1e-6);
        }
    }

    #[test]
    fn test_add_bias_broadcast() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::new(vec![10.0, 20.0], vec![2]);
        assert_eq!(x.add(&b).data, vec![11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn test_add_per_batch() {
        // batch=2, slots=2, dim=2 (batch == slots on purpose)
        let x = Tensor::zeros(vec![2, 2, 2]);
        let rows = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let y = x.add_per_batch(&rows);
        assert_eq!(y.data, vec![1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_mean_axis1() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0], vec![2, 2, 2]);
        let m = x.mean_axis1();
        assert_eq!(m.shape, vec![2, 2]);
        assert_eq!(m.data, vec![2.0, 3.0, 20.0, 30.0]);
    }

    #[test]
    fn test_concat_and_narrow() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::new(vec![5.0, 6.0], vec![2, 1]);
        let c = Tensor::concat_last(&[&a, &b]);
        assert_eq!(c.shape, vec![2, 3]);
        assert_eq!(c.data, vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
        assert_eq!(c.narrow_last(1, 2).data, vec![2.0, 5.0, 4.0, 6.0]);
    }

    #[test]
    fn test_argmax_ties_pick_first() {
        let t = Tensor::new(vec![1.0, 3.0, 3.0, 0.0, -1.0, -2.0], vec![2, 3]);
        assert_eq!(t.argmax_last(), vec![1, 0]);
    }

    #[test]
    fn test_stack_steps_layout() {
        let s0 = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let s1 = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let stacked = Tensor::stack_steps(&[s0, s1]);
        assert_eq!(stacked.shape, vec![2, 2, 2]);
        assert_eq!(stacked.data, vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0]);
    }

    #[test]
    fn test_select_batch() {
        let t = Tensor::new((0..12).map(|x| x as f32).collect(), vec![3, 2, 2]);
        let one = t.select_batch(1);
        assert_eq!(one.shape, vec![1, 2, 2]);
        assert_eq!(one.data, vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_non_finite_detection() {
        let t = Tensor::new(vec![1.0, f32::NAN, f32::INFINITY], vec![3]);
        assert!(!t.is_finite());
        assert_eq!(t.count_non_finite(), 2);
        assert!(Tensor::zeros(vec![4]).is_finite());
    }
}
