//! Sequence Loss
//!
//! Cross-entropy of decoder logits against target captions, averaged over
//! the real (unpadded) positions only.
//!
//! ```text
//! loss = -1/N Σ_b Σ_{t < lengths[b]} log softmax(logits[b, t])[targets[b][t]]
//! N    = Σ_b lengths[b]
//! ```

use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;

/// Masked cross-entropy over `[batch, seq_len, vocab]` logits
///
/// Positions at or beyond `lengths[b]` are ignored.
pub fn masked_cross_entropy(logits: &Tensor, targets: &[Vec<usize>], lengths: &[usize]) -> Result<f32> {
    if logits.rank() != 3 {
        return Err(CaptionError::Validation(format!(
            "logits must be [batch, seq_len, vocab], got {:?}",
            logits.shape
        )));
    }
    let batch = logits.shape[0];
    let seq_len = logits.shape[1];
    let vocab_size = logits.shape[2];

    if targets.len() != batch || lengths.len() != batch {
        return Err(CaptionError::Validation(format!(
            "{} target rows and {} lengths for a batch of {}",
            targets.len(),
            lengths.len(),
            batch
        )));
    }

    let mut total_loss = 0.0;
    let mut count = 0usize;
    for (b, (row, &len)) in targets.iter().zip(lengths).enumerate() {
        if len > seq_len || row.len() < len {
            return Err(CaptionError::Validation(format!(
                "length {} of caption {} exceeds its targets ({}) or seq_len {}",
                len,
                b,
                row.len(),
                seq_len
            )));
        }

        for (t, &target) in row[..len].iter().enumerate() {
            if target >= vocab_size {
                return Err(CaptionError::Validation(format!(
                    "target {} at ({}, {}) outside vocabulary of {}",
                    target, b, t, vocab_size
                )));
            }
            let start = (b * seq_len + t) * vocab_size;
            let logits_slice = &logits.data[start..start + vocab_size];

            let max_logit = logits_slice
                .iter()
                .fold(f32::NEG_INFINITY, |a, &x| a.max(x));
            let exp_sum: f32 = logits_slice.iter().map(|&x| (x - max_logit).exp()).sum();
            let log_prob = (logits_slice[target] - max_logit) - exp_sum.ln();

            total_loss -= log_prob;
            count += 1;
        }
    }

    if count == 0 {
        return Err(CaptionError::Validation(
            "no unmasked positions to average over".to_string(),
        ));
    }
    Ok(total_loss / count as f32)
}

/// Perplexity of an average cross-entropy loss
pub fn perplexity(loss: f32) -> f32 {
    loss.exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_logits_give_log_vocab() {
        let logits = Tensor::zeros(vec![2, 3, 5]);
        let targets = vec![vec![0, 1, 2], vec![3, 4, 1]];
        let loss = masked_cross_entropy(&logits, &targets, &[3, 2]).unwrap();
        assert!((loss - 5.0f32.ln()).abs() < 1e-5);
        assert!((perplexity(loss) - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_padding_is_ignored() {
        // One caption, two real steps predicted confidently, one padded step
        // where the logits are badly wrong
        let mut data = vec![0.0; 3 * 4];
        data[2] = 20.0; // t = 0 -> 2
        data[4 + 3] = 20.0; // t = 1 -> 3
        data[8] = 20.0; // t = 2 padded, target 1
        let logits = Tensor::new(data, vec![1, 3, 4]);

        let loss = masked_cross_entropy(&logits, &[vec![2, 3, 1]], &[2]).unwrap();
        assert!(loss < 1e-6);
        let unmasked = masked_cross_entropy(&logits, &[vec![2, 3, 1]], &[3]).unwrap();
        assert!(unmasked > 5.0);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let logits = Tensor::zeros(vec![1, 2, 3]);
        assert!(masked_cross_entropy(&logits, &[vec![0, 3]], &[2]).is_err());
        assert!(masked_cross_entropy(&logits, &[vec![0, 1]], &[3]).is_err());
        assert!(masked_cross_entropy(&logits, &[vec![0, 1]], &[0]).is_err());
        assert!(masked_cross_entropy(&logits, &[vec![0, 1], vec![0, 1]], &[2, 2]).is_err());
        assert!(masked_cross_entropy(&Tensor::zeros(vec![2, 3]), &[vec![0]], &[1]).is_err());
    }
}
