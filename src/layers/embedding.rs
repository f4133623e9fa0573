//! Token Embedding
//!
//! A lookup table of shape `[vocab_size, embedding_dim]`: row `i` is the
//! vector fed to the decoder when token `i` is its input. The same table
//! serves ground-truth tokens during training and fed-back predictions
//! during scheduled sampling and greedy decoding.

use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;
use crate::vocab::VocabularyIndex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;

/// Embedding table
#[derive(Clone, Debug)]
pub struct Embedding {
    /// Embedding weight matrix: [vocab_size, embedding_dim]
    pub weight: Tensor,
}

impl Embedding {
    /// Create a new embedding layer
    ///
    /// Weights are drawn from N(0, 0.02) with a seeded generator.
    pub fn new(vocab_size: usize, embedding_dim: usize, seed: u64) -> Result<Self> {
        let normal = Normal::new(0.0, 0.02)
            .map_err(|e| CaptionError::Configuration(format!("embedding init: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let weight_data: Vec<f32> = (0..vocab_size * embedding_dim)
            .map(|_| normal.sample(&mut rng))
            .collect();

        Ok(Self {
            weight: Tensor::new(weight_data, vec![vocab_size, embedding_dim]),
        })
    }

    /// Build from an explicit `[vocab_size, embedding_dim]` table
    pub fn from_parts(weight: Tensor) -> Result<Self> {
        if weight.rank() != 2 {
            return Err(CaptionError::Configuration(format!(
                "embedding table must be 2-D, got {:?}",
                weight.shape
            )));
        }
        Ok(Self { weight })
    }

    /// Seed rows from pretrained word vectors
    ///
    /// Every vocabulary word found in `vectors` gets that vector; the rest
    /// (reserved markers included) keep their random initialization.
    pub fn from_word_vectors(
        vocab: &VocabularyIndex,
        vectors: &HashMap<String, Vec<f32>>,
        embedding_dim: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut embedding = Self::new(vocab.len(), embedding_dim, seed)?;
        let mut seeded = 0;

        for (word, vector) in vectors {
            let Some(index) = vocab.index_of(word) else {
                continue;
            };
            if vector.len() != embedding_dim {
                return Err(CaptionError::Configuration(format!(
                    "word vector for {:?} has {} dims, expected {}",
                    word,
                    vector.len(),
                    embedding_dim
                )));
            }
            let start = index * embedding_dim;
            embedding.weight.data[start..start + embedding_dim].copy_from_slice(vector);
            seeded += 1;
        }

        tracing::debug!(seeded, vocab_size = vocab.len(), "seeded embedding rows from word vectors");
        Ok(embedding)
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.shape[1]
    }

    /// Look up one row per token: `[n] -> [n, embedding_dim]`
    pub fn lookup(&self, token_ids: &[usize]) -> Result<Tensor> {
        let dim = self.embedding_dim();
        let mut output = Vec::with_capacity(token_ids.len() * dim);

        for &token_id in token_ids {
            if token_id >= self.vocab_size() {
                return Err(CaptionError::Validation(format!(
                    "token id {} out of vocab range (vocab_size = {})",
                    token_id,
                    self.vocab_size()
                )));
            }
            let start = token_id * dim;
            output.extend_from_slice(&self.weight.data[start..start + dim]);
        }

        Ok(Tensor::new(output, vec![token_ids.len(), dim]))
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_rows() {
        let table = Tensor::new((0..6).map(|v| v as f32).collect(), vec![3, 2]);
        let embedding = Embedding::from_parts(table).unwrap();
        let rows = embedding.lookup(&[2, 0, 2]).unwrap();
        assert_eq!(rows.shape, vec![3, 2]);
        assert_eq!(rows.data, vec![4.0, 5.0, 0.0, 1.0, 4.0, 5.0]);
    }

    #[test]
    fn test_lookup_out_of_range_is_validation_error() {
        let embedding = Embedding::new(3, 4, 0).unwrap();
        assert!(matches!(
            embedding.lookup(&[3]),
            Err(CaptionError::Validation(_))
        ));
    }

    #[test]
    fn test_init_is_seeded() {
        let a = Embedding::new(5, 4, 11).unwrap();
        let b = Embedding::new(5, 4, 11).unwrap();
        assert_eq!(a.weight, b.weight);
        assert!(a.weight.data.iter().all(|v| v.abs() < 0.2));
    }

    #[test]
    fn test_from_word_vectors() {
        let vocab = VocabularyIndex::build(&["a cat", "a cat", "a dog"], 2);
        let mut vectors = HashMap::new();
        vectors.insert("cat".to_string(), vec![1.0, 2.0]);
        vectors.insert("zebra".to_string(), vec![9.0, 9.0]);

        let embedding = Embedding::from_word_vectors(&vocab, &vectors, 2, 0).unwrap();
        let cat = vocab.index_of("cat").unwrap();
        assert_eq!(embedding.lookup(&[cat]).unwrap().data, vec![1.0, 2.0]);

        vectors.insert("a".to_string(), vec![1.0]);
        assert!(Embedding::from_word_vectors(&vocab, &vectors, 2, 0).is_err());
    }
}
