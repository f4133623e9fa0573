//! Caption Batching
//!
//! Turns encoded captions into the shifted input/target sequences the
//! decoder trains on.
//!
//! ## How Sequences Are Built
//!
//! ```text
//! Words:    [w1, w2, w3]
//!
//! Input:    [<start>, w1, w2, w3]
//! Target:   [w1, w2, w3, <end>]
//! Length:   4
//! ```
//!
//! The target is the input shifted by one position. Shorter captions in a
//! batch are padded with `<end>` up to the longest one; `lengths` records
//! where each caption really stops so the loss can ignore the padding.
//!
//! ## Example
//!
//! ```rust
//! use scrivener::{CaptionDataLoader, VocabularyIndex};
//!
//! let corpus = ["a dog runs", "a cat sits on a mat", "a dog sits"];
//! let vocab = VocabularyIndex::build(&corpus, 1);
//! let encoded: Vec<Vec<usize>> = corpus.iter().map(|c| vocab.encode(c)).collect();
//!
//! let mut loader = CaptionDataLoader::new(encoded, 2).unwrap();
//! while let Some((indices, batch)) = loader.next_batch() {
//!     // indices select the matching FeatureMaps
//!     assert_eq!(indices.len(), batch.inputs.len());
//! }
//! ```

use crate::config::{END_TOKEN, START_TOKEN};
use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;

/// One batch of teacher-forced training sequences
///
/// `inputs` and `targets` are `[batch][seq_len]`; `lengths[i]` is the number
/// of real (unpadded) positions of caption `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptionBatch {
    pub inputs: Vec<Vec<usize>>,
    pub targets: Vec<Vec<usize>>,
    pub lengths: Vec<usize>,
}

impl CaptionBatch {
    /// Build a batch from encoded captions (word indices without markers)
    ///
    /// With `max_len`, sequences are cut to at most `max_len` positions.
    pub fn from_captions(encoded: &[Vec<usize>], max_len: Option<usize>) -> Result<Self> {
        if encoded.is_empty() {
            return Err(CaptionError::Validation(
                "cannot build a batch from zero captions".to_string(),
            ));
        }
        if max_len == Some(0) {
            return Err(CaptionError::Validation(
                "max_len must be at least 1".to_string(),
            ));
        }
        let captions: Vec<&[usize]> = encoded.iter().map(Vec::as_slice).collect();
        Ok(Self::build(&captions, max_len))
    }

    fn build(captions: &[&[usize]], max_len: Option<usize>) -> Self {
        let word_limit = max_len.map_or(usize::MAX, |m| m - 1);
        let lengths: Vec<usize> = captions
            .iter()
            .map(|words| words.len().min(word_limit) + 1)
            .collect();
        let seq_len = lengths.iter().copied().max().unwrap_or(1);

        let mut inputs = Vec::with_capacity(captions.len());
        let mut targets = Vec::with_capacity(captions.len());
        for (words, &len) in captions.iter().zip(&lengths) {
            let words = &words[..len - 1];

            let mut input = Vec::with_capacity(seq_len);
            input.push(START_TOKEN);
            input.extend_from_slice(words);
            input.resize(seq_len, END_TOKEN);

            let mut target = Vec::with_capacity(seq_len);
            target.extend_from_slice(words);
            target.resize(seq_len, END_TOKEN);

            inputs.push(input);
            targets.push(target);
        }

        Self {
            inputs,
            targets,
            lengths,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.inputs.len()
    }

    pub fn seq_len(&self) -> usize {
        self.inputs.first().map_or(0, Vec::len)
    }
}

/// Sequential batcher over a set of encoded captions
///
/// Each call to [`next_batch`](Self::next_batch) yields the example indices
/// of the batch (to gather the matching FeatureMaps) together with its
/// [`CaptionBatch`]. The last batch of an epoch may be smaller.
pub struct CaptionDataLoader {
    captions: Vec<Vec<usize>>,
    batch_size: usize,
    max_len: Option<usize>,
    position: usize,
}

impl CaptionDataLoader {
    pub fn new(captions: Vec<Vec<usize>>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(CaptionError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        tracing::debug!(captions = captions.len(), batch_size, "caption loader ready");
        Ok(Self {
            captions,
            batch_size,
            max_len: None,
            position: 0,
        })
    }

    /// Cut every sequence to at most `max_len` positions
    pub fn with_max_len(mut self, max_len: usize) -> Result<Self> {
        if max_len == 0 {
            return Err(CaptionError::Configuration(
                "max_len must be at least 1".to_string(),
            ));
        }
        self.max_len = Some(max_len);
        Ok(self)
    }

    /// Get the next batch
    ///
    /// Returns `None` once the epoch is complete and rewinds for the next one.
    pub fn next_batch(&mut self) -> Option<(Vec<usize>, CaptionBatch)> {
        if self.position >= self.captions.len() {
            self.position = 0;
            return None;
        }

        let end = (self.position + self.batch_size).min(self.captions.len());
        let indices: Vec<usize> = (self.position..end).collect();
        let slices: Vec<&[usize]> = self.captions[self.position..end]
            .iter()
            .map(Vec::as_slice)
            .collect();
        let batch = CaptionBatch::build(&slices, self.max_len);
        self.position = end;

        Some((indices, batch))
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Number of batches in one epoch
    pub fn num_batches(&self) -> usize {
        self.captions.len().div_ceil(self.batch_size)
    }
}

/// Stack per-example FeatureMaps into one batch
///
/// Accepts `[1, slots, dim]` or `[slots, dim]` maps; all must agree on
/// `slots` and `dim`. Returns `[batch, slots, dim]`.
pub fn stack_features(maps: &[Tensor]) -> Result<Tensor> {
    let Some(first) = maps.first() else {
        return Err(CaptionError::Validation(
            "cannot stack zero feature maps".to_string(),
        ));
    };
    let slot_shape = |t: &Tensor| -> Option<Vec<usize>> {
        match t.shape.as_slice() {
            [1, s, d] | [s, d] => Some(vec![*s, *d]),
            _ => None,
        }
    };

    let expected = slot_shape(first).ok_or_else(|| {
        CaptionError::Validation(format!("feature map {:?} is not [1, slots, dim]", first.shape))
    })?;

    let mut data = Vec::with_capacity(maps.len() * first.data.len());
    for (i, map) in maps.iter().enumerate() {
        if slot_shape(map).as_ref() != Some(&expected) {
            return Err(CaptionError::Validation(format!(
                "feature map {} has shape {:?}, expected [1, {}, {}]",
                i, map.shape, expected[0], expected[1]
            )));
        }
        data.extend_from_slice(&map.data);
    }

    Ok(Tensor::new(data, vec![maps.len(), expected[0], expected[1]]))
}
