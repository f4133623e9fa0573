//! Caption Vocabulary
//!
//! Maps caption words to the integer indices shared by the embedding table
//! and the decoder's output layer.
//!
//! ## Reserved Entries
//!
//! ```text
//! 0  <start>   first input of every caption
//! 1  <end>     terminates generation, pads training batches
//! 2  <unk>     any word that fell below the frequency cutoff
//! ```
//!
//! Corpus words follow from index 3, most frequent first. Ties are broken
//! lexicographically so the same corpus always produces the same indices,
//! regardless of how counting was split across threads.
//!
//! ## Example
//!
//! ```rust
//! use scrivener::VocabularyIndex;
//!
//! let captions = ["A cat on a mat.", "A dog on a mat.", "a cat"];
//! let vocab = VocabularyIndex::build(&captions, 2);
//!
//! assert_eq!(vocab.index_of("a"), Some(3));
//! let ids = vocab.encode("a cat on a zebra");
//! assert_eq!(vocab.decode(&ids), "a cat on a <unk>");
//! ```

use crate::config::{END_TOKEN, START_TOKEN};
use crate::error::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const START_WORD: &str = "<start>";
pub const END_WORD: &str = "<end>";
pub const UNK_WORD: &str = "<unk>";
/// Reserved index of the unknown-word token.
pub const UNK_TOKEN: usize = 2;
/// Number of reserved entries at the front of every vocabulary.
pub const NUM_RESERVED: usize = 3;
/// Default minimum number of occurrences for a word to be kept.
pub const DEFAULT_MIN_COUNT: usize = 3;

/// Split a caption into lowercase word tokens
///
/// Every character that is neither alphanumeric nor an apostrophe acts as
/// a separator.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bidirectional word <-> index mapping
///
/// Read-only after construction. Persisted as JSON holding the ordered word
/// list; the reverse map is rebuilt on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VocabFile", into = "VocabFile")]
pub struct VocabularyIndex {
    word_to_index: HashMap<String, usize>,
    index_to_word: Vec<String>,
    min_count: usize,
}

/// On-disk form of a vocabulary
#[derive(Serialize, Deserialize)]
struct VocabFile {
    min_count: usize,
    words: Vec<String>,
}

impl From<VocabularyIndex> for VocabFile {
    fn from(vocab: VocabularyIndex) -> Self {
        Self {
            min_count: vocab.min_count,
            words: vocab.index_to_word,
        }
    }
}

impl TryFrom<VocabFile> for VocabularyIndex {
    type Error = String;

    fn try_from(file: VocabFile) -> std::result::Result<Self, Self::Error> {
        let reserved = [START_WORD, END_WORD, UNK_WORD];
        if file.words.len() < NUM_RESERVED
            || file.words[..NUM_RESERVED].iter().map(String::as_str).ne(reserved)
        {
            return Err(format!(
                "vocabulary must start with {:?}",
                reserved
            ));
        }

        let mut word_to_index = HashMap::with_capacity(file.words.len());
        for (index, word) in file.words.iter().enumerate() {
            if word_to_index.insert(word.clone(), index).is_some() {
                return Err(format!("duplicate vocabulary word {:?}", word));
            }
        }

        Ok(Self {
            word_to_index,
            index_to_word: file.words,
            min_count: file.min_count,
        })
    }
}

impl VocabularyIndex {
    /// Build a vocabulary from a caption corpus
    ///
    /// Words occurring fewer than `min_count` times are dropped and will
    /// encode as `<unk>`.
    pub fn build<S: AsRef<str> + Sync>(captions: &[S], min_count: usize) -> Self {
        let counts: HashMap<String, usize> = captions
            .par_iter()
            .fold(HashMap::new, |mut local, caption| {
                for word in tokenize(caption.as_ref()) {
                    *local.entry(word).or_insert(0) += 1;
                }
                local
            })
            .reduce(HashMap::new, |mut a, b| {
                for (word, count) in b {
                    *a.entry(word).or_insert(0) += count;
                }
                a
            });

        let total_words = counts.len();
        let mut kept: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(word, count)| *count >= min_count && !is_reserved_word(word))
            .collect();
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut index_to_word: Vec<String> = [START_WORD, END_WORD, UNK_WORD]
            .iter()
            .map(|w| w.to_string())
            .collect();
        index_to_word.extend(kept.into_iter().map(|(word, _)| word));

        let word_to_index = index_to_word
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();

        tracing::info!(
            captions = captions.len(),
            distinct_words = total_words,
            kept = index_to_word.len() - NUM_RESERVED,
            min_count,
            "built caption vocabulary"
        );

        Self {
            word_to_index,
            index_to_word,
            min_count,
        }
    }

    /// Number of entries, reserved markers included
    pub fn len(&self) -> usize {
        self.index_to_word.len()
    }

    /// Always false: the reserved markers are present in every vocabulary
    pub fn is_empty(&self) -> bool {
        self.index_to_word.is_empty()
    }

    pub fn min_count(&self) -> usize {
        self.min_count
    }

    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.word_to_index.get(word).copied()
    }

    pub fn word_of(&self, index: usize) -> Option<&str> {
        self.index_to_word.get(index).map(String::as_str)
    }

    /// Encode caption text to word indices (no start/end markers)
    pub fn encode(&self, text: &str) -> Vec<usize> {
        tokenize(text)
            .iter()
            .map(|word| self.index_of(word).unwrap_or(UNK_TOKEN))
            .collect()
    }

    /// Encode caption text wrapped as `[<start>, words..., <end>]`
    pub fn encode_caption(&self, text: &str) -> Vec<usize> {
        let mut ids = vec![START_TOKEN];
        ids.extend(self.encode(text));
        ids.push(END_TOKEN);
        ids
    }

    /// Turn indices back into a space-separated caption
    ///
    /// `<start>` is skipped, decoding stops at the first `<end>`, and
    /// indices outside the vocabulary are ignored.
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter()
            .copied()
            .take_while(|&id| id != END_TOKEN)
            .filter(|&id| id != START_TOKEN)
            .filter_map(|id| self.word_of(id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Save vocabulary to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        tracing::debug!(path = %path.as_ref().display(), size = self.len(), "saved vocabulary");
        Ok(())
    }

    /// Load vocabulary from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let vocab: VocabularyIndex = serde_json::from_str(&json)?;
        tracing::debug!(path = %path.as_ref().display(), size = vocab.len(), "loaded vocabulary");
        Ok(vocab)
    }

    pub fn stats(&self) -> VocabStats {
        VocabStats {
            vocab_size: self.len(),
            corpus_words: self.len() - NUM_RESERVED,
            reserved: NUM_RESERVED,
            min_count: self.min_count,
        }
    }
}

fn is_reserved_word(word: &str) -> bool {
    matches!(word, START_WORD | END_WORD | UNK_WORD)
}

/// Statistics about a vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabStats {
    /// Total entries (reserved + corpus words)
    pub vocab_size: usize,
    /// Words kept from the corpus
    pub corpus_words: usize,
    /// Reserved markers (start, end, unk)
    pub reserved: usize,
    /// Frequency cutoff used at build time
    pub min_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<&'static str> {
        vec![
            "A man riding a horse.",
            "A man is riding a brown horse!",
            "Two dogs play in the park",
            "a dog runs in the park",
            "The man's horse",
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("The man's  HORSE, runs!"),
            vec!["the", "man's", "horse", "runs"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_reserved_indices() {
        let vocab = VocabularyIndex::build(&corpus(), 1);
        assert_eq!(vocab.index_of(START_WORD), Some(START_TOKEN));
        assert_eq!(vocab.index_of(END_WORD), Some(END_TOKEN));
        assert_eq!(vocab.index_of(UNK_WORD), Some(UNK_TOKEN));
    }

    #[test]
    fn test_min_count_cutoff_and_ordering() {
        let vocab = VocabularyIndex::build(&corpus(), 2);
        // counts: a=5, man=2, horse=3, riding=2, the=3, park=2, in=2
        assert_eq!(vocab.index_of("a"), Some(3));
        assert_eq!(vocab.index_of("horse"), Some(4));
        assert_eq!(vocab.index_of("the"), Some(5));
        assert_eq!(vocab.index_of("in"), Some(6));
        assert!(vocab.index_of("brown").is_none());
        assert!(vocab.index_of("two").is_none());
        assert_eq!(vocab.stats().corpus_words, vocab.len() - 3);
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = VocabularyIndex::build(&corpus(), 1);
        let b = VocabularyIndex::build(&corpus(), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_decode() {
        let vocab = VocabularyIndex::build(&corpus(), 2);
        let ids = vocab.encode_caption("A man riding a zebra");
        assert_eq!(ids.first(), Some(&START_TOKEN));
        assert_eq!(ids.last(), Some(&END_TOKEN));
        assert_eq!(ids[5], UNK_TOKEN);
        assert_eq!(vocab.decode(&ids), "a man riding a <unk>");
    }

    #[test]
    fn test_decode_stops_at_end_and_skips_unknown_ids() {
        let vocab = VocabularyIndex::build(&corpus(), 2);
        let a = vocab.index_of("a").unwrap();
        let horse = vocab.index_of("horse").unwrap();
        assert_eq!(vocab.decode(&[a, 9999, horse, END_TOKEN, a]), "a horse");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let vocab = VocabularyIndex::build(&corpus(), 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");

        vocab.save(&path).unwrap();
        let loaded = VocabularyIndex::load(&path).unwrap();

        assert_eq!(loaded, vocab);
        for word in ["a", "man", "horse", "the", "park", "riding", "in"] {
            assert_eq!(loaded.index_of(word), vocab.index_of(word), "{}", word);
        }
    }

    #[test]
    fn test_load_rejects_missing_reserved_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"min_count": 1, "words": ["cat", "<end>", "<unk>"]}"#).unwrap();
        assert!(VocabularyIndex::load(&path).is_err());

        fs::write(
            &path,
            r#"{"min_count": 1, "words": ["<start>", "<end>", "<unk>", "cat", "cat"]}"#,
        )
        .unwrap();
        assert!(VocabularyIndex::load(&path).is_err());
    }
}
