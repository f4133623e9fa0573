//! Checkpoint Persistence
//!
//! Saves a decoder, its optional vocabulary, and training progress to a
//! single binary file.
//!
//! ## File Layout
//!
//! ```text
//! "SCRIV_CKPT"                      10-byte magic
//! version                           u8 (= 1)
//! config                            u32 length + DecoderConfig JSON
//! tensors                           fixed order, see below
//! has_vocab                         u8
//! vocab                             u32 length + VocabularyIndex JSON (if present)
//! metadata                          u32 length + {epoch, step, best_val_loss} JSON
//! ```
//!
//! Each tensor is `rank: u32`, `dims: u32 × rank`, `len: u32`, then `len`
//! little-endian `f32`s. Order: embedding, attention W_a / U_a / v_a
//! (weight then bias), LSTM input and hidden projections, output layer,
//! init_h, init_c.
//!
//! Loading rebuilds the decoder through
//! [`SequenceDecoder::from_parts`], so a file whose tensors do not fit its
//! own config is rejected.

use crate::config::DecoderConfig;
use crate::decoder::SequenceDecoder;
use crate::error::{CaptionError, Result};
use crate::layers::{AttentionScorer, Embedding, Linear, LstmCell};
use crate::tensor::Tensor;
use crate::vocab::VocabularyIndex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 10] = b"SCRIV_CKPT";
const VERSION: u8 = 1;
/// Every stored tensor is a matrix or a bias vector
const MAX_TENSOR_RANK: usize = 2;

#[derive(Serialize, Deserialize)]
struct CheckpointMetadata {
    epoch: usize,
    step: usize,
    best_val_loss: f32,
}

/// Decoder weights plus training state
pub struct Checkpoint {
    pub decoder: SequenceDecoder,
    pub vocab: Option<VocabularyIndex>,
    pub epoch: usize,
    pub step: usize,
    pub best_val_loss: f32,
}

impl Checkpoint {
    /// Create a checkpoint carrying only the decoder
    pub fn inference_only(decoder: SequenceDecoder) -> Self {
        Self {
            decoder,
            vocab: None,
            epoch: 0,
            step: 0,
            best_val_loss: f32::INFINITY,
        }
    }

    /// Save checkpoint to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = BufWriter::new(File::create(path)?);

        file.write_all(MAGIC)?;
        file.write_all(&[VERSION])?;
        write_json(&mut file, self.decoder.config())?;

        for tensor in decoder_tensors(&self.decoder) {
            write_tensor(&mut file, tensor)?;
        }

        file.write_all(&[self.vocab.is_some() as u8])?;
        if let Some(vocab) = &self.vocab {
            write_json(&mut file, vocab)?;
        }

        let metadata = CheckpointMetadata {
            epoch: self.epoch,
            step: self.step,
            best_val_loss: self.best_val_loss,
        };
        write_json(&mut file, &metadata)?;
        file.flush()?;

        tracing::info!(
            path = %path.display(),
            parameters = self.decoder.num_parameters(),
            vocab = self.vocab.is_some(),
            "saved checkpoint"
        );
        Ok(())
    }

    /// Load checkpoint from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = BufReader::new(File::open(path)?);

        let mut header = [0u8; 10];
        read_exact(&mut file, &mut header)?;
        if &header != MAGIC {
            return Err(CaptionError::Checkpoint(
                "invalid header, expected SCRIV_CKPT".to_string(),
            ));
        }

        let mut version = [0u8; 1];
        read_exact(&mut file, &mut version)?;
        if version[0] != VERSION {
            return Err(CaptionError::Checkpoint(format!(
                "unsupported version {}",
                version[0]
            )));
        }

        let config: DecoderConfig = read_json(&mut file)?;

        let embedding = Embedding::from_parts(read_tensor(&mut file)?)?;
        let w_a = read_linear(&mut file)?;
        let u_a = read_linear(&mut file)?;
        let v_a = read_linear(&mut file)?;
        let attention = AttentionScorer::from_parts(w_a, u_a, v_a)?;
        let lstm = LstmCell::from_parts(read_linear(&mut file)?, read_linear(&mut file)?)?;
        let fc = read_linear(&mut file)?;
        let init_h = read_linear(&mut file)?;
        let init_c = read_linear(&mut file)?;
        let decoder =
            SequenceDecoder::from_parts(config, embedding, attention, lstm, fc, init_h, init_c)?;

        let mut has_vocab = [0u8; 1];
        read_exact(&mut file, &mut has_vocab)?;
        let vocab: Option<VocabularyIndex> = match has_vocab[0] {
            0 => None,
            1 => Some(read_json(&mut file)?),
            flag => {
                return Err(CaptionError::Checkpoint(format!(
                    "invalid vocabulary flag {}",
                    flag
                )))
            }
        };
        if let Some(vocab) = &vocab {
            if vocab.len() != decoder.config().vocab_size {
                return Err(CaptionError::Checkpoint(format!(
                    "stored vocabulary has {} words, decoder expects {}",
                    vocab.len(),
                    decoder.config().vocab_size
                )));
            }
        }

        let metadata: CheckpointMetadata = read_json(&mut file)?;

        tracing::info!(
            path = %path.display(),
            epoch = metadata.epoch,
            step = metadata.step,
            best_val_loss = metadata.best_val_loss,
            vocab = vocab.is_some(),
            "loaded checkpoint"
        );

        Ok(Self {
            decoder,
            vocab,
            epoch: metadata.epoch,
            step: metadata.step,
            best_val_loss: metadata.best_val_loss,
        })
    }
}

fn decoder_tensors(decoder: &SequenceDecoder) -> Vec<&Tensor> {
    let attention = &decoder.attention;
    let lstm = &decoder.lstm;
    vec![
        &decoder.embedding.weight,
        &attention.w_a.weight,
        &attention.w_a.bias,
        &attention.u_a.weight,
        &attention.u_a.bias,
        &attention.v_a.weight,
        &attention.v_a.bias,
        &lstm.input_proj.weight,
        &lstm.input_proj.bias,
        &lstm.hidden_proj.weight,
        &lstm.hidden_proj.bias,
        &decoder.fc.weight,
        &decoder.fc.bias,
        &decoder.init_h.weight,
        &decoder.init_h.bias,
        &decoder.init_c.weight,
        &decoder.init_c.bias,
    ]
}

fn write_tensor<W: Write>(w: &mut W, tensor: &Tensor) -> Result<()> {
    w.write_all(&(tensor.shape.len() as u32).to_le_bytes())?;
    for &dim in &tensor.shape {
        w.write_all(&(dim as u32).to_le_bytes())?;
    }
    w.write_all(&(tensor.data.len() as u32).to_le_bytes())?;
    for &val in &tensor.data {
        w.write_all(&val.to_le_bytes())?;
    }
    Ok(())
}

fn write_json<W: Write, T: Serialize>(w: &mut W, value: &T) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    w.write_all(&(json.len() as u32).to_le_bytes())?;
    w.write_all(&json)?;
    Ok(())
}

/// `read_exact` that reports a short file as a checkpoint error
fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CaptionError::Checkpoint("file is truncated".to_string()),
        _ => CaptionError::Io(e),
    })
}

fn read_u32<R: Read>(r: &mut R) -> Result<usize> {
    let mut bytes = [0u8; 4];
    read_exact(r, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes) as usize)
}

/// Read `len` bytes without trusting `len` for the allocation
fn read_bytes<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    r.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(CaptionError::Checkpoint("file is truncated".to_string()));
    }
    Ok(bytes)
}

fn read_json<R: Read, T: for<'de> Deserialize<'de>>(r: &mut R) -> Result<T> {
    let len = read_u32(r)?;
    let bytes = read_bytes(r, len)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn read_tensor<R: Read>(r: &mut R) -> Result<Tensor> {
    let rank = read_u32(r)?;
    if rank > MAX_TENSOR_RANK {
        return Err(CaptionError::Checkpoint(format!(
            "unsupported tensor rank {}",
            rank
        )));
    }
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(read_u32(r)?);
    }

    let len = read_u32(r)?;
    let elements = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            CaptionError::Checkpoint(format!("tensor shape {:?} overflows", shape))
        })?;
    if elements != len {
        return Err(CaptionError::Checkpoint(format!(
            "tensor of shape {:?} cannot hold {} values",
            shape, len
        )));
    }

    let byte_len = len.checked_mul(4).ok_or_else(|| {
        CaptionError::Checkpoint(format!("tensor of {} values is too large", len))
    })?;
    let bytes = read_bytes(r, byte_len)?;
    let data = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(Tensor::new(data, shape))
}

fn read_linear<R: Read>(r: &mut R) -> Result<Linear> {
    let weight = read_tensor(r)?;
    let bias = read_tensor(r)?;
    Linear::from_parts(weight, bias)
}
