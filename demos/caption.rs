//! Caption Decoder Walkthrough
//!
//! Builds a vocabulary from a caption corpus, runs the attention decoder
//! over synthetic image features in training mode (scheduled sampling +
//! masked loss), captions a few examples greedily, and round-trips the
//! model through a checkpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Built-in sample captions
//! cargo run --release --example caption
//!
//! # Your own corpus, one caption per line
//! cargo run --release --example caption -- --corpus captions.txt --min-count 3
//!
//! # Batch entries on the Rayon pool, more logging
//! RUST_LOG=scrivener=debug cargo run --release --example caption -- --parallel
//! ```
//!
//! The weights are untrained, so the captions are noise; the point is the
//! data flow.

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scrivener::{
    masked_cross_entropy, perplexity, stack_features, CaptionDataLoader, Checkpoint,
    DecoderConfig, Device, FeedbackPolicy, SequenceDecoder, Tensor, VocabularyIndex,
};
use std::fs;
use std::path::PathBuf;

const SAMPLE_CAPTIONS: &[&str] = &[
    "A man riding a horse on a beach.",
    "A dog runs across the grass.",
    "Two dogs play with a ball in the park.",
    "A cat sleeping on a red couch.",
    "A man is riding a brown horse.",
    "A small dog jumps over a log.",
    "A cat sits on a window sill.",
    "Two men ride horses along the beach.",
    "A black dog runs through the park.",
    "A woman holds a cat in her arms.",
];

#[derive(Parser)]
#[command(name = "caption", about = "Attention LSTM caption decoder walkthrough")]
struct Args {
    /// Caption corpus, one caption per line (defaults to built-in samples)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Minimum word count to enter the vocabulary
    #[arg(long, default_value_t = 2)]
    min_count: usize,

    /// Captions per training batch
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Feature slots per synthetic image (e.g. 49 for a 7x7 grid)
    #[arg(long, default_value_t = 9)]
    slots: usize,

    /// Scheduled-sampling probability for steps after the first
    #[arg(long, default_value_t = 0.5)]
    sample_prob: f32,

    /// Draw fed-back tokens instead of taking the arg-max
    #[arg(long)]
    sample_feedback: bool,

    /// Greedy caption length cap
    #[arg(long, default_value_t = 12)]
    max_len: usize,

    /// Dispatch batch entries across the Rayon pool
    #[arg(long)]
    parallel: bool,

    /// Seed for weights, features, and sampling
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Where to write the checkpoint
    #[arg(long)]
    checkpoint: Option<PathBuf>,
}

/// Stand-in for an image encoder: a deterministic `[1, slots, dim]` map per example
fn synthetic_features(index: usize, slots: usize, dim: usize, seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
    let data = (0..slots * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    Tensor::new(data, vec![1, slots, dim])
}

fn main() -> scrivener::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let captions: Vec<String> = match &args.corpus {
        Some(path) => fs::read_to_string(path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        None => SAMPLE_CAPTIONS.iter().map(|s| s.to_string()).collect(),
    };

    // Vocabulary
    let vocab = VocabularyIndex::build(&captions, args.min_count);
    let stats = vocab.stats();
    println!(
        "Vocabulary: {} entries ({} corpus words, min count {})",
        stats.vocab_size, stats.corpus_words, stats.min_count
    );
    let encoded: Vec<Vec<usize>> = captions.iter().map(|c| vocab.encode(c)).collect();

    // Decoder
    let mut config = DecoderConfig::tiny(vocab.len());
    config.sample_prob = args.sample_prob;
    config.max_sentence = args.max_len;
    config.seed = args.seed;
    config.check_numerics = true;
    if args.sample_feedback {
        config.feedback = FeedbackPolicy::Sample;
    }
    if args.parallel {
        config.device = Device::CpuParallel;
    }
    let num_features = config.num_features;
    let decoder = SequenceDecoder::new(config)?;
    println!("Decoder: {} parameters", decoder.num_parameters());

    let features: Vec<Tensor> = (0..captions.len())
        .map(|i| synthetic_features(i, args.slots, num_features, args.seed))
        .collect();

    // One epoch of training-mode forward passes
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut loader = CaptionDataLoader::new(encoded, args.batch_size)?;
    println!("\nTraining-mode forward ({} batches):", loader.num_batches());
    let mut batch_num = 0;
    while let Some((indices, batch)) = loader.next_batch() {
        let maps: Vec<Tensor> = indices.iter().map(|&i| features[i].clone()).collect();
        let feature_batch = stack_features(&maps)?;

        let out = decoder.forward(&batch.inputs, &feature_batch, &mut rng)?;
        let loss = masked_cross_entropy(&out.logits, &batch.targets, &batch.lengths)?;
        let sampled = out
            .token_sources
            .iter()
            .filter(|&&s| s == scrivener::TokenSource::Predicted)
            .count();

        batch_num += 1;
        println!(
            "  batch {:>2}: {} captions x {} steps, loss {:.4}, perplexity {:>7.2}, {} self-fed steps",
            batch_num,
            batch.batch_size(),
            batch.seq_len(),
            loss,
            perplexity(loss),
            sampled
        );
    }

    // Greedy captions
    let shown = features.len().min(3);
    let generated = decoder.caption_batch(&features[..shown], None)?;
    println!("\nGreedy captions (untrained weights):");
    for (i, caption) in generated.iter().enumerate() {
        caption.check_finite()?;
        let peak_slots: Vec<usize> = caption
            .attention_weights
            .iter()
            .map(|w| Tensor::new(w.clone(), vec![w.len()]).argmax_last()[0])
            .collect();
        println!("  reference: {}", captions[i]);
        println!(
            "  generated: {} ({} tokens, {})",
            vocab.decode(&caption.tokens),
            caption.tokens.len(),
            if caption.finished { "ended" } else { "hit length cap" }
        );
        println!("  attended slots: {:?}", peak_slots);
    }

    // Checkpoint round trip
    let path = args
        .checkpoint
        .unwrap_or_else(|| std::env::temp_dir().join("scrivener_demo.ckpt"));
    let checkpoint = Checkpoint {
        decoder,
        vocab: Some(vocab),
        epoch: 1,
        step: batch_num,
        best_val_loss: f32::INFINITY,
    };
    checkpoint.save(&path)?;

    let restored = Checkpoint::load(&path)?;
    let again = restored.decoder.caption_batch(&features[..shown], None)?;
    println!(
        "\nCheckpoint {}: reloaded decoder reproduces captions: {}",
        path.display(),
        again == generated
    );

    Ok(())
}
