//! Training parameters.

use std::path::PathBuf;

use crate::error::Error;
use crate::unigram::TABLE_SIZE;
use crate::vocab::VOCAB_HASH_SIZE;
use crate::{real, DEFAULT_SEED};

/// Where the semantic projections come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionSource {
    /// One line per word: the word, then whitespace-separated weights.
    Text(PathBuf),
    /// The word, a space, packed little-endian `f32` weights, a newline.
    Binary(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Header line, word vectors, semantic vectors, output weights. Can be
    /// read back as a checkpoint.
    #[default]
    Text,
    /// The whole model in bincode format.
    Bincode,
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub train_file: PathBuf,
    /// Without an output file, training stops after the vocabulary and the
    /// projections are processed.
    pub output_file: Option<PathBuf>,
    pub output_format: OutputFormat,
    /// Size of the word vectors.
    pub dim: usize,
    /// Max skip length between words.
    pub window: usize,
    /// Subsampling threshold; 0 disables subsampling.
    pub sample: real,
    /// Also train with hierarchical softmax.
    pub hs: bool,
    /// Number of negative examples per context pair; 0 disables negative sampling.
    pub negative: usize,
    pub threads: usize,
    /// Number of passes over the training data.
    pub iter: usize,
    pub min_count: u64,
    /// Starting learning rate. Taken from the checkpoint if unset, else 0.025.
    pub alpha: Option<real>,
    /// Number of semantic basis vectors.
    pub basis_count: usize,
    pub save_vocab_file: Option<PathBuf>,
    pub read_vocab_file: Option<PathBuf>,
    pub projection: Option<ProjectionSource>,
    /// Where to save the matched projection rows before normalization.
    pub projection_snapshot: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub seed: u64,
    /// Stop all workers once overall progress passes this percentage.
    pub early_stop: Option<real>,
    pub table_size: usize,
    pub hash_size: usize,
    /// Draw a progress bar on the terminal.
    pub progress: bool,
}

pub const DEFAULT_ALPHA: real = 0.025;

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            train_file: PathBuf::new(),
            output_file: None,
            output_format: OutputFormat::Text,
            dim: 100,
            window: 5,
            sample: 1e-3,
            hs: false,
            negative: 5,
            threads: 12,
            iter: 5,
            min_count: 5,
            alpha: None,
            basis_count: 1000,
            save_vocab_file: None,
            read_vocab_file: None,
            projection: None,
            projection_snapshot: None,
            checkpoint: None,
            seed: DEFAULT_SEED,
            early_stop: None,
            table_size: TABLE_SIZE,
            hash_size: VOCAB_HASH_SIZE,
            progress: false,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let positive = [
            ("size", self.dim),
            ("window", self.window),
            ("threads", self.threads),
            ("iter", self.iter),
            ("semantic-num", self.basis_count),
            ("table size", self.table_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        if self.hash_size < 4 {
            return Err(Error::InvalidConfig(
                "hash size must be at least 4".to_string(),
            ));
        }
        if self.sample < 0.0 {
            return Err(Error::InvalidConfig("sample must not be negative".to_string()));
        }
        if let Some(alpha) = self.alpha {
            if alpha <= 0.0 {
                return Err(Error::InvalidConfig("alpha must be positive".to_string()));
            }
        }
        if let Some(p) = self.early_stop {
            if !(0.0..=100.0).contains(&p) {
                return Err(Error::InvalidConfig(
                    "early stop must be a percentage".to_string(),
                ));
            }
        }
        if self.negative == 0 && !self.hs {
            return Err(Error::InvalidConfig(
                "need negative sampling or hierarchical softmax".to_string(),
            ));
        }
        if self.projection.is_none() {
            return Err(Error::NoProjectionSource);
        }
        Ok(())
    }
}
