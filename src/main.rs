use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use tracing_subscriber::EnvFilter;

use sememe2vec::{real, OutputFormat, ProjectionSource, TrainConfig, DEFAULT_SEED};

#[derive(Parser)]
#[command(
    about = "Train word vectors, tying listed words to shared semantic basis vectors",
    long_about = None,
    version
)]
#[command(group(ArgGroup::new("projection").required(true).multiple(false)))]
struct Options {
    /// Use text data from FILE to train the model
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Use FILE to save the resulting vectors; without it, only the
    /// vocabulary and the projections are processed
    #[arg(long = "output", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Set size of word vectors; default is 100
    #[arg(long = "size", default_value_t = 100)]
    dim: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; default
    /// is 1e-3, useful range is (0, 1e-5)
    #[arg(long, default_value_t = 1e-3)]
    sample: real,

    /// Use Hierarchical Softmax
    #[arg(long)]
    hs: bool,

    /// Number of negative examples; default is 5, common values are 3 - 10 (0 = not used)
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Use N threads
    #[arg(long = "threads", value_name = "N", default_value_t = 12)]
    threads: usize,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Set the starting learning rate; default is 0.025, or the rate stored
    /// in the checkpoint
    #[arg(long)]
    alpha: Option<real>,

    /// Number of semantic basis vectors
    #[arg(long = "semantic-num", value_name = "N", default_value_t = 1000)]
    basis_count: usize,

    /// Read word projections onto the semantic basis from FILE (text)
    #[arg(long = "semantic", value_name = "FILE", group = "projection")]
    semantic: Option<PathBuf>,

    /// Read word projections onto the semantic basis from FILE (binary)
    #[arg(long = "semantic-fast", value_name = "FILE", group = "projection")]
    semantic_fast: Option<PathBuf>,

    /// Save the projections of the vocabulary words to FILE (binary, before
    /// normalization)
    #[arg(long = "save-semantic", value_name = "FILE")]
    projection_snapshot: Option<PathBuf>,

    /// Start from the weights saved in FILE
    #[arg(long, value_name = "FILE")]
    checkpoint: Option<PathBuf>,

    /// Stop training once this percentage of the work is done
    #[arg(long = "early-stop", value_name = "PERCENT")]
    early_stop: Option<real>,

    /// Seed for weight initialization and sampling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Set the debug mode (0 = warnings only, 1 = info, 2 = more info during training)
    #[arg(long = "debug", default_value_t = 2)]
    debug_mode: usize,

    /// Save the model in bincode format
    #[arg(long)]
    bincode: bool,

    /// The vocabulary will be saved to FILE
    #[arg(long = "save-vocab", value_name = "FILE")]
    save_vocab_file: Option<PathBuf>,

    /// The vocabulary will be read from FILE, not constructed from the training data
    #[arg(long = "read-vocab", value_name = "FILE")]
    read_vocab_file: Option<PathBuf>,
}

impl Options {
    fn into_config(self) -> TrainConfig {
        let projection = match (self.semantic, self.semantic_fast) {
            (Some(path), _) => Some(ProjectionSource::Text(path)),
            (None, Some(path)) => Some(ProjectionSource::Binary(path)),
            (None, None) => None,
        };
        TrainConfig {
            train_file: self.train_file,
            output_file: self.output_file,
            output_format: if self.bincode {
                OutputFormat::Bincode
            } else {
                OutputFormat::Text
            },
            dim: self.dim,
            window: self.window,
            sample: self.sample,
            hs: self.hs,
            negative: self.negative,
            threads: self.threads,
            iter: self.iter,
            min_count: self.min_count,
            alpha: self.alpha,
            basis_count: self.basis_count,
            save_vocab_file: self.save_vocab_file,
            read_vocab_file: self.read_vocab_file,
            projection,
            projection_snapshot: self.projection_snapshot,
            checkpoint: self.checkpoint,
            seed: self.seed,
            early_stop: self.early_stop,
            progress: self.debug_mode > 1,
            ..TrainConfig::default()
        }
    }
}

fn init_logging(debug_mode: usize) -> Result<()> {
    let level = match debug_mode {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() {
    let options = Options::parse();
    if let Err(err) = init_logging(options.debug_mode) {
        eprintln!("{err:#}");
        process::exit(1);
    }
    if let Err(err) = sememe2vec::run(options.into_config()) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
