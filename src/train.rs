//! Drives a training run: vocabulary, projections, weights, worker threads,
//! output.

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::{OutputFormat, TrainConfig, DEFAULT_ALPHA};
use crate::model::Embeddings;
use crate::projection::ProjectionStore;
use crate::sigmoid::ExpTable;
use crate::unigram::UnigramTable;
use crate::vocab::Vocabulary;
use crate::worker::{Shared, Worker};
use crate::{real, Error};

/// Result of [`Trainer::train`].
pub struct Trained {
    /// Final weights. Every projected word's vector is already its blend of
    /// the semantic basis.
    pub embeddings: Embeddings,
    /// The learning rate the run started from.
    pub alpha: real,
}

/// A training run whose vocabulary and projections are loaded.
pub struct Trainer {
    config: TrainConfig,
    vocab: Vocabulary,
    projections: ProjectionStore,
    file_size: u64,
}

impl Trainer {
    /// Validates `config`, then builds or reads the vocabulary, loads the
    /// projections, and saves the vocabulary if asked to.
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        let source = config.projection.as_ref().ok_or(Error::NoProjectionSource)?;

        info!(train_file = %config.train_file.display(), "starting training");
        let vocab = match &config.read_vocab_file {
            Some(path) => Vocabulary::load(path, config.hash_size, config.min_count)?,
            None => Vocabulary::from_train_file(
                &config.train_file,
                config.hash_size,
                config.min_count,
            )?,
        };
        let file_size = std::fs::metadata(&config.train_file)
            .with_context(|| {
                format!("training data file {} not found", config.train_file.display())
            })?
            .len();

        let projections = ProjectionStore::load(
            source,
            &vocab,
            config.basis_count,
            config.projection_snapshot.as_deref(),
        )?;
        if projections.present_count() == 0 {
            warn!("no word in the vocabulary has a semantic projection");
        }

        if let Some(path) = &config.save_vocab_file {
            vocab.save(path)?;
        }

        Ok(Trainer {
            config,
            vocab,
            projections,
            file_size,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn projections(&self) -> &ProjectionStore {
        &self.projections
    }

    /// Allocates and initializes the weights, restores the checkpoint if one
    /// is configured, and runs the worker threads to completion.
    pub fn train(&mut self) -> Result<Trained> {
        let config = &self.config;
        let embeddings = Embeddings::new(
            self.vocab.len(),
            config.basis_count,
            config.dim,
            config.seed,
            config.hs,
        )?;
        let table = if config.negative > 0 {
            Some(UnigramTable::with_size(&self.vocab, config.table_size))
        } else {
            None
        };
        if config.hs {
            self.vocab.build_huffman_tree();
        }

        let mut alpha = config.alpha.unwrap_or(DEFAULT_ALPHA);
        if let Some(path) = &config.checkpoint {
            let saved_alpha = embeddings.load_checkpoint(path, &self.vocab)?;
            info!(checkpoint = %path.display(), alpha = saved_alpha, "restored checkpoint");
            if config.alpha.is_none() {
                alpha = saved_alpha;
            }
        }

        let progress = if config.progress {
            let bar = ProgressBar::new(config.iter as u64 * self.vocab.train_words() + 1);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")
                    .context("invalid progress bar template")?,
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let exp_table = ExpTable::new();
        let shared = Shared {
            config,
            vocab: &self.vocab,
            projections: &self.projections,
            embeddings: &embeddings,
            table: table.as_ref(),
            exp_table: &exp_table,
            file_size: self.file_size,
            starting_alpha: alpha,
            word_count_actual: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            start: Instant::now(),
            progress: &progress,
        };
        info!(
            threads = config.threads,
            vocab_size = self.vocab.len(),
            train_words = self.vocab.train_words(),
            alpha,
            "training"
        );

        thread::scope(|s| -> Result<()> {
            let shared = &shared;
            let threads = (0..config.threads)
                .map(|id| s.spawn(move || Worker::new(shared, id)?.run()))
                .collect::<Vec<_>>();
            let mut first_err = None;
            for (id, handle) in threads.into_iter().enumerate() {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("worker thread {id} panicked")));
                if let Err(err) = result {
                    first_err.get_or_insert(err.context(format!("error in worker thread {id}")));
                }
            }
            first_err.map_or(Ok(()), Err)
        })?;
        progress.finish_and_clear();
        info!(
            seconds = shared.start.elapsed().as_secs_f64(),
            "training finished"
        );

        embeddings.materialize(&self.projections);
        Ok(Trained { embeddings, alpha })
    }

    /// Writes the trained model to the configured output file.
    pub fn save(&self, trained: &Trained) -> Result<()> {
        let path = match &self.config.output_file {
            Some(path) => path,
            None => return Ok(()),
        };
        match self.config.output_format {
            OutputFormat::Text => trained.embeddings.save_text(path, &self.vocab, trained.alpha)?,
            OutputFormat::Bincode => trained
                .embeddings
                .to_model(&self.vocab, self.config.sample, self.config.window)
                .save(path)?,
        }
        info!(output = %path.display(), "saved model");
        Ok(())
    }
}

/// Runs everything `config` asks for. Without an output file, stops once the
/// vocabulary and the projections are processed.
pub fn run(config: TrainConfig) -> Result<()> {
    let mut trainer = Trainer::new(config)?;
    if trainer.config().output_file.is_none() {
        return Ok(());
    }
    let trained = trainer.train()?;
    trainer.save(&trained)
}
