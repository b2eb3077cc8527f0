//! One training thread.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::config::TrainConfig;
use crate::model::Embeddings;
use crate::projection::ProjectionStore;
use crate::sigmoid::{ExpTable, MAX_EXP};
use crate::tokenizer::TokenReader;
use crate::unigram::UnigramTable;
use crate::vocab::Vocabulary;
use crate::{real, Rng, MAX_SENTENCE_LENGTH};

/// How many words a worker processes between progress reports.
const REPORT_INTERVAL: u64 = 10_000;

/// State shared by all workers of a run. Everything except the counters and
/// the weights in `embeddings` is read-only while training.
pub(crate) struct Shared<'a> {
    pub config: &'a TrainConfig,
    pub vocab: &'a Vocabulary,
    pub projections: &'a ProjectionStore,
    pub embeddings: &'a Embeddings,
    pub table: Option<&'a UnigramTable>,
    pub exp_table: &'a ExpTable,
    pub file_size: u64,
    pub starting_alpha: real,
    /// Words processed by all workers, summed over epochs.
    pub word_count_actual: AtomicU64,
    /// Set once the early-stop percentage is reached.
    pub stop: AtomicBool,
    pub start: Instant,
    pub progress: &'a ProgressBar,
}

impl Shared<'_> {
    fn total_words(&self) -> u64 {
        self.config.iter as u64 * self.vocab.train_words() + 1
    }
}

pub(crate) struct Worker<'a> {
    shared: &'a Shared<'a>,
    id: usize,
    rng: Rng,
    tokens: TokenReader<BufReader<File>>,
    /// Byte offset where this worker's share of the corpus begins.
    start_offset: u64,
    alpha: real,
    word_count: u64,
    last_word_count: u64,
    sen: Vec<usize>,
    sentence_position: usize,
    eof: bool,
    /// Gradient for the current input vector.
    neu1e: Vec<real>,
}

impl<'a> Worker<'a> {
    pub fn new(shared: &'a Shared<'a>, id: usize) -> Result<Self> {
        let config = shared.config;
        let fin = File::open(&config.train_file).with_context(|| {
            format!("error opening training data file {}", config.train_file.display())
        })?;
        let mut worker = Worker {
            shared,
            id,
            rng: Rng::for_worker(config.seed, id),
            tokens: TokenReader::new(BufReader::new(fin)),
            start_offset: shared.file_size / config.threads as u64 * id as u64,
            alpha: shared.starting_alpha,
            word_count: 0,
            last_word_count: 0,
            sen: Vec::with_capacity(MAX_SENTENCE_LENGTH),
            sentence_position: 0,
            eof: false,
            neu1e: vec![0.0; config.dim],
        };
        worker.rewind()?;
        Ok(worker)
    }

    /// Moves to the start of this worker's share of the corpus. A share that
    /// starts inside a word begins at the following word.
    fn rewind(&mut self) -> Result<()> {
        let shared = self.shared;
        let train_file = &shared.config.train_file;
        let seek_err = || format!("error seeking within {}", train_file.display());
        self.word_count = 0;
        self.last_word_count = 0;
        self.sen.clear();
        self.sentence_position = 0;
        self.eof = false;

        let fin = self.tokens.get_mut();
        if self.start_offset == 0 {
            fin.seek(SeekFrom::Start(0)).with_context(seek_err)?;
            return Ok(());
        }
        fin.seek(SeekFrom::Start(self.start_offset - 1))
            .with_context(seek_err)?;
        let mut prev = [0u8; 1];
        let n = fin.read(&mut prev).with_context(seek_err)?;
        if n == 1 && !matches!(prev[0], b' ' | b'\t' | b'\n') {
            self.tokens
                .skip_partial_token()
                .context("error reading training data")?;
        }
        Ok(())
    }

    /// Trains `iter` passes over this worker's share of the corpus.
    pub fn run(mut self) -> Result<()> {
        let shared = self.shared;
        let config = shared.config;
        let words_per_thread = shared.vocab.train_words() / config.threads as u64;
        let mut local_iter = config.iter;

        loop {
            if shared.stop.load(Ordering::Relaxed) {
                debug!(worker = self.id, "stopping early");
                break;
            }
            if self.word_count - self.last_word_count > REPORT_INTERVAL {
                self.report_progress();
            }

            if self.sen.is_empty() {
                self.fill_sentence()?;
            }

            if (self.eof && self.sen.is_empty()) || self.word_count > words_per_thread {
                shared
                    .word_count_actual
                    .fetch_add(self.word_count - self.last_word_count, Ordering::Relaxed);
                local_iter -= 1;
                if local_iter == 0 {
                    break;
                }
                debug!(worker = self.id, epochs_left = local_iter, "next epoch");
                self.rewind()?;
                continue;
            }
            if self.sen.is_empty() {
                // blank line, or every word was discarded
                continue;
            }

            self.train_position();
            self.sentence_position += 1;
            if self.sentence_position >= self.sen.len() {
                self.sen.clear();
            }
        }
        Ok(())
    }

    /// Publishes the words processed since the last report, decays the
    /// learning rate, and checks the early-stop threshold.
    fn report_progress(&mut self) {
        let shared = self.shared;
        let n = self.word_count - self.last_word_count;
        let word_count_actual = shared.word_count_actual.fetch_add(n, Ordering::Relaxed) + n;
        self.last_word_count = self.word_count;

        let fraction = word_count_actual as real / shared.total_words() as real;
        self.alpha = shared.starting_alpha * (1.0 - fraction).max(0.0001);

        shared.progress.set_position(word_count_actual);
        shared.progress.set_message(format!(
            "alpha {:.6}  {:.2}k words/thread/sec",
            self.alpha,
            word_count_actual as f64 / ((shared.start.elapsed().as_secs_f64() + 1.0) * 1000.0),
        ));

        if let Some(limit) = shared.config.early_stop {
            if fraction * 100.0 > limit && !shared.stop.swap(true, Ordering::Relaxed) {
                info!(progress = fraction * 100.0, "early stop threshold reached");
            }
        }
    }

    /// Reads the next sentence: words up to a newline, the end of the file, or
    /// `MAX_SENTENCE_LENGTH` words. Unknown words are skipped and frequent
    /// words are randomly discarded.
    fn fill_sentence(&mut self) -> Result<()> {
        let shared = self.shared;
        let sample = shared.config.sample;
        let train_words = shared.vocab.train_words();
        loop {
            let word = match self
                .tokens
                .next_token()
                .context("error reading a word from training data")?
            {
                None => {
                    self.eof = true;
                    break;
                }
                Some(word) => word,
            };
            let word = match shared.vocab.search(&word) {
                None => continue,
                Some(i) => i,
            };
            self.word_count += 1;
            if word == 0 {
                break;
            }

            // The subsampling randomly discards frequent words while keeping the ranking same
            if sample > 0.0 {
                let f = shared.vocab.count(word) as real;
                let k = sample * train_words as real;
                let ran = ((f / k).sqrt() + 1.0) * k / f;
                if ran < self.rng.rand_real() {
                    continue;
                }
            }
            self.sen.push(word);
            if self.sen.len() >= MAX_SENTENCE_LENGTH {
                break;
            }
        }
        self.sentence_position = 0;
        Ok(())
    }

    /// Trains every context word in a randomly shrunk window around the
    /// current position against the word at that position.
    fn train_position(&mut self) {
        let window = self.shared.config.window;
        let sentence_position = self.sentence_position;
        let word = self.sen[sentence_position];
        let b = self.rng.rand_u64() as usize % window;
        for a in b..(window * 2 + 1 - b) {
            if a == window || sentence_position + a < window {
                continue;
            }
            let c = sentence_position + a - window;
            if c >= self.sen.len() {
                continue;
            }
            let last_word = self.sen[c];
            self.train_pair(word, last_word);
        }
    }

    /// One SGD step for predicting `word` from the input vector of
    /// `last_word`.
    fn train_pair(&mut self, word: usize, last_word: usize) {
        let shared = self.shared;
        let config = shared.config;
        let emb = shared.embeddings;
        let dim = config.dim;
        let alpha = self.alpha;

        let projected = shared.projections.is_present(last_word);
        if projected {
            emb.blend_into(last_word, shared.projections.row(last_word));
        }
        let input = emb.syn0.row(last_word);
        let neu1e = &mut self.neu1e;
        neu1e.fill(0.0);

        // HIERARCHICAL SOFTMAX
        if let Some(syn1) = &emb.syn1 {
            let vw = &shared.vocab.words()[word];
            for (&code, &point) in vw.code.iter().zip(&vw.point) {
                let node = syn1.row(point as usize);
                // Propagate hidden -> output
                let f = (0..dim).map(|c| input[c].get() * node[c].get()).sum::<real>();
                if f <= -MAX_EXP || f >= MAX_EXP {
                    continue;
                }
                let f = shared.exp_table.sigmoid(f);
                // 'g' is the gradient (d/df loss) multiplied by the learning rate
                let g = (1.0 - code as real - f) * alpha;
                // Propagate errors output -> hidden
                for c in 0..dim {
                    neu1e[c] += g * node[c].get();
                }
                // Learn weights hidden -> output
                for c in 0..dim {
                    node[c].add(g * input[c].get());
                }
            }
        }

        // NEGATIVE SAMPLING
        if let Some(table) = shared.table {
            let vocab_size = shared.vocab.len();
            for d in 0..(config.negative + 1) {
                let mut target;
                let label;
                if d == 0 {
                    target = word;
                    label = 1;
                } else {
                    let r = self.rng.rand_u64();
                    target = table.sample(r);
                    if target == 0 {
                        target = r as usize % (vocab_size - 1) + 1;
                    }
                    if target == word {
                        continue;
                    }
                    label = 0;
                }
                let out = emb.syn1neg.row(target);
                let f = (0..dim).map(|c| input[c].get() * out[c].get()).sum::<real>();
                let g = (label as real - shared.exp_table.sigmoid(f)) * alpha;
                for c in 0..dim {
                    neu1e[c] += g * out[c].get();
                }
                for c in 0..dim {
                    out[c].add(g * input[c].get());
                }
            }
        }

        // Learn weights input -> hidden. A projected word's vector is derived
        // from the basis, so the basis takes the gradient instead.
        if projected {
            for (p, &w) in shared.projections.row(last_word).iter().enumerate() {
                if w == 0.0 {
                    continue;
                }
                for (cell, &e) in emb.syn_sem.row(p).iter().zip(neu1e.iter()) {
                    cell.add(w * e);
                }
            }
        } else {
            for (cell, &e) in input.iter().zip(neu1e.iter()) {
                cell.add(e);
            }
        }
    }
}
