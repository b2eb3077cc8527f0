//! The trained parameters: word vectors, semantic basis vectors and output
//! weights, plus their on-disk formats.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::projection::ProjectionStore;
use crate::tokenizer::{parse_field, split_fields};
use crate::vocab::{VocabWord, Vocabulary};
use crate::{real, Rng};

/// A float that many threads may read and write at once.
///
/// Training threads update shared matrices without locks ("Hogwild"). Each
/// access is a relaxed atomic load or store, so there is no undefined
/// behavior, but `add` is a load followed by a store: when two threads add to
/// the same cell concurrently, one of the updates can be lost. SGD tolerates
/// that as noise.
#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// A row-major `rows × dim` matrix of shared cells, 128-byte aligned.
pub struct Matrix {
    rows: usize,
    dim: usize,
    data: AlignedBox<[Real]>,
}

impl Matrix {
    /// Allocates a zeroed matrix. `what` names it in the allocation error.
    pub fn zeroed(rows: usize, dim: usize, what: &'static str) -> Result<Self, Error> {
        let data = AlignedBox::slice_from_default(128, rows * dim)
            .map_err(|_| Error::Allocation(what))?;
        Ok(Matrix { rows, dim, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, i: usize) -> &[Real] {
        &self.data[i * self.dim..][..self.dim]
    }

    pub fn row_values(&self, i: usize) -> Vec<real> {
        self.row(i).iter().map(Real::get).collect()
    }

    pub fn to_vec(&self) -> Vec<real> {
        self.data.iter().map(Real::get).collect()
    }

    fn fill_from(&self, values: &[real]) {
        assert_eq!(values.len(), self.data.len());
        for (cell, &v) in self.data.iter().zip(values) {
            cell.set(v);
        }
    }

    fn write_row<W: Write>(&self, fo: &mut W, i: usize) -> Result<()> {
        for (c, f) in self.row(i).iter().enumerate() {
            if c > 0 {
                write!(fo, " ").context("error writing output file")?;
            }
            write!(fo, "{}", f.get()).context("error writing output file")?;
        }
        Ok(())
    }
}

/// All weights of the network.
pub struct Embeddings {
    dim: usize,
    basis_count: usize,
    /// Input vectors, one row per vocabulary word.
    pub syn0: Matrix,
    /// The semantic basis, one row per basis vector.
    pub syn_sem: Matrix,
    /// Output weights for negative sampling, one row per vocabulary word.
    pub syn1neg: Matrix,
    /// Inner-node weights for hierarchical softmax. Never saved.
    pub syn1: Option<Matrix>,
}

impl Embeddings {
    /// Input vectors and then the basis are drawn from `Rng(seed)`, uniformly
    /// in `(-0.5 / dim, 0.5 / dim)`. Output weights start at zero.
    pub fn new(
        vocab_size: usize,
        basis_count: usize,
        dim: usize,
        seed: u64,
        hs: bool,
    ) -> Result<Self, Error> {
        let syn0 = Matrix::zeroed(vocab_size, dim, "word vectors")?;
        let syn_sem = Matrix::zeroed(basis_count, dim, "semantic vectors")?;
        let syn1neg = Matrix::zeroed(vocab_size, dim, "output weights")?;
        let syn1 = if hs {
            Some(Matrix::zeroed(vocab_size, dim, "hierarchical softmax weights")?)
        } else {
            None
        };

        let mut rng = Rng(seed);
        for cell in syn0.data.iter().chain(syn_sem.data.iter()) {
            cell.set((rng.rand_real() - 0.5) / dim as real);
        }

        Ok(Embeddings {
            dim,
            basis_count,
            syn0,
            syn_sem,
            syn1neg,
            syn1,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn vocab_size(&self) -> usize {
        self.syn0.rows()
    }

    /// Overwrites the input vector of `word` with `Σ_p proj[p] · basis[p]`.
    pub fn blend_into(&self, word: usize, proj: &[real]) {
        debug_assert_eq!(proj.len(), self.basis_count);
        let dim = self.dim;
        let mut acc: Vec<real> = vec![0.0; dim];
        for (p, &w) in proj.iter().enumerate() {
            let basis = self.syn_sem.row(p);
            for c in 0..dim {
                acc[c] += w * basis[c].get();
            }
        }
        for (cell, v) in self.syn0.row(word).iter().zip(acc) {
            cell.set(v);
        }
    }

    /// Blends the input vector of every word that has a projection.
    pub fn materialize(&self, projections: &ProjectionStore) {
        for word in 0..self.vocab_size() {
            if projections.is_present(word) {
                self.blend_into(word, projections.row(word));
            }
        }
    }

    /// Writes the text format, which can also be read back as a checkpoint:
    ///
    /// ```text
    /// vocab_size dim alpha
    /// word v0 v1 ...          (vocab_size lines)
    /// b0 b1 ...               (basis_count lines)
    /// o0 o1 ...               (one line, vocab_size * dim values)
    /// ```
    pub fn write_text<W: Write>(&self, mut fo: W, vocab: &Vocabulary, alpha: real) -> Result<()> {
        assert_eq!(vocab.len(), self.vocab_size());
        writeln!(fo, "{} {} {}", vocab.len(), self.dim, alpha)
            .context("error writing output file")?;
        for (a, vw) in vocab.words().iter().enumerate() {
            fo.write_all(&vw.word).context("error writing output file")?;
            fo.write_all(b" ").context("error writing output file")?;
            self.syn0.write_row(&mut fo, a)?;
            writeln!(fo).context("error writing output file")?;
        }
        for p in 0..self.basis_count {
            self.syn_sem.write_row(&mut fo, p)?;
            writeln!(fo).context("error writing output file")?;
        }
        for a in 0..vocab.len() {
            if a > 0 {
                write!(fo, " ").context("error writing output file")?;
            }
            self.syn1neg.write_row(&mut fo, a)?;
        }
        writeln!(fo).context("error writing output file")?;
        fo.flush().context("error writing output file")?;
        Ok(())
    }

    pub fn save_text(&self, path: &Path, vocab: &Vocabulary, alpha: real) -> Result<()> {
        let fo = BufWriter::new(
            File::create(path)
                .with_context(|| format!("error creating output file {}", path.display()))?,
        );
        self.write_text(fo, vocab, alpha)
    }

    /// Restores all three matrices from a file in the text format and returns
    /// the learning rate recorded in its header.
    ///
    /// Every line must have exactly the shape this model writes. A file whose
    /// basis rows or output line do not line up, or that has lines left over,
    /// was saved with another basis count. The whole file is checked against
    /// `vocab` before any weight is changed.
    pub fn read_checkpoint<R: BufRead>(&self, fin: R, vocab: &Vocabulary) -> Result<real> {
        let mut lines = CheckpointLines {
            lines: fin.split(b'\n'),
            line: 0,
        };
        let vocab_size = vocab.len();
        let dim = self.dim;

        let line = lines.next_line()?;
        let header: Vec<&[u8]> = split_fields(&line).collect();
        lines.expect_len(&header, 3)?;
        let found_size: usize = lines.number(header[0])?;
        if found_size != vocab_size {
            return Err(Error::CheckpointMismatch {
                field: "vocabulary size",
                expected: vocab_size.to_string(),
                found: found_size.to_string(),
            }
            .into());
        }
        let found_dim: usize = lines.number(header[1])?;
        if found_dim != dim {
            return Err(Error::CheckpointMismatch {
                field: "dim",
                expected: dim.to_string(),
                found: found_dim.to_string(),
            }
            .into());
        }
        let alpha: real = lines.number(header[2])?;

        let mut syn0 = Vec::<real>::with_capacity(vocab_size * dim);
        for i in 0..vocab_size {
            let line = lines.next_line()?;
            let fields: Vec<&[u8]> = split_fields(&line).collect();
            if fields[0] != vocab.word(i) {
                return Err(Error::CheckpointMismatch {
                    field: "word",
                    expected: String::from_utf8_lossy(vocab.word(i)).into_owned(),
                    found: String::from_utf8_lossy(fields[0]).into_owned(),
                }
                .into());
            }
            lines.expect_len(&fields, dim + 1)?;
            for &field in &fields[1..] {
                syn0.push(lines.number(field)?);
            }
        }

        let basis_mismatch = |found: String| Error::CheckpointMismatch {
            field: "basis count",
            expected: self.basis_count.to_string(),
            found,
        };

        let mut syn_sem = Vec::<real>::with_capacity(self.basis_count * dim);
        for p in 0..self.basis_count {
            let line = lines.next_line()?;
            let fields: Vec<&[u8]> = split_fields(&line).collect();
            if fields.len() == vocab_size * dim && fields.len() != dim {
                // the output line, reached early
                return Err(basis_mismatch(p.to_string()).into());
            }
            lines.expect_len(&fields, dim)?;
            for &field in &fields {
                syn_sem.push(lines.number(field)?);
            }
        }

        let line = lines.next_line()?;
        let fields: Vec<&[u8]> = split_fields(&line).collect();
        if fields.len() == dim && fields.len() != vocab_size * dim {
            // another basis row
            return Err(basis_mismatch(format!("more than {}", self.basis_count)).into());
        }
        lines.expect_len(&fields, vocab_size * dim)?;
        let mut syn1neg = Vec::<real>::with_capacity(vocab_size * dim);
        for &field in &fields {
            syn1neg.push(lines.number(field)?);
        }
        if lines.has_more()? {
            return Err(basis_mismatch(format!("more than {}", self.basis_count)).into());
        }

        self.syn0.fill_from(&syn0);
        self.syn_sem.fill_from(&syn_sem);
        self.syn1neg.fill_from(&syn1neg);
        Ok(alpha)
    }

    pub fn load_checkpoint(&self, path: &Path, vocab: &Vocabulary) -> Result<real> {
        let fin = BufReader::new(
            File::open(path)
                .with_context(|| format!("checkpoint file {} not found", path.display()))?,
        );
        self.read_checkpoint(fin, vocab)
            .with_context(|| format!("error reading checkpoint {}", path.display()))
    }

    pub fn to_model(&self, vocab: &Vocabulary, sample: real, window: usize) -> Model {
        Model {
            dim: self.dim,
            basis_count: self.basis_count,
            sample,
            window,
            vocab: vocab.words().to_vec(),
            embeddings: self.syn0.to_vec(),
            semantic: self.syn_sem.to_vec(),
            output: self.syn1neg.to_vec(),
        }
    }
}

/// The lines of a checkpoint, split into fields, with the current line number
/// for error reports.
struct CheckpointLines<R> {
    lines: std::io::Split<R>,
    line: usize,
}

impl<R: BufRead> CheckpointLines<R> {
    fn malformed(&self) -> anyhow::Error {
        Error::Malformed {
            what: "checkpoint",
            line: self.line,
        }
        .into()
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        self.line += 1;
        self.lines
            .next()
            .transpose()
            .context("error reading checkpoint")
    }

    /// The next line. A missing or blank line is malformed.
    fn next_line(&mut self) -> Result<Vec<u8>> {
        match self.read_line()? {
            Some(line) if split_fields(&line).next().is_some() => Ok(line),
            _ => Err(self.malformed()),
        }
    }

    /// True if a non-blank line follows.
    fn has_more(&mut self) -> Result<bool> {
        while let Some(line) = self.read_line()? {
            if split_fields(&line).next().is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn expect_len(&self, fields: &[&[u8]], len: usize) -> Result<()> {
        if fields.len() != len {
            return Err(self.malformed());
        }
        Ok(())
    }

    fn number<T: std::str::FromStr>(&self, field: &[u8]) -> Result<T> {
        parse_field(field).ok_or_else(|| self.malformed())
    }
}

/// A trained model in a form `bincode` can store.
#[derive(Serialize, Deserialize)]
pub struct Model {
    pub dim: usize,
    pub basis_count: usize,
    pub sample: real,
    pub window: usize,
    pub vocab: Vec<VocabWord>,
    /// `vocab.len() × dim` input vectors, with projected words already blended.
    pub embeddings: Vec<real>,
    /// `basis_count × dim` semantic basis vectors.
    pub semantic: Vec<real>,
    /// `vocab.len() × dim` output weights.
    pub output: Vec<real>,
}

impl Model {
    pub fn embedding(&self, word: usize) -> &[real] {
        &self.embeddings[word * self.dim..][..self.dim]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let fo = BufWriter::new(
            File::create(path)
                .with_context(|| format!("error creating output file {}", path.display()))?,
        );
        bincode::serialize_into(fo, self)
            .with_context(|| format!("failed to save model to file {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let f = BufReader::new(
            File::open(path)
                .with_context(|| format!("failed to open model file {}", path.display()))?,
        );
        bincode::deserialize_from(f)
            .with_context(|| format!("failed to load model from file {}", path.display()))
    }
}
