//! Per-word projections onto the semantic basis.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::ProjectionSource;
use crate::error::Error;
use crate::tokenizer::{parse_field, split_fields, TokenReader};
use crate::vocab::Vocabulary;
use crate::{real, MAX_TOKEN_LEN};

/// Loaded projection weights are divided by this.
pub const PROJECTION_DIVISOR: real = 20.0;

/// Projection weights for the words listed in a projection file.
///
/// Words not in the file have an all-zero row and are trained as ordinary
/// free vectors.
pub struct ProjectionStore {
    basis_count: usize,
    /// `weights[i * basis_count..][..basis_count]` is the projection of word `i`.
    weights: Vec<real>,
    in_list: Vec<bool>,
    present: usize,
}

impl ProjectionStore {
    /// A store for `vocab_size` words with nothing listed.
    pub fn empty(vocab_size: usize, basis_count: usize) -> Self {
        ProjectionStore {
            basis_count,
            weights: vec![0.0; vocab_size * basis_count],
            in_list: vec![false; vocab_size],
            present: 0,
        }
    }

    /// Number of words with a projection.
    pub fn present_count(&self) -> usize {
        self.present
    }

    pub fn is_present(&self, word: usize) -> bool {
        self.in_list[word]
    }

    pub fn row(&self, word: usize) -> &[real] {
        &self.weights[word * self.basis_count..][..self.basis_count]
    }

    /// Records the projection of word `i`. Each word may be listed only once.
    pub fn set_row(&mut self, i: usize, word: &[u8], row: &[real]) -> Result<(), Error> {
        assert_eq!(row.len(), self.basis_count);
        if self.in_list[i] {
            return Err(Error::DuplicateProjection {
                word: String::from_utf8_lossy(word).into_owned(),
            });
        }
        self.in_list[i] = true;
        self.present += 1;
        self.weights[i * self.basis_count..][..self.basis_count].copy_from_slice(row);
        Ok(())
    }

    /// Reads the text format: a word followed by `basis_count` numbers per line.
    /// Lines for words outside the vocabulary are skipped.
    pub fn read_text<R: BufRead>(fin: R, vocab: &Vocabulary, basis_count: usize) -> Result<Self> {
        let mut store = Self::empty(vocab.len(), basis_count);
        let mut row: Vec<real> = Vec::with_capacity(basis_count);
        let mut num: u64 = 0;
        for (line_num, line) in fin.split(b'\n').enumerate() {
            let line = line.context("error reading semantic file")?;
            let mut fields = split_fields(&line);
            let word = match fields.next() {
                None => continue,
                Some(word) => word,
            };
            num += 1;
            if num % 10_000 == 0 {
                debug!("have read {}0K word projections", num / 10_000);
            }
            let i = match vocab.search(word) {
                None => continue,
                Some(i) => i,
            };

            let malformed = || Error::Malformed {
                what: "semantic file",
                line: line_num + 1,
            };
            row.clear();
            for field in fields {
                row.push(parse_field(field).ok_or_else(malformed)?);
            }
            anyhow::ensure!(row.len() == basis_count, malformed());
            store.set_row(i, word, &row)?;
        }
        Ok(store)
    }

    /// Reads the binary format: a word, one space, `basis_count` packed
    /// little-endian `f32`s, and a newline, for each record. Blank lines
    /// between records are skipped.
    pub fn read_binary<R: BufRead>(fin: R, vocab: &Vocabulary, basis_count: usize) -> Result<Self> {
        let mut store = Self::empty(vocab.len(), basis_count);
        let mut tokens = TokenReader::new(fin);
        let mut row: Vec<real> = vec![0.0; basis_count];
        let mut num: u64 = 0;
        while let Some(mut word) = tokens
            .next_field()
            .context("error reading semantic file")?
        {
            word.truncate(MAX_TOKEN_LEN);
            num += 1;
            if num % 10_000 == 0 {
                debug!("have read {}0K word projections", num / 10_000);
            }
            let truncated = || {
                format!(
                    "truncated projection record for {:?}",
                    String::from_utf8_lossy(&word)
                )
            };

            let fin = tokens.get_mut();
            let mut sep = [0u8; 1];
            fin.read_exact(&mut sep).with_context(truncated)?;
            fin.read_exact(bytemuck::cast_slice_mut::<real, u8>(&mut row))
                .with_context(truncated)?;
            for v in &mut row {
                *v = real::from_bits(u32::from_le(v.to_bits()));
            }
            if fin.read(&mut sep).context("error reading semantic file")? == 1 {
                anyhow::ensure!(
                    sep[0] == b'\n',
                    "projection record for {:?} does not end with a newline",
                    String::from_utf8_lossy(&word)
                );
            }

            if let Some(i) = vocab.search(&word) {
                store.set_row(i, &word, &row)?;
            }
        }
        Ok(store)
    }

    /// Writes the listed rows, in vocabulary order, in the binary format.
    pub fn write_snapshot<W: Write>(&self, mut fo: W, vocab: &Vocabulary) -> Result<()> {
        for i in (0..vocab.len()).filter(|&i| self.in_list[i]) {
            let bits: Vec<u32> = self.row(i).iter().map(|v| v.to_bits().to_le()).collect();
            fo.write_all(vocab.word(i))
                .context("error writing projection snapshot")?;
            fo.write_all(b" ").context("error writing projection snapshot")?;
            fo.write_all(bytemuck::cast_slice::<u32, u8>(&bits))
                .context("error writing projection snapshot")?;
            writeln!(fo).context("error writing projection snapshot")?;
        }
        fo.flush().context("error writing projection snapshot")?;
        Ok(())
    }

    pub fn normalize(&mut self) {
        for w in &mut self.weights {
            *w /= PROJECTION_DIVISOR;
        }
    }

    /// Loads projections for the words in `vocab`, optionally saving the raw
    /// rows to `snapshot`, then normalizes them.
    pub fn load(
        source: &ProjectionSource,
        vocab: &Vocabulary,
        basis_count: usize,
        snapshot: Option<&Path>,
    ) -> Result<Self> {
        let (path, binary) = match source {
            ProjectionSource::Text(path) => (path, false),
            ProjectionSource::Binary(path) => (path, true),
        };
        let fin = BufReader::new(
            File::open(path)
                .with_context(|| format!("semantic file {} not found", path.display()))?,
        );
        let mut store = if binary {
            Self::read_binary(fin, vocab, basis_count)?
        } else {
            Self::read_text(fin, vocab, basis_count)?
        };
        info!(
            present = store.present_count(),
            vocab_size = vocab.len(),
            basis_count,
            "read semantic projections"
        );

        if let Some(snapshot) = snapshot {
            let fo = BufWriter::new(File::create(snapshot).with_context(|| {
                format!("error creating projection snapshot {}", snapshot.display())
            })?);
            store.write_snapshot(fo, vocab)?;
        }
        store.normalize();
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        let mut vocab = Vocabulary::with_hash_size(64);
        for w in "apple banana cherry apple".split(' ') {
            vocab.insert(w);
        }
        vocab.finalize(1);
        vocab
    }

    #[test]
    fn text_records_for_known_words_are_kept() {
        let vocab = vocab();
        let text = "cherry 1 2 3\nunknown 9 9 9\napple 0.5 -1 4e-1\n";
        let store = ProjectionStore::read_text(text.as_bytes(), &vocab, 3).unwrap();
        assert_eq!(store.present_count(), 2);
        let apple = vocab.search("apple").unwrap();
        let cherry = vocab.search("cherry").unwrap();
        let banana = vocab.search("banana").unwrap();
        assert!(store.is_present(apple));
        assert!(!store.is_present(banana));
        assert_eq!(store.row(apple), &[0.5f32, -1.0, 0.4]);
        assert_eq!(store.row(cherry), &[1.0f32, 2.0, 3.0]);
        assert_eq!(store.row(banana), &[0.0f32, 0.0, 0.0]);
    }

    #[test]
    fn duplicate_word_is_fatal() {
        let vocab = vocab();
        let text = "apple 1 2\nbanana 3 4\napple 5 6\n";
        let err = ProjectionStore::read_text(text.as_bytes(), &vocab, 2)
            .err()
            .unwrap();
        match err.downcast_ref::<Error>() {
            Some(Error::DuplicateProjection { word }) => assert_eq!(word, "apple"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn short_row_is_malformed() {
        let vocab = vocab();
        let err = ProjectionStore::read_text("banana 1\n".as_bytes(), &vocab, 2)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Malformed { line: 1, .. })
        ));
    }

    fn binary_record(word: &str, row: &[real]) -> Vec<u8> {
        let mut rec = format!("{word} ").into_bytes();
        for v in row {
            rec.extend_from_slice(&v.to_le_bytes());
        }
        rec.push(b'\n');
        rec
    }

    #[test]
    fn binary_unknown_payload_is_consumed() {
        let vocab = vocab();
        // 0x0a200a20 is stored as the bytes " \n \n".
        let mut data = binary_record("nothere", &[f32::from_bits(0x0a20_0a20), 1.0]);
        data.extend(binary_record("banana", &[f32::from_bits(0x0a20_0a20), 2.5]));
        let store = ProjectionStore::read_binary(&data[..], &vocab, 2).unwrap();
        let banana = vocab.search("banana").unwrap();
        assert_eq!(store.present_count(), 1);
        assert_eq!(store.row(banana)[0].to_bits(), 0x0a20_0a20);
        assert_eq!(store.row(banana)[1], 2.5);
    }

    #[test]
    fn binary_sentinel_record_is_a_record() {
        let vocab = vocab();
        let mut data = b"\n\n".to_vec();
        data.extend(binary_record("</s>", &[9.0, 9.0]));
        data.extend(binary_record("cherry", &[-0.5, 3.0]));
        let store = ProjectionStore::read_binary(&data[..], &vocab, 2).unwrap();
        assert_eq!(store.present_count(), 2);
        assert_eq!(store.row(0), &[9.0f32, 9.0]);
        let cherry = vocab.search("cherry").unwrap();
        assert_eq!(store.row(cherry), &[-0.5f32, 3.0]);
    }

    #[test]
    fn binary_weights_are_little_endian() {
        let vocab = vocab();
        let mut data = b"apple ".to_vec();
        data.extend([0x00, 0x00, 0x80, 0x3f, 0x00, 0x00, 0x00, 0xc0, b'\n']);
        let store = ProjectionStore::read_binary(&data[..], &vocab, 2).unwrap();
        let apple = vocab.search("apple").unwrap();
        assert_eq!(store.row(apple), &[1.0f32, -2.0]);

        let mut snapshot = Vec::new();
        store.write_snapshot(&mut snapshot, &vocab).unwrap();
        assert_eq!(snapshot, data);
    }

    #[test]
    fn truncated_binary_record_is_an_error() {
        let vocab = vocab();
        let mut data = binary_record("apple", &[1.0, 2.0]);
        data.truncate(data.len() - 3);
        assert!(ProjectionStore::read_binary(&data[..], &vocab, 2).is_err());
    }

    #[test]
    fn snapshot_round_trip() {
        let vocab = vocab();
        let text = "banana 0.25 7\nghost 1 1\napple -3 0.125\n";
        let mut store = ProjectionStore::read_text(text.as_bytes(), &vocab, 2).unwrap();

        let mut snapshot = Vec::new();
        store.write_snapshot(&mut snapshot, &vocab).unwrap();
        let reread = ProjectionStore::read_binary(&snapshot[..], &vocab, 2).unwrap();
        assert_eq!(reread.present_count(), 2);
        for i in 0..vocab.len() {
            assert_eq!(reread.is_present(i), store.is_present(i));
            assert_eq!(reread.row(i), store.row(i));
        }
        assert!(!snapshot.windows(5).any(|w| w == b"ghost"));

        store.normalize();
        let apple = vocab.search("apple").unwrap();
        assert_eq!(store.row(apple), &[-3.0f32 / 20.0, 0.125 / 20.0]);
    }
}
