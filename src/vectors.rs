use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Index;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ordered_float::OrderedFloat;

use crate::error::Error;
use crate::{dot, normalize, real};

/// Word vectors read back from a text output file, normalized to unit length.
pub struct Vectors {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The vocabulary.
    vocab: Vec<String>,

    /// `embeddings[k * size..(k+1) * size]` is the vector embedding for word `k`.
    embeddings: Vec<real>,
}

impl Index<usize> for Vectors {
    type Output = [real];

    fn index(&self, i: usize) -> &[real] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

impl Vectors {
    pub fn load(file_name: &Path) -> Result<Self> {
        let f = BufReader::new(
            File::open(file_name)
                .with_context(|| format!("error opening input file {}", file_name.display()))?,
        );
        Self::read_from(f)
    }

    /// Reads the header and the word vectors. Anything after them (semantic
    /// vectors and output weights) is ignored. Words that are not UTF-8 are
    /// kept with replacement characters, for display.
    pub fn read_from<R: BufRead>(f: R) -> Result<Self> {
        let mut lines = f
            .split(b'\n')
            .map(|line| line.map(|line| String::from_utf8_lossy(&line).into_owned()));
        let header = lines
            .next()
            .ok_or_else(|| anyhow!("invalid input file: empty"))?
            .context("error reading input file")?;
        let mut fields = header.split_whitespace();
        let num_words: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;
        let size: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;

        let mut vocab: Vec<String> = Vec::with_capacity(num_words);
        let mut m = vec![0.0; num_words * size];
        for b in 0..num_words {
            let malformed = || Error::Malformed {
                what: "vector file",
                line: b + 2,
            };
            let line = lines
                .next()
                .ok_or_else(malformed)?
                .context("error reading input file")?;
            let mut fields = line.split_whitespace();
            vocab.push(fields.next().ok_or_else(malformed)?.to_string());

            let row = &mut m[b * size..][..size];
            for v in row.iter_mut() {
                *v = fields
                    .next()
                    .ok_or_else(malformed)?
                    .parse()
                    .with_context(malformed)?;
            }
            normalize(row);
        }

        Ok(Vectors {
            size,
            vocab,
            embeddings: m,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.vocab.iter().position(|v| v == word)
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }

    /// The `n` words most similar to the sum of the vectors of `words`,
    /// excluding those words, most similar first.
    pub fn nearest(&self, words: &[usize], n: usize) -> Vec<(&str, real)> {
        let mut vec = vec![0.0; self.size];
        for &i in words {
            for (v, r) in vec.iter_mut().zip(self[i].iter().copied()) {
                *v += r;
            }
        }
        normalize(&mut vec);

        let mut best: Vec<(&str, real)> = (0..self.num_words())
            .filter(|c| !words.contains(c))
            .map(|c| (self.word(c), dot(&vec, &self[c])))
            .collect();
        best.sort_by_key(|&(_word, dist)| Reverse(OrderedFloat(dist)));
        best.truncate(n);
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "4 2 0.025\n\
                        </s> 0 0\n\
                        north 1 0.1\n\
                        south 0.9 0.2\n\
                        east 0 3\n\
                        0.5 0.5\n\
                        0 0 0 0 0 0 0 0\n";

    #[test]
    fn reads_word_rows_and_ignores_the_rest() {
        let v = Vectors::read_from(FILE.as_bytes()).unwrap();
        assert_eq!(v.num_words(), 4);
        assert_eq!(v.size(), 2);
        assert_eq!(v.lookup_word("south"), Some(2));
        assert_eq!(v.lookup_word("west"), None);
        assert_eq!(v.word(3), "east");
        assert!((v[3][1] - 1.0).abs() < 1e-6);
        assert_eq!(&v[0], &[0.0f32, 0.0]);
    }

    #[test]
    fn nearest_ranks_by_cosine() {
        let v = Vectors::read_from(FILE.as_bytes()).unwrap();
        let north = v.lookup_word("north").unwrap();
        let best = v.nearest(&[north], 2);
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].0, "south");
        assert_eq!(best[1].0, "east");
        assert!(best[0].1 > best[1].1);
    }

    #[test]
    fn words_that_are_not_utf8_can_be_shown() {
        let v = Vectors::read_from(&b"2 1 0.1\n</s> 0\nx\xff 1\n"[..]).unwrap();
        assert_eq!(v.word(1), "x\u{fffd}");
        assert_eq!(v.lookup_word("x\u{fffd}"), Some(1));
    }

    #[test]
    fn short_row_is_malformed() {
        let err = Vectors::read_from("2 3 0.1\n</s> 0 0 0\nx 1 2\n".as_bytes())
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Malformed { line: 3, .. })
        ));
    }
}
