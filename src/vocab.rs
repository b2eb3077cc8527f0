//! The vocabulary: words, their counts, and Huffman codes.

use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Error;
use crate::tokenizer::{parse_field, split_fields, TokenReader};
use crate::SENTINEL;

pub const MAX_CODE_LENGTH: usize = 40;

/// Default size of the word hash table. At most 70% of it is ever occupied.
pub const VOCAB_HASH_SIZE: usize = 10_000_000;

const EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabWord {
    /// The token's bytes. Words are compared byte for byte and need not be
    /// UTF-8.
    pub word: Vec<u8>,

    /// Number of occurrences in the training data.
    pub count: u64,

    /// Huffman code, root first. `code[d]` is the branch taken below `point[d]`.
    pub code: Vec<u8>,

    /// Internal nodes on the path from the root, as indexes into the
    /// hierarchical softmax weights.
    pub point: Vec<u32>,
}

impl VocabWord {
    fn new(word: Vec<u8>) -> Self {
        VocabWord {
            word,
            count: 0,
            code: Vec::new(),
            point: Vec::new(),
        }
    }
}

/// Words with an open-addressed hash index (polynomial hash, linear probing).
///
/// Entry 0 is always the sentence-boundary token `</s>`.
pub struct Vocabulary {
    words: Vec<VocabWord>,
    /// `hash[slot]` is an index into `words`, or `EMPTY`.
    hash: Vec<u32>,
    /// Threshold for the next automatic pruning pass.
    min_reduce: u64,
    /// Total occurrences of the retained words; set by `finalize`.
    train_words: u64,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::with_hash_size(VOCAB_HASH_SIZE)
    }

    /// An empty vocabulary (just `</s>`) whose hash table has `hash_size` slots.
    pub fn with_hash_size(hash_size: usize) -> Self {
        assert!(hash_size >= 4, "hash table needs at least four slots");
        let mut vocab = Vocabulary {
            words: Vec::with_capacity(1000),
            hash: vec![EMPTY; hash_size],
            min_reduce: 1,
            train_words: 0,
        };
        vocab.add_word(SENTINEL);
        vocab
    }

    fn word_hash(&self, word: &[u8]) -> usize {
        let h = word
            .iter()
            .fold(0u64, |h, b| h.wrapping_mul(257).wrapping_add(*b as u64));
        (h % self.hash.len() as u64) as usize
    }

    /// Returns position of a word in the vocabulary; if the word is not found, returns None.
    pub fn search(&self, word: impl AsRef<[u8]>) -> Option<usize> {
        let word = word.as_ref();
        let mut slot = self.word_hash(word);
        loop {
            let i = self.hash[slot];
            if i == EMPTY {
                return None;
            }
            if self.words[i as usize].word == word {
                return Some(i as usize);
            }
            slot = (slot + 1) % self.hash.len();
        }
    }

    fn index_word(&mut self, i: usize) {
        let mut slot = self.word_hash(&self.words[i].word);
        while self.hash[slot] != EMPTY {
            slot = (slot + 1) % self.hash.len();
        }
        self.hash[slot] = i as u32;
    }

    fn rebuild_hash(&mut self) {
        self.hash.fill(EMPTY);
        for i in 0..self.words.len() {
            self.index_word(i);
        }
    }

    fn is_crowded(&self, len: usize) -> bool {
        len as f64 > self.hash.len() as f64 * 0.7
    }

    /// Prunes rare words until one more word fits under the load limit.
    fn make_room(&mut self) {
        while self.is_crowded(self.words.len() + 1) {
            let before = self.words.len();
            self.prune_below(self.min_reduce);
            debug!(
                threshold = self.min_reduce,
                before,
                after = self.words.len(),
                "pruned vocabulary"
            );
            self.min_reduce += 1;
        }
    }

    /// Adds a word with count 0 and returns its index. The word must not
    /// already be present.
    pub fn add_word(&mut self, word: impl AsRef<[u8]>) -> usize {
        let word = word.as_ref();
        debug_assert!(self.search(word).is_none());
        self.make_room();
        let n = self.words.len();
        self.words.push(VocabWord::new(word.to_vec()));
        self.index_word(n);
        n
    }

    /// Records one occurrence of `word`, adding it if necessary.
    ///
    /// When the table would pass 70% occupancy, words seen no more than
    /// `min_reduce` times are dropped first, and the threshold goes up by one.
    pub fn insert(&mut self, word: impl AsRef<[u8]>) -> usize {
        let word = word.as_ref();
        let i = match self.search(word) {
            Some(i) => i,
            None => self.add_word(word),
        };
        self.words[i].count += 1;
        i
    }

    /// Removes every word except `</s>` whose count is at most `threshold`,
    /// then rebuilds the hash index.
    pub fn prune_below(&mut self, threshold: u64) {
        let mut i = 0;
        self.words.retain(|vw| {
            let keep = i == 0 || vw.count > threshold;
            i += 1;
            keep
        });
        self.rebuild_hash();
    }

    /// Sorts the vocabulary by frequency, keeping `</s>` at the first
    /// position, and discards words occurring less than `min_count` times.
    pub fn finalize(&mut self, min_count: u64) {
        self.words[1..].sort_by_key(|vw| Reverse(vw.count));

        let mut i = 0;
        self.words.retain(|vw| {
            let keep = i == 0 || vw.count >= min_count;
            i += 1;
            keep
        });
        self.words.shrink_to_fit();
        self.rebuild_hash();
        self.train_words = self.words.iter().map(|vw| vw.count).sum();
    }

    /// Creates a binary Huffman tree using the word counts. Frequent words
    /// get short codes.
    ///
    /// Needs a finalized vocabulary: the leaves must be sorted by count so
    /// that the two-pointer merge finds the two lightest nodes in linear time.
    pub fn build_huffman_tree(&mut self) {
        let vocab_size = self.words.len();
        if vocab_size < 2 {
            for vw in &mut self.words {
                vw.code.clear();
                vw.point.clear();
            }
            return;
        }

        let mut count = vec![0u64; vocab_size * 2 + 1];
        let mut binary = vec![0u8; vocab_size * 2 + 1]; // which child a node is of its parent (0 or 1)
        let mut parent_node = vec![0usize; vocab_size * 2 + 1];

        for (c, vw) in count.iter_mut().zip(&self.words) {
            *c = vw.count;
        }
        count[vocab_size..vocab_size * 2].fill(1_000_000_000_000_000);

        // `pos1` walks the leaves from the rarest; `pos2` walks the internal
        // nodes in creation order. Both sequences are nondecreasing.
        fn pick_min(count: &[u64], pos1: &mut usize, pos2: &mut usize) -> usize {
            if *pos1 > 0 && count[*pos1 - 1] < count[*pos2] {
                *pos1 -= 1;
                *pos1
            } else {
                *pos2 += 1;
                *pos2 - 1
            }
        }

        let mut pos1 = vocab_size;
        let mut pos2 = vocab_size;
        for a in 0..(vocab_size - 1) {
            let min1i = pick_min(&count, &mut pos1, &mut pos2);
            let min2i = pick_min(&count, &mut pos1, &mut pos2);
            count[vocab_size + a] = count[min1i] + count[min2i];
            parent_node[min1i] = vocab_size + a;
            parent_node[min2i] = vocab_size + a;
            binary[min2i] = 1;
        }

        // Now assign binary code to each vocabulary word
        let root = vocab_size * 2 - 2;
        for (a, vw) in self.words.iter_mut().enumerate() {
            let mut code: Vec<u8> = vec![];
            let mut point: Vec<u32> = vec![];
            let mut b = a;
            loop {
                code.push(binary[b]);
                b = parent_node[b];
                if b == root {
                    break;
                }
                point.push((b - vocab_size) as u32);
            }
            point.push((root - vocab_size) as u32);
            code.reverse();
            point.reverse();
            code.truncate(MAX_CODE_LENGTH);
            point.truncate(MAX_CODE_LENGTH);
            vw.code = code;
            vw.point = point;
        }
    }

    /// Counts every token from `tokens`. Returns the number of tokens read.
    pub fn learn<R: BufRead>(&mut self, tokens: TokenReader<R>) -> Result<u64> {
        let mut total: u64 = 0;
        for word in tokens {
            let word = word.context("error reading training data file")?;
            total += 1;
            if total % 1_000_000 == 0 {
                debug!("read {}M words", total / 1_000_000);
            }
            self.insert(&word);
        }
        Ok(total)
    }

    /// Builds a finalized vocabulary from a training file.
    pub fn from_train_file(path: &Path, hash_size: usize, min_count: u64) -> Result<Self> {
        let fin = File::open(path)
            .with_context(|| format!("error opening training data file {}", path.display()))?;
        let mut vocab = Vocabulary::with_hash_size(hash_size);
        let total = vocab.learn(TokenReader::new(BufReader::new(fin)))?;
        vocab.finalize(min_count);
        info!(
            vocab_size = vocab.len(),
            words_in_file = total,
            train_words = vocab.train_words(),
            "learned vocabulary"
        );
        Ok(vocab)
    }

    pub fn write_to<W: Write>(&self, mut fo: W) -> Result<()> {
        for vw in &self.words {
            fo.write_all(&vw.word).context("error writing vocab file")?;
            writeln!(fo, " {}", vw.count).context("error writing vocab file")?;
        }
        fo.flush().context("error writing vocab file")?;
        Ok(())
    }

    pub fn save(&self, vocab_file: &Path) -> Result<()> {
        let fo = BufWriter::new(
            File::create(vocab_file).context("error creating vocab file for write")?,
        );
        self.write_to(fo)
    }

    /// Reads `word count` lines and finalizes the result.
    pub fn read_from<R: BufRead>(fin: R, hash_size: usize, min_count: u64) -> Result<Self> {
        let mut vocab = Vocabulary::with_hash_size(hash_size);
        for (line_num, line) in fin.split(b'\n').enumerate() {
            let line = line.context("error reading vocabulary file")?;
            let fields = split_fields(&line).collect::<Vec<&[u8]>>();
            if fields.is_empty() {
                continue;
            }
            let malformed = Error::Malformed {
                what: "vocabulary file",
                line: line_num + 1,
            };
            anyhow::ensure!(fields.len() == 2, malformed);
            let cn: u64 = parse_field(fields[1]).ok_or(malformed)?;
            let a = match vocab.search(fields[0]) {
                Some(0) => 0,
                Some(_) => {
                    // each word may be listed only once
                    return Err(Error::Malformed {
                        what: "vocabulary file",
                        line: line_num + 1,
                    }
                    .into());
                }
                None => vocab.add_word(fields[0]),
            };
            vocab.words[a].count = cn;
        }
        vocab.finalize(min_count);
        Ok(vocab)
    }

    pub fn load(vocab_file: &Path, hash_size: usize, min_count: u64) -> Result<Self> {
        let fin = BufReader::new(
            File::open(vocab_file)
                .with_context(|| {
                    format!("error opening vocabulary file {}", vocab_file.display())
                })?,
        );
        let vocab = Self::read_from(fin, hash_size, min_count)?;
        info!(
            vocab_size = vocab.len(),
            train_words = vocab.train_words(),
            "read vocabulary"
        );
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false: `</s>` is never removed.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[VocabWord] {
        &self.words
    }

    /// Get the word for a word-index. Panics if `i` is out of range.
    pub fn word(&self, i: usize) -> &[u8] {
        &self.words[i].word
    }

    pub fn count(&self, i: usize) -> u64 {
        self.words[i].count
    }

    pub fn train_words(&self) -> u64 {
        self.train_words
    }
}
