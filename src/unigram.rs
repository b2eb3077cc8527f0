//! The noise distribution for negative sampling.

use crate::vocab::Vocabulary;

/// Default number of slots in the table.
pub const TABLE_SIZE: usize = 100_000_000;

const POWER: f64 = 0.75;

/// A table of word indexes in which each word occupies a share of slots
/// proportional to `count^0.75`. Drawing a uniform slot samples the smoothed
/// unigram distribution in constant time.
pub struct UnigramTable {
    table: Vec<u32>,
}

impl UnigramTable {
    pub fn with_size(vocab: &Vocabulary, table_size: usize) -> Self {
        assert!(table_size > 0);
        let vocab_size = vocab.len();
        let train_words_pow = vocab
            .words()
            .iter()
            .map(|v| (v.count as f64).powf(POWER))
            .sum::<f64>();
        let share = |i: usize| (vocab.count(i) as f64).powf(POWER) / train_words_pow;

        let mut table = Vec::with_capacity(table_size);
        let mut i = 0;
        let mut d1 = share(i);
        for a in 0..table_size {
            table.push(i as u32);
            if (a as f64 / table_size as f64) > d1 && i + 1 < vocab_size {
                i += 1;
                d1 += share(i);
            }
        }
        UnigramTable { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The word in the slot selected by the random value `r`.
    pub fn sample(&self, r: u64) -> usize {
        self.table[(r >> 16) as usize % self.table.len()] as usize
    }

    /// Number of slots held by word `i`.
    #[cfg(test)]
    fn slots(&self, i: usize) -> usize {
        self.table.iter().filter(|&&w| w as usize == i).count()
    }
}
