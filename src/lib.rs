//! Skip-gram word embeddings with negative sampling, where some words take
//! their input vector from a weighted blend of shared semantic basis vectors.

pub mod config;
pub mod error;
pub mod model;
pub mod projection;
pub mod sigmoid;
pub mod tokenizer;
pub mod train;
pub mod unigram;
pub mod vectors;
pub mod vocab;
mod worker;

pub use config::{OutputFormat, ProjectionSource, TrainConfig};
pub use error::Error;
pub use model::{Embeddings, Matrix, Model, Real};
pub use projection::ProjectionStore;
pub use train::{run, Trained, Trainer};
pub use unigram::UnigramTable;
pub use vectors::Vectors;
pub use vocab::{VocabWord, Vocabulary};

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

/// Longest token kept, in bytes. Longer tokens are truncated.
pub const MAX_TOKEN_LEN: usize = 99;

pub const MAX_SENTENCE_LENGTH: usize = 1000;

/// The sentence-boundary token. Always entry 0 of the vocabulary.
pub const SENTINEL: &[u8] = b"</s>";

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 19960322;

/// Linear congruential generator. Every worker thread owns one, so draws are
/// reproducible per thread.
#[derive(Debug, Clone)]
pub struct Rng(pub u64);

impl Rng {
    /// The generator for worker `id` of a run seeded with `seed`.
    ///
    /// Weight initialization uses `Rng(seed)` itself, so worker streams start
    /// one step further along.
    pub fn for_worker(seed: u64, id: usize) -> Self {
        Rng(seed.wrapping_add(1).wrapping_add(id as u64))
    }

    pub fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// Get a uniformly distributed random number in `0.0 .. 1.0`.
    pub fn rand_real(&mut self) -> real {
        (self.rand_u64() & 0xFFFF) as real / 65536.0
    }
}

pub fn norm(v: &[real]) -> real {
    v.iter().copied().map(|e| e * e).sum::<real>().sqrt()
}

pub fn normalize(v: &mut [real]) {
    let len = norm(v);
    if len == 0.0 {
        return;
    }
    for e in v {
        *e /= len;
    }
}

pub fn dot(a: &[real], b: &[real]) -> real {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

/// Cosine similarity. Zero if either vector is zero.
pub fn cosine(a: &[real], b: &[real]) -> real {
    let d = norm(a) * norm(b);
    if d == 0.0 {
        0.0
    } else {
        dot(a, b) / d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_streams_differ() {
        let mut a = Rng::for_worker(DEFAULT_SEED, 0);
        let mut b = Rng::for_worker(DEFAULT_SEED, 1);
        assert_ne!(a.rand_u64(), b.rand_u64());

        let mut c = Rng::for_worker(DEFAULT_SEED, 0);
        let mut a = Rng::for_worker(DEFAULT_SEED, 0);
        assert_eq!(a.rand_u64(), c.rand_u64());
    }

    #[test]
    fn rand_real_in_unit_interval() {
        let mut rng = Rng(7);
        for _ in 0..10_000 {
            let x = rng.rand_real();
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn cosine_of_parallel_and_orthogonal() {
        assert!((cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 3.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
