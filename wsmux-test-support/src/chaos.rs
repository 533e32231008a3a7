//! Randomized delivery: hand bytes to the engine in unpredictable pieces.
//!
//! Real transports rarely deliver a frame in one read. [`ChunkedDelivery`] makes the
//! mocks behave the same way so partial-frame and partial-line paths get exercised.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chaos source for chunk sizes.
///
/// # Example
///
/// ```
/// use wsmux_test_support::chaos::ChunkedDelivery;
///
/// let mut chunks = ChunkedDelivery::seeded(1, 3, 7);
/// let pieces = chunks.split(b"hello world");
/// assert!(pieces.iter().all(|p| (1..=3).contains(&p.len())));
/// assert_eq!(pieces.concat(), b"hello world");
/// ```
#[derive(Debug, Clone)]
pub struct ChunkedDelivery {
    min: usize,
    max: usize,
    rng: StdRng,
    chunks_issued: usize,
}

impl ChunkedDelivery {
    /// Chunks of `min..=max` bytes from an entropy-seeded generator.
    pub fn new(min: usize, max: usize) -> Self {
        Self::with_rng(min, max, StdRng::from_entropy())
    }

    /// Reproducible sequence of chunk sizes.
    pub fn seeded(min: usize, max: usize, seed: u64) -> Self {
        Self::with_rng(min, max, StdRng::seed_from_u64(seed))
    }

    /// One byte at a time, the harshest setting.
    pub fn trickle() -> Self {
        Self::seeded(1, 1, 0)
    }

    fn with_rng(min: usize, max: usize, rng: StdRng) -> Self {
        let min = min.max(1);
        Self { min, max: max.max(min), rng, chunks_issued: 0 }
    }

    pub fn next_chunk(&mut self) -> usize {
        self.chunks_issued += 1;
        self.rng.gen_range(self.min..=self.max)
    }

    /// Split `data` into consecutive random-sized pieces.
    pub fn split(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut pieces = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.next_chunk().min(rest.len());
            pieces.push(rest[..n].to_vec());
            rest = &rest[n..];
        }
        pieces
    }

    pub fn chunks_issued(&self) -> usize {
        self.chunks_issued
    }
}
