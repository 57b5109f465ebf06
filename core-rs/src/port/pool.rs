/**
 * pool.rs
 * Candidate pool: every port of the range, shuffled once
 *
 * Shards started together would all hit the lowest port first with an
 * ascending scan. Shuffling spreads their first attempts over the range so
 * most of them lock on the first or second try.
 */

use rand::seq::SliceRandom;
use rand::Rng;

use super::PortRange;

/// Randomized, bounded sequence of candidate ports
#[derive(Debug, Clone)]
pub struct CandidatePool {
    range: PortRange,
    candidates: Vec<u16>,
}

impl CandidatePool {
    /// Shuffle the range with the thread-local RNG
    pub fn shuffled(range: PortRange) -> Self {
        Self::shuffled_with(range, &mut rand::thread_rng())
    }

    /// Shuffle the range with a caller-supplied RNG
    pub fn shuffled_with<R: Rng + ?Sized>(range: PortRange, rng: &mut R) -> Self {
        let mut candidates: Vec<u16> = range.iter().collect();
        candidates.shuffle(rng);
        CandidatePool { range, candidates }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates in their shuffled order
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.candidates.iter().copied()
    }
}

impl<'a> IntoIterator for &'a CandidatePool {
    type Item = u16;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, u16>>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter().copied()
    }
}
