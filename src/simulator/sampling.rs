//! Categorical sampling and per-particle random streams.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Discrete distribution over `0..len`, sampled by inverting its cumulative sum
#[derive(Debug, Clone, PartialEq)]
pub struct Categorical {
    cdf: Vec<f64>,
}

impl Categorical {
    /// Build from non-negative weights
    ///
    /// Weights are normalized by their sum. Returns `None` if there are no weights, if any
    /// weight is negative or not finite, or if all weights are zero.
    pub fn new(weights: &[f64]) -> Option<Self> {
        if weights.is_empty() || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return None;
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }

        let mut cdf = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for w in weights {
            acc += w / total;
            cdf.push(acc);
        }
        // The last category with non-zero weight closes the distribution exactly
        let last = weights.iter().rposition(|w| *w > 0.0).unwrap_or(weights.len() - 1);
        for c in cdf.iter_mut().skip(last) {
            *c = 1.0;
        }
        Some(Self { cdf })
    }

    /// Number of categories
    pub fn len(&self) -> usize {
        self.cdf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cdf.is_empty()
    }

    /// Probability of category `i`
    ///
    /// # Panics
    ///
    /// Panics if `i` is not below [Categorical::len].
    pub fn probability(&self, i: usize) -> f64 {
        match i {
            0 => self.cdf[0],
            _ => self.cdf[i] - self.cdf[i - 1],
        }
    }

    /// Category selected by the uniform variate `u` in `[0, 1)`
    #[inline(always)]
    pub fn index_of(&self, u: f64) -> usize {
        self.cdf
            .partition_point(|&c| c <= u)
            .min(self.cdf.len() - 1)
    }

    /// Draw one category
    #[inline(always)]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.index_of(rng.random::<f64>())
    }
}

/// Seed of the random stream owned by `particle`
///
/// Mixes the base seed and the particle index with the SplitMix64 finalizer, so that
/// neighbouring particles get unrelated streams.
pub fn derive_seed(base: u64, particle: usize) -> u64 {
    let mut z = base ^ (particle as u64)
        .wrapping_add(1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Independent random stream for one particle
pub fn particle_rng(base: u64, particle: usize) -> StdRng {
    StdRng::seed_from_u64(derive_seed(base, particle))
}
