//! Randomizer - seeded source of every random decision in a session

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use psyflow_core::{FlowResult, SamplingError};

/// Owns the RNG used for shuffles, samples and block reordering
#[derive(Debug)]
pub struct Randomizer {
    rng: StdRng,
}

impl Randomizer {
    /// Randomizer seeded from OS entropy
    pub fn new() -> Self {
        Randomizer {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible randomizer
    pub fn with_seed(seed: u64) -> Self {
        Randomizer {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Uniform index in `0..upper`
    #[inline]
    pub fn index(&mut self, upper: usize) -> usize {
        self.rng.gen_range(0..upper)
    }

    /// In-place Fisher-Yates permutation
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        let mut m = items.len();
        while m > 1 {
            let i = self.rng.gen_range(0..m);
            m -= 1;
            items.swap(m, i);
        }
    }

    /// Shuffled copy of `items`
    pub fn shuffled<T: Clone>(&mut self, items: &[T]) -> Vec<T> {
        let mut out = items.to_vec();
        self.shuffle(&mut out);
        out
    }

    /// Draw `n` items.
    ///
    /// Without replacement the result holds `n` distinct positions of
    /// `items`; asking for more than the population is an error. With
    /// replacement every draw is independent.
    pub fn sample<T: Clone>(
        &mut self,
        items: &[T],
        n: usize,
        with_replacement: bool,
    ) -> FlowResult<Vec<T>> {
        if with_replacement {
            if items.is_empty() && n > 0 {
                return Err(SamplingError::EmptyPopulation { requested: n }.into());
            }
            return Ok((0..n)
                .map(|_| items[self.rng.gen_range(0..items.len())].clone())
                .collect());
        }

        if n > items.len() {
            return Err(SamplingError::SampleTooLarge {
                requested: n,
                available: items.len(),
            }
            .into());
        }

        let mut pool = self.shuffled(items);
        pool.truncate(n);
        Ok(pool)
    }
}

impl Default for Randomizer {
    fn default() -> Self {
        Self::new()
    }
}
