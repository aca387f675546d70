//! No-repeat shuffling
//!
//! A shuffle is repaired by swapping out adjacent duplicates. The repair is
//! bounded by [`NoRepeatLimits`]; when it runs out, a greedy construction
//! (most frequent class first) decides whether any valid order exists at all.

use tracing::debug;

use psyflow_core::{FlowResult, SamplingError};

use crate::Randomizer;

/// Bounds on the swap-repair phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoRepeatLimits {
    /// Full scans over the sequence
    pub max_passes: usize,
    /// Random swap candidates tried for one violation within a pass
    pub max_attempts_per_violation: usize,
}

impl Default for NoRepeatLimits {
    fn default() -> Self {
        NoRepeatLimits {
            max_passes: 100,
            max_attempts_per_violation: 64,
        }
    }
}

/// True if no two neighbours are equal under `equals`
pub fn has_no_repeats<T>(items: &[T], equals: impl Fn(&T, &T) -> bool) -> bool {
    items.windows(2).all(|pair| !equals(&pair[0], &pair[1]))
}

impl Randomizer {
    /// Shuffle so that no two adjacent elements compare equal
    pub fn shuffle_no_repeats<T, F>(&mut self, items: &[T], equals: F) -> FlowResult<Vec<T>>
    where
        T: Clone,
        F: Fn(&T, &T) -> bool,
    {
        self.shuffle_no_repeats_with_limits(items, equals, NoRepeatLimits::default())
    }

    /// [`shuffle_no_repeats`](Self::shuffle_no_repeats) with `==`
    pub fn shuffle_no_repeats_eq<T: Clone + PartialEq>(&mut self, items: &[T]) -> FlowResult<Vec<T>> {
        self.shuffle_no_repeats(items, |a, b| a == b)
    }

    pub fn shuffle_no_repeats_with_limits<T, F>(
        &mut self,
        items: &[T],
        equals: F,
        limits: NoRepeatLimits,
    ) -> FlowResult<Vec<T>>
    where
        T: Clone,
        F: Fn(&T, &T) -> bool,
    {
        let mut out = self.shuffled(items);
        if out.len() < 2 {
            return Ok(out);
        }

        for _ in 0..limits.max_passes {
            let mut violations = 0;
            for i in 0..out.len() - 1 {
                if equals(&out[i], &out[i + 1]) {
                    violations += 1;
                    self.repair(&mut out, i + 1, &equals, limits.max_attempts_per_violation);
                }
            }
            if violations == 0 || has_no_repeats(&out, &equals) {
                return Ok(out);
            }
        }

        debug!(
            len = out.len(),
            passes = limits.max_passes,
            "swap repair exhausted, falling back to greedy arrangement"
        );
        // Classes are keyed on a representative, so a non-transitive
        // `equals` can still leave equal neighbours
        greedy_arrangement(&out, &equals)
            .filter(|arranged| has_no_repeats(arranged, &equals))
            .ok_or_else(|| SamplingError::NoRepeatArrangement { len: items.len() }.into())
    }

    /// Swap `out[pos]` with a random slot whose exchange leaves both
    /// neighbourhoods clean. Returns false if no candidate was found.
    fn repair<T, F>(&mut self, out: &mut [T], pos: usize, equals: &F, attempts: usize) -> bool
    where
        F: Fn(&T, &T) -> bool,
    {
        let len = out.len();
        for _ in 0..attempts {
            let j = self.index(len);
            if j == pos {
                continue;
            }
            out.swap(pos, j);
            if locally_clean(out, pos, equals) && locally_clean(out, j, equals) {
                return true;
            }
            out.swap(pos, j);
        }
        false
    }
}

fn locally_clean<T, F>(out: &[T], pos: usize, equals: &F) -> bool
where
    F: Fn(&T, &T) -> bool,
{
    let before = pos == 0 || !equals(&out[pos - 1], &out[pos]);
    let after = pos + 1 >= out.len() || !equals(&out[pos], &out[pos + 1]);
    before && after
}

/// Deterministic construction: always place an element of the largest
/// remaining class that differs from the previous element.
fn greedy_arrangement<T, F>(items: &[T], equals: &F) -> Option<Vec<T>>
where
    T: Clone,
    F: Fn(&T, &T) -> bool,
{
    let mut classes: Vec<Vec<T>> = Vec::new();
    for item in items {
        match classes.iter_mut().find(|class| equals(&class[0], item)) {
            Some(class) => class.push(item.clone()),
            None => classes.push(vec![item.clone()]),
        }
    }

    let mut out = Vec::with_capacity(items.len());
    let mut previous: Option<usize> = None;
    while out.len() < items.len() {
        let pick = classes
            .iter()
            .enumerate()
            .filter(|(idx, class)| !class.is_empty() && Some(*idx) != previous)
            .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then(ib.cmp(ia)))
            .map(|(idx, _)| idx)?;

        out.push(classes[pick].pop()?);
        previous = Some(pick);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use psyflow_core::FlowError;

    fn counts(items: &[u8]) -> [usize; 4] {
        let mut out = [0; 4];
        for &x in items {
            out[x as usize] += 1;
        }
        out
    }

    #[test]
    fn test_no_adjacent_duplicates() {
        let items = ["a", "a", "a", "b", "b", "b", "c", "c", "c"];
        let mut rng = Randomizer::with_seed(42);
        for _ in 0..50 {
            let out = rng.shuffle_no_repeats_eq(&items).unwrap();
            assert!(has_no_repeats(&out, |a, b| a == b));
            let mut sorted = out.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, items);
        }
    }

    #[test]
    fn test_custom_equality() {
        // Equal when the first letter matches
        let items = ["ax", "ay", "bx", "by", "cx", "cy"];
        let same_letter = |a: &&str, b: &&str| a.as_bytes()[0] == b.as_bytes()[0];
        let out = Randomizer::with_seed(3)
            .shuffle_no_repeats(&items, same_letter)
            .unwrap();
        assert!(has_no_repeats(&out, same_letter));
    }

    #[test]
    fn test_tight_arrangement_uses_fallback() {
        // Only one valid order exists: a b a b a
        let items = ['a', 'a', 'a', 'b', 'b'];
        let limits = NoRepeatLimits {
            max_passes: 0,
            max_attempts_per_violation: 0,
        };
        let out = Randomizer::with_seed(8)
            .shuffle_no_repeats_with_limits(&items, |a, b| a == b, limits)
            .unwrap();
        assert_eq!(out, vec!['a', 'b', 'a', 'b', 'a']);
    }

    #[test]
    fn test_impossible_arrangement_is_error() {
        let err = Randomizer::with_seed(1)
            .shuffle_no_repeats_eq(&[1, 1, 1, 2])
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::Sampling(SamplingError::NoRepeatArrangement { len: 4 })
        );
    }

    #[test]
    fn test_non_transitive_equality_is_checked() {
        // 1 is "equal" to both 0 and 2, so every order has an equal pair
        let near = |a: &i32, b: &i32| (a - b).abs() <= 1;
        let limits = NoRepeatLimits {
            max_passes: 0,
            max_attempts_per_violation: 0,
        };
        for seed in 0..20 {
            let err = Randomizer::with_seed(seed)
                .shuffle_no_repeats_with_limits(&[0, 1, 2], near, limits)
                .unwrap_err();
            assert_eq!(
                err,
                FlowError::Sampling(SamplingError::NoRepeatArrangement { len: 3 })
            );
        }
    }

    #[test]
    fn test_trivial_inputs() {
        let mut rng = Randomizer::with_seed(0);
        assert!(rng.shuffle_no_repeats_eq::<u8>(&[]).unwrap().is_empty());
        assert_eq!(rng.shuffle_no_repeats_eq(&[7]).unwrap(), vec![7]);
    }

    proptest! {
        #[test]
        fn prop_feasible_inputs_never_repeat(
            items in proptest::collection::vec(0u8..4, 0..40),
            seed in any::<u64>(),
        ) {
            let max = counts(&items).into_iter().max().unwrap_or(0);
            prop_assume!(max <= (items.len() + 1) / 2);

            let out = Randomizer::with_seed(seed).shuffle_no_repeats_eq(&items).unwrap();
            prop_assert!(has_no_repeats(&out, |a, b| a == b));
            prop_assert_eq!(counts(&out), counts(&items));
        }
    }
}
