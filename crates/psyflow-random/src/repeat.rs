//! Repetition - expand a design into a shuffled multiset

use serde_json::Value;

use psyflow_core::{DataMap, FlowResult, SamplingError};

use crate::Randomizer;

/// How many times each item appears
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Repetitions {
    /// Same count for every item
    Uniform(usize),
    /// One count per item, positionally
    PerItem(Vec<usize>),
}

impl Repetitions {
    fn expand(&self, items: usize) -> FlowResult<Vec<usize>> {
        match self {
            Repetitions::Uniform(n) => Ok(vec![*n; items]),
            Repetitions::PerItem(counts) if counts.len() == items => Ok(counts.clone()),
            Repetitions::PerItem(counts) => Err(SamplingError::RepetitionMismatch {
                items,
                counts: counts.len(),
            }
            .into()),
        }
    }
}

impl From<usize> for Repetitions {
    fn from(n: usize) -> Self {
        Repetitions::Uniform(n)
    }
}

impl From<Vec<usize>> for Repetitions {
    fn from(counts: Vec<usize>) -> Self {
        Repetitions::PerItem(counts)
    }
}

impl From<&[usize]> for Repetitions {
    fn from(counts: &[usize]) -> Self {
        Repetitions::PerItem(counts.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Repetitions {
    fn from(counts: [usize; N]) -> Self {
        Repetitions::PerItem(counts.to_vec())
    }
}

impl Randomizer {
    /// Each item `counts[i]` times, in shuffled order
    pub fn repeat<T: Clone>(
        &mut self,
        items: &[T],
        counts: impl Into<Repetitions>,
    ) -> FlowResult<Vec<T>> {
        let counts = counts.into().expand(items.len())?;

        let mut out = Vec::with_capacity(counts.iter().sum());
        for (item, &n) in items.iter().zip(&counts) {
            out.extend(std::iter::repeat(item).take(n).cloned());
        }
        self.shuffle(&mut out);
        Ok(out)
    }

    /// `repeat` over records, transposed into one record of parallel arrays
    pub fn repeat_unpacked(
        &mut self,
        records: &[DataMap],
        counts: impl Into<Repetitions>,
    ) -> FlowResult<DataMap> {
        let repeated = self.repeat(records, counts)?;
        Ok(unpack(&repeated))
    }
}

/// Transpose row-major records into a column-major record.
///
/// Columns are the union of keys in order of first appearance; a row that
/// lacks a column contributes `null` so every column has one entry per row.
pub fn unpack(records: &[DataMap]) -> DataMap {
    let mut columns = DataMap::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains_key(key) {
                columns.insert(key.clone(), Value::Array(Vec::with_capacity(records.len())));
            }
        }
    }

    for (key, column) in columns.iter_mut() {
        if let Value::Array(values) = column {
            values.extend(
                records
                    .iter()
                    .map(|record| record.get(key).cloned().unwrap_or(Value::Null)),
            );
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use psyflow_core::FlowError;
    use serde_json::json;

    fn map(value: Value) -> DataMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_repeat_per_item_counts() {
        let mut rng = Randomizer::with_seed(11);
        let mut out = rng.repeat(&["a", "b"], [2, 3]).unwrap();
        out.sort_unstable();
        assert_eq!(out, vec!["a", "a", "b", "b", "b"]);
    }

    #[test]
    fn test_repeat_uniform_count() {
        let mut rng = Randomizer::with_seed(11);
        let out = rng.repeat(&[1, 2, 3], 4).unwrap();
        assert_eq!(out.len(), 12);
        for item in [1, 2, 3] {
            assert_eq!(out.iter().filter(|&&x| x == item).count(), 4);
        }
        assert!(rng.repeat(&[1, 2, 3], 0).unwrap().is_empty());
    }

    #[test]
    fn test_repeat_count_mismatch() {
        let err = Randomizer::with_seed(0)
            .repeat(&["a", "b", "c"], vec![1, 2])
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::Sampling(SamplingError::RepetitionMismatch { items: 3, counts: 2 })
        );
    }

    #[test]
    fn test_unpack_is_column_major() {
        let rows = vec![
            map(json!({"word": "red", "color": "blue"})),
            map(json!({"word": "green", "extra": true})),
        ];
        let columns = unpack(&rows);

        let keys: Vec<_> = columns.keys().cloned().collect();
        assert_eq!(keys, vec!["word", "color", "extra"]);
        assert_eq!(columns["word"], json!(["red", "green"]));
        assert_eq!(columns["color"], json!(["blue", null]));
        assert_eq!(columns["extra"], json!([null, true]));
    }

    #[test]
    fn test_repeat_unpacked_keeps_rows_aligned() {
        let rows = vec![
            map(json!({"stim": "A", "correct": 70})),
            map(json!({"stim": "B", "correct": 71})),
        ];
        let columns = Randomizer::with_seed(5).repeat_unpacked(&rows, 3).unwrap();

        let stims = columns["stim"].as_array().unwrap();
        let correct = columns["correct"].as_array().unwrap();
        assert_eq!(stims.len(), 6);
        for (stim, key) in stims.iter().zip(correct) {
            let expected = if stim == "A" { 70 } else { 71 };
            assert_eq!(key, &json!(expected));
        }
    }
}
