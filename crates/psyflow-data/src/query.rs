//! Queries over the session log

use serde_json::Value;

use psyflow_core::{ChunkId, DataMap, TrialRecord};

use crate::DataStore;

impl DataStore {
    /// Records whose `type` is exactly `kind`, in insertion order
    pub fn trials_of_type(&self, kind: &str) -> Vec<&TrialRecord> {
        self.records()
            .iter()
            .filter(|record| record.kind() == Some(kind))
            .collect()
    }

    /// Records produced while `chunk_id` (or one of its descendants) was
    /// active
    pub fn trials_from_chunk(&self, chunk_id: &ChunkId) -> Vec<&TrialRecord> {
        self.records()
            .iter()
            .filter(|record| record.chunk_id().is_some_and(|id| chunk_id.contains(id)))
            .collect()
    }

    /// First record stamped with global index `index`
    pub fn by_trial_index(&self, index: u64) -> Option<&TrialRecord> {
        self.records()
            .iter()
            .find(|record| record.trial_index() == Some(index))
    }

    pub fn last(&self) -> Option<&TrialRecord> {
        self.records().last()
    }

    /// Every record from the chunk instance of the last record
    pub fn last_chunk_data(&self) -> Vec<&TrialRecord> {
        let Some(id) = self
            .last()
            .and_then(TrialRecord::chunk_id)
            .and_then(ChunkId::parse)
        else {
            return Vec::new();
        };
        self.trials_from_chunk(&id)
    }
}

/// Gather `fields` from `rows` into one column-major record.
///
/// A row without a field contributes `null`, so columns stay aligned by
/// row. With `concat_arrays`, array values are flattened into the column
/// instead of nested and missing fields contribute nothing.
pub fn collect_fields<'a>(
    rows: impl IntoIterator<Item = &'a TrialRecord>,
    fields: &[&str],
    concat_arrays: bool,
) -> DataMap {
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); fields.len()];

    for row in rows {
        for (field, column) in fields.iter().zip(columns.iter_mut()) {
            match row.get(field) {
                Some(Value::Array(values)) if concat_arrays => column.extend(values.iter().cloned()),
                Some(value) => column.push(value.clone()),
                None if concat_arrays => {}
                None => column.push(Value::Null),
            }
        }
    }

    fields
        .iter()
        .zip(columns)
        .map(|(field, column)| (field.to_string(), Value::Array(column)))
        .collect()
}
