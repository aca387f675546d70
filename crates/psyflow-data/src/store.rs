//! Data store - append-only log of trial records

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use psyflow_core::{
    as_millis_f64, ChunkId, DataAccessError, DataMap, FlowResult, TrialIndex, TrialRecord,
    FIELD_CHUNK_ID, FIELD_TIME_ELAPSED, FIELD_TRIAL_INDEX, FIELD_TRIAL_INDEX_LOCAL, FIELD_TYPE,
};

/// Session state stamped onto every record
#[derive(Clone, Debug, PartialEq)]
pub struct WriteContext {
    /// Plugin kind of the running trial
    pub kind: String,
    pub trial_index: TrialIndex,
    /// Position of the trial inside its block
    pub trial_index_local: usize,
    /// Time since session start
    pub time_elapsed: Duration,
    /// Chunk instance that contains the active block
    pub chunk_id: ChunkId,
}

impl WriteContext {
    fn builtin_fields(&self) -> DataMap {
        let mut fields = DataMap::new();
        fields.insert(FIELD_TYPE.into(), Value::from(self.kind.as_str()));
        fields.insert(FIELD_TRIAL_INDEX.into(), Value::from(self.trial_index.get()));
        fields.insert(FIELD_TRIAL_INDEX_LOCAL.into(), Value::from(self.trial_index_local));
        fields.insert(FIELD_TIME_ELAPSED.into(), Value::from(as_millis_f64(self.time_elapsed)));
        fields.insert(FIELD_CHUNK_ID.into(), Value::from(self.chunk_id.as_str()));
        fields
    }
}

/// Trial data store
///
/// Records are only appended. The single exception is
/// [`DataStore::amend_last`], which lets a plugin attach data to the row it
/// just wrote.
#[derive(Clone, Debug, Default)]
pub struct DataStore {
    records: Vec<TrialRecord>,
    properties: DataMap,
}

impl DataStore {
    pub fn new() -> Self {
        DataStore::default()
    }

    /// Append a record.
    ///
    /// Fields are merged lowest to highest precedence: built-in session
    /// fields, global properties, `payload`, then the trial's own data.
    pub fn write(
        &mut self,
        context: &WriteContext,
        payload: &DataMap,
        trial_data: &DataMap,
    ) -> &TrialRecord {
        let mut record = TrialRecord::from_map(context.builtin_fields());
        record.merge(&self.properties);
        record.merge(payload);
        record.merge(trial_data);

        debug!(
            trial = context.trial_index.get(),
            kind = %context.kind,
            chunk = %context.chunk_id,
            fields = record.len(),
            "trial data written"
        );
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    /// Register properties merged into every record written from now on.
    /// Rows already stored are immutable and keep their values.
    pub fn add_properties(&mut self, properties: &DataMap) {
        for (key, value) in properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }

    pub fn properties(&self) -> &DataMap {
        &self.properties
    }

    /// Merge `data` into the most recent record
    pub fn amend_last(&mut self, data: &DataMap) -> FlowResult<&TrialRecord> {
        let last = self
            .records
            .last_mut()
            .ok_or(DataAccessError::EmptyStore)?;
        last.merge(data);
        Ok(&*last)
    }

    /// Every record in insertion order
    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the log out of the store
    pub fn into_records(self) -> Vec<TrialRecord> {
        self.records
    }
}
