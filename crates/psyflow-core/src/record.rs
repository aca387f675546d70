//! Trial records - flat, insertion-ordered rows of the session log

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value bag used for payloads, trial data and global properties
pub type DataMap = Map<String, Value>;

/// Plugin kind of the trial that produced the row
pub const FIELD_TYPE: &str = "type";
/// Global trial counter
pub const FIELD_TRIAL_INDEX: &str = "trial_index";
/// Position of the trial inside its block
pub const FIELD_TRIAL_INDEX_LOCAL: &str = "trial_index_local";
/// Milliseconds since session start
pub const FIELD_TIME_ELAPSED: &str = "time_elapsed";
/// Id of the chunk instance that was active
pub const FIELD_CHUNK_ID: &str = "internal_chunk_id";

/// One logged row.
///
/// Keys keep the position of their first insertion; overwriting a key keeps
/// its column position and replaces the value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialRecord(DataMap);

impl TrialRecord {
    pub fn new() -> Self {
        TrialRecord(Map::new())
    }

    pub fn from_map(map: DataMap) -> Self {
        TrialRecord(map)
    }

    /// Merge `fields` over the existing values
    pub fn merge(&mut self, fields: &DataMap) {
        for (key, value) in fields {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Plugin kind (`type` field)
    pub fn kind(&self) -> Option<&str> {
        self.0.get(FIELD_TYPE).and_then(Value::as_str)
    }

    pub fn trial_index(&self) -> Option<u64> {
        self.0.get(FIELD_TRIAL_INDEX).and_then(Value::as_u64)
    }

    pub fn chunk_id(&self) -> Option<&str> {
        self.0.get(FIELD_CHUNK_ID).and_then(Value::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &DataMap {
        &self.0
    }

    pub fn into_map(self) -> DataMap {
        self.0
    }
}

impl From<DataMap> for TrialRecord {
    fn from(map: DataMap) -> Self {
        TrialRecord(map)
    }
}
