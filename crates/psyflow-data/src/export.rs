//! Export - JSON and CSV renderings of the log

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use psyflow_core::{ConfigurationError, FlowError, FlowResult, TrialRecord};

use crate::DataStore;

const DELIMITER: char = ',';
const LINE_END: &str = "\r\n";

/// Serialization format of an exported log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    #[default]
    Json,
    Csv,
}

impl DataFormat {
    /// File extension without the dot
    pub fn extension(self) -> &'static str {
        match self {
            DataFormat::Json => "json",
            DataFormat::Csv => "csv",
        }
    }
}

impl FromStr for DataFormat {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(DataFormat::Json),
            "csv" => Ok(DataFormat::Csv),
            other => Err(ConfigurationError::InvalidParameter {
                param: "format".to_string(),
                reason: format!("unknown data format '{}'", other),
            }
            .into()),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl DataStore {
    /// Lossless pretty-printed JSON array
    pub fn to_json(&self) -> FlowResult<String> {
        records_to_json(self.records())
    }

    pub fn to_csv(&self) -> String {
        records_to_csv(self.records())
    }

    pub fn export(&self, format: DataFormat) -> FlowResult<String> {
        match format {
            DataFormat::Json => self.to_json(),
            DataFormat::Csv => Ok(self.to_csv()),
        }
    }
}

pub fn records_to_json(records: &[TrialRecord]) -> FlowResult<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// CSV with a header that is the union of all keys in order of first
/// appearance. Missing values are empty fields.
pub fn records_to_csv(records: &[TrialRecord]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut out = String::new();
    push_row(&mut out, columns.iter().map(|c| c.to_string()));
    for record in records {
        push_row(
            &mut out,
            columns
                .iter()
                .map(|column| record.get(column).map(render_value).unwrap_or_default()),
        );
    }
    out
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(&escape_field(&field));
    }
    out.push_str(LINE_END);
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Nested values as compact JSON
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn escape_field(field: &str) -> String {
    if field.contains([DELIMITER, '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
