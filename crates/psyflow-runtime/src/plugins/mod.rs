//! Built-in plugins

pub mod call_function;
pub mod text;

pub use call_function::CallFunction;
pub use text::Text;

use std::time::Duration;

use serde_json::Value;

use psyflow_core::{ConfigurationError, DataMap, FlowResult};

/// Millisecond parameter. Absent, null and negative values mean "unset".
pub(crate) fn millis_param(params: &DataMap, key: &str) -> FlowResult<Option<Duration>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_f64() {
            Some(ms) if ms > 0.0 => Ok(Some(Duration::from_nanos((ms * 1_000_000.0).round() as u64))),
            Some(_) => Ok(None),
            None => Err(ConfigurationError::InvalidParameter {
                param: key.to_string(),
                reason: format!("expected milliseconds, got {}", value),
            }
            .into()),
        },
    }
}
