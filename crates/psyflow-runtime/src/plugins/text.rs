//! `text` plugin - shows text until a key press, a click or a fixed duration
//!
//! Parameters (`text`, `end_type` and `button_string` may be arrays, one
//! entry per trial):
//! - `text`: content to show
//! - `title`: optional line shown above the text
//! - `end_type`: `keyboard` (default), `mouse` or `button`
//! - `button_string`: label of the button, `OK` by default
//! - `allowed_keys`: keys that end the trial, any key when empty. An array
//!   of arrays with one entry per trial sets the keys trial by trial.
//! - `timing_stim`: show the text for this many ms, then move on without
//!   waiting for a response or writing data
//! - `timing_min`: minimum display time in ms before responses count
//!
//! Writes `rt` (ms) and `key` (key code, or `mouse`/`button`).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{json, Value};

use psyflow_core::{as_millis_f64, ConfigurationError, DataMap, FlowError, FlowResult, Trial};
use psyflow_input::{KeySpec, KeyboardConfig};
use psyflow_timeline::{Plugin, TrialContext, TrialNode};

use super::millis_param;

/// How a text trial ends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndType {
    Keyboard,
    Mouse,
    Button,
}

impl EndType {
    pub fn name(self) -> &'static str {
        match self {
            EndType::Keyboard => "keyboard",
            EndType::Mouse => "mouse",
            EndType::Button => "button",
        }
    }
}

impl FromStr for EndType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyboard" => Ok(EndType::Keyboard),
            "mouse" => Ok(EndType::Mouse),
            "button" => Ok(EndType::Button),
            other => Err(invalid("end_type", format!("unknown end type '{}'", other))),
        }
    }
}

impl fmt::Display for EndType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn invalid(param: &str, reason: impl Into<String>) -> FlowError {
    ConfigurationError::InvalidParameter {
        param: param.to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Allow-list from a JSON array of key names and codes
fn key_specs(value: &Value) -> FlowResult<Vec<KeySpec>> {
    let Value::Array(keys) = value else {
        return Err(invalid("allowed_keys", "expected an array of keys"));
    };
    keys.iter()
        .map(|key| match key {
            Value::String(name) => Ok(KeySpec::Name(name.clone())),
            Value::Number(n) => n
                .as_u64()
                .and_then(|code| u32::try_from(code).ok())
                .map(KeySpec::from)
                .ok_or_else(|| invalid("allowed_keys", format!("invalid key code {}", n))),
            other => Err(invalid("allowed_keys", format!("invalid key {}", other))),
        })
        .collect()
}

/// The `text` plugin
#[derive(Clone, Copy, Debug, Default)]
pub struct Text;

const PER_TRIAL: &[&str] = &["text", "end_type", "button_string"];

#[async_trait]
impl Plugin for Text {
    fn kind(&self) -> &str {
        "text"
    }

    fn create(&self, node: &TrialNode) -> FlowResult<Vec<Trial>> {
        let expanded = node.expand(PER_TRIAL)?;
        let count = expanded.len();
        let keys_per_trial = match node.param("allowed_keys") {
            Some(Value::Array(keys)) if keys.len() == count && keys.iter().all(Value::is_array) => {
                Some(keys)
            }
            _ => None,
        };

        expanded
            .into_iter()
            .enumerate()
            .map(|(i, mut params)| {
                if !matches!(params.get("text"), Some(Value::String(_))) {
                    return Err(invalid("text", "expected a string"));
                }
                let end_type: EndType = params
                    .get("end_type")
                    .and_then(Value::as_str)
                    .unwrap_or("keyboard")
                    .parse()?;
                params.insert("end_type".to_string(), json!(end_type.name()));
                if let Some(keys) = keys_per_trial {
                    params.insert("allowed_keys".to_string(), keys[i].clone());
                }
                let keys = params
                    .entry("allowed_keys")
                    .or_insert_with(|| Value::Array(Vec::new()));
                key_specs(keys)?;
                params
                    .entry("button_string")
                    .or_insert_with(|| json!("OK"));
                millis_param(&params, "timing_stim")?;
                millis_param(&params, "timing_min")?;
                Ok(Trial::new("text", params))
            })
            .collect()
    }

    async fn trial(&self, ctx: &mut TrialContext<'_>, trial: &Trial) -> FlowResult<()> {
        let end_type: EndType = trial.param_str("end_type").unwrap_or("keyboard").parse()?;
        let text = trial.param_str("text").unwrap_or_default();
        let mut content = match trial.param_str("title").filter(|title| !title.is_empty()) {
            Some(title) => format!("{}\n{}", title, text),
            None => text.to_string(),
        };
        if end_type == EndType::Button {
            let label = trial.param_str("button_string").unwrap_or("OK");
            content = format!("{}\n[{}]", content, label);
        }

        ctx.clear();
        ctx.show(&content);

        if let Some(duration) = millis_param(trial.params(), "timing_stim")? {
            ctx.sleep(duration).await?;
            ctx.clear();
            return Ok(());
        }

        let min = millis_param(trial.params(), "timing_min")?.unwrap_or_default();
        let (rt, key) = match end_type {
            EndType::Keyboard => {
                // Keyboard rt counts from the end of the minimum display time
                if !min.is_zero() {
                    ctx.sleep(min).await?;
                }
                let keys = match trial.param("allowed_keys") {
                    Some(value) => key_specs(value)?,
                    None => Vec::new(),
                };
                let listener = ctx.listen_keyboard(&KeyboardConfig::keys(keys))?;
                let response = ctx.next_response(listener).await?;
                let key = response.key().map_or(Value::Null, |code| json!(code.get()));
                (response.rt().unwrap_or_default(), key)
            }
            EndType::Mouse | EndType::Button => {
                let listener = ctx.listen_pointer(min);
                let response = ctx.next_response(listener).await?;
                (response.rt().unwrap_or_default(), json!(end_type.name()))
            }
        };

        ctx.clear();
        let mut payload = DataMap::new();
        payload.insert("rt".to_string(), json!(as_millis_f64(rt)));
        payload.insert("key".to_string(), key);
        ctx.write(&payload)?;
        Ok(())
    }
}
