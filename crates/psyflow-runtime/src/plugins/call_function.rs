//! `call-function` plugin - runs a registered function as a trial
//!
//! The node names the function with `func` (an array runs one trial per
//! name). The function gets read access to the log and its return value is
//! written under `value`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use psyflow_core::{ConfigurationError, DataMap, FlowResult, Trial};
use psyflow_data::DataStore;
use psyflow_timeline::{Plugin, TrialContext, TrialNode};

pub type CallFn = Arc<dyn Fn(&DataStore) -> Value + Send + Sync>;

/// The `call-function` plugin with its function table
#[derive(Clone, Default)]
pub struct CallFunction {
    functions: HashMap<String, CallFn>,
}

impl CallFunction {
    pub fn new() -> Self {
        CallFunction::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&DataStore) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn lookup(&self, name: &str) -> FlowResult<&CallFn> {
        self.functions
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownCallback(name.to_string()).into())
    }
}

impl fmt::Debug for CallFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFunction")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Plugin for CallFunction {
    fn kind(&self) -> &str {
        "call-function"
    }

    fn create(&self, node: &TrialNode) -> FlowResult<Vec<Trial>> {
        node.expand(&["func"])?
            .into_iter()
            .map(|params| {
                let name = params.get("func").and_then(Value::as_str).ok_or_else(|| {
                    ConfigurationError::InvalidParameter {
                        param: "func".to_string(),
                        reason: "expected a function name".to_string(),
                    }
                })?;
                self.lookup(name)?;
                Ok(Trial::new("call-function", params))
            })
            .collect()
    }

    async fn trial(&self, ctx: &mut TrialContext<'_>, trial: &Trial) -> FlowResult<()> {
        let f = self.lookup(trial.param_str("func").unwrap_or_default())?;
        let value = f(ctx.data());

        let mut payload = DataMap::new();
        payload.insert("value".to_string(), value);
        ctx.write(&payload)?;
        Ok(())
    }
}
