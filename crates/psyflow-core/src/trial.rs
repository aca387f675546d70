//! Trials - fully parameterized presentation units
//!
//! A trial is produced by a plugin's `create` phase while the chunk tree is
//! built and never changes afterwards. Callbacks are shared behind `Arc`, so
//! cloning a trial (block reshuffles, repetitions) is cheap.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::{DataMap, TrialRecord};

/// Produces data merged into the trial's record at write time
pub type DataFn = Arc<dyn Fn() -> DataMap + Send + Sync>;
/// Produces the pause after a trial
pub type DelayFn = Arc<dyn Fn() -> Duration + Send + Sync>;
/// Trial-level completion callback, receives the trial's record if one was written
pub type FinishFn = Arc<dyn Fn(Option<&TrialRecord>) + Send + Sync>;

/// Pause between the end of a trial and the start of the next one
#[derive(Clone)]
pub enum InterTrialDelay {
    Fixed(Duration),
    Computed(DelayFn),
}

impl InterTrialDelay {
    pub fn computed(f: impl Fn() -> Duration + Send + Sync + 'static) -> Self {
        InterTrialDelay::Computed(Arc::new(f))
    }

    pub fn resolve(&self) -> Duration {
        match self {
            InterTrialDelay::Fixed(delay) => *delay,
            InterTrialDelay::Computed(f) => f(),
        }
    }
}

impl From<Duration> for InterTrialDelay {
    fn from(delay: Duration) -> Self {
        InterTrialDelay::Fixed(delay)
    }
}

impl fmt::Debug for InterTrialDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterTrialDelay::Fixed(delay) => write!(f, "Fixed({:?})", delay),
            InterTrialDelay::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Static and computed data attached to a trial
#[derive(Clone, Default)]
pub struct TrialData {
    fixed: DataMap,
    computed: Option<DataFn>,
}

impl TrialData {
    pub fn new() -> Self {
        TrialData::default()
    }

    pub fn fixed(fields: DataMap) -> Self {
        TrialData {
            fixed: fields,
            computed: None,
        }
    }

    pub fn computed(f: DataFn) -> Self {
        TrialData {
            fixed: DataMap::new(),
            computed: Some(f),
        }
    }

    /// Merge `fields` over the static part
    pub fn extend(&mut self, fields: &DataMap) {
        for (key, value) in fields {
            self.fixed.insert(key.clone(), value.clone());
        }
    }

    /// Replace the computed part. Computed fields win over static ones.
    pub fn set_computed(&mut self, f: DataFn) {
        self.computed = Some(f);
    }

    pub fn static_fields(&self) -> &DataMap {
        &self.fixed
    }

    pub fn has_computed(&self) -> bool {
        self.computed.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty() && self.computed.is_none()
    }

    /// Evaluate into the fields written with the record
    pub fn resolve(&self) -> DataMap {
        let mut out = self.fixed.clone();
        if let Some(f) = &self.computed {
            for (key, value) in f() {
                out.insert(key, value);
            }
        }
        out
    }
}

impl fmt::Debug for TrialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrialData")
            .field("fixed", &self.fixed)
            .field("computed", &self.computed.is_some())
            .finish()
    }
}

/// One presentation unit handed to a plugin
#[derive(Clone)]
pub struct Trial {
    kind: String,
    params: DataMap,
    data: TrialData,
    inter_trial_delay: Option<InterTrialDelay>,
    on_finish: Option<FinishFn>,
}

impl Trial {
    pub fn new(kind: impl Into<String>, params: DataMap) -> Self {
        Trial {
            kind: kind.into(),
            params,
            data: TrialData::default(),
            inter_trial_delay: None,
            on_finish: None,
        }
    }

    pub fn with_data(mut self, data: TrialData) -> Self {
        self.data = data;
        self
    }

    pub fn with_inter_trial_delay(mut self, delay: impl Into<InterTrialDelay>) -> Self {
        self.inter_trial_delay = Some(delay.into());
        self
    }

    pub fn with_on_finish(mut self, f: FinishFn) -> Self {
        self.on_finish = Some(f);
        self
    }

    /// Plugin kind tag
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn params(&self) -> &DataMap {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    pub fn data(&self) -> &TrialData {
        &self.data
    }

    /// Delay set by the plugin or the structure, if any
    pub fn inter_trial_delay(&self) -> Option<&InterTrialDelay> {
        self.inter_trial_delay.as_ref()
    }

    pub fn on_finish(&self) -> Option<&FinishFn> {
        self.on_finish.as_ref()
    }
}

impl fmt::Debug for Trial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trial")
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("data", &self.data)
            .field("inter_trial_delay", &self.inter_trial_delay)
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}
