//! Experiment structure description
//!
//! The structure is what an experimenter writes: a list of nodes, each either
//! a control chunk (`linear`, `while`, `if`) with its own timeline, or a
//! terminal node naming the plugin that turns it into trials. It can be
//! assembled in Rust or parsed from JSON, where predicates and callbacks are
//! referred to by name through a [`Predicates`] table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use psyflow_core::{
    ConfigurationError, DataFn, DataMap, FinishFn, FlowResult, InterTrialDelay, TrialRecord,
};
use psyflow_data::DataStore;

/// Decides after each pass whether a `while` chunk runs again. Receives
/// the records produced by the pass that just ended.
pub type ContinueFn = Arc<dyn Fn(&[&TrialRecord]) -> bool + Send + Sync>;
/// Decides on entry whether an `if` chunk runs
pub type ConditionFn = Arc<dyn Fn(&DataStore) -> bool + Send + Sync>;

/// Control flow of a chunk
#[derive(Clone)]
pub enum ChunkKind {
    Linear,
    While(ContinueFn),
    If(ConditionFn),
}

impl ChunkKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChunkKind::Linear => "linear",
            ChunkKind::While(_) => "while",
            ChunkKind::If(_) => "if",
        }
    }
}

impl fmt::Debug for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Control node with a nested timeline
#[derive(Clone, Debug)]
pub struct ChunkNode {
    pub kind: ChunkKind,
    pub timeline: Vec<Node>,
    /// Merged into every trial of the chunk
    pub data: Option<DataMap>,
}

impl ChunkNode {
    pub fn linear(timeline: Vec<Node>) -> Self {
        ChunkNode {
            kind: ChunkKind::Linear,
            timeline,
            data: None,
        }
    }

    pub fn repeat_while(
        timeline: Vec<Node>,
        f: impl Fn(&[&TrialRecord]) -> bool + Send + Sync + 'static,
    ) -> Self {
        ChunkNode {
            kind: ChunkKind::While(Arc::new(f)),
            timeline,
            data: None,
        }
    }

    pub fn conditional(
        timeline: Vec<Node>,
        f: impl Fn(&DataStore) -> bool + Send + Sync + 'static,
    ) -> Self {
        ChunkNode {
            kind: ChunkKind::If(Arc::new(f)),
            timeline,
            data: None,
        }
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = Some(data);
        self
    }
}

/// Data attached by a terminal node
#[derive(Clone)]
pub enum NodeData {
    /// Same fields for every trial
    Uniform(DataMap),
    /// One entry per created trial
    PerTrial(Vec<DataMap>),
    /// Evaluated when each record is written
    Computed(DataFn),
}

impl fmt::Debug for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeData::Uniform(map) => f.debug_tuple("Uniform").field(map).finish(),
            NodeData::PerTrial(maps) => f.debug_tuple("PerTrial").field(maps).finish(),
            NodeData::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Inter-trial delay set by a terminal node
#[derive(Clone, Debug)]
pub enum NodeDelay {
    Uniform(InterTrialDelay),
    PerTrial(Vec<Duration>),
}

/// Terminal node, expanded into a block of trials by its plugin
#[derive(Clone)]
pub struct TrialNode {
    pub plugin: String,
    pub params: DataMap,
    pub randomize_order: bool,
    pub repetitions: usize,
    pub data: Option<NodeData>,
    pub inter_trial_delay: Option<NodeDelay>,
    pub on_finish: Option<FinishFn>,
}

impl TrialNode {
    pub fn new(plugin: impl Into<String>) -> Self {
        TrialNode {
            plugin: plugin.into(),
            params: DataMap::new(),
            randomize_order: false,
            repetitions: 1,
            data: None,
            inter_trial_delay: None,
            on_finish: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: DataMap) -> Self {
        self.params.extend(params);
        self
    }

    pub fn randomize_order(mut self, randomize: bool) -> Self {
        self.randomize_order = randomize;
        self
    }

    pub fn repetitions(mut self, n: usize) -> Self {
        self.repetitions = n;
        self
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.data = Some(NodeData::Uniform(data));
        self
    }

    pub fn with_per_trial_data(mut self, data: Vec<DataMap>) -> Self {
        self.data = Some(NodeData::PerTrial(data));
        self
    }

    pub fn with_computed_data(mut self, f: impl Fn() -> DataMap + Send + Sync + 'static) -> Self {
        self.data = Some(NodeData::Computed(Arc::new(f)));
        self
    }

    pub fn with_inter_trial_delay(mut self, delay: impl Into<InterTrialDelay>) -> Self {
        self.inter_trial_delay = Some(NodeDelay::Uniform(delay.into()));
        self
    }

    pub fn with_per_trial_delay(mut self, delays: Vec<Duration>) -> Self {
        self.inter_trial_delay = Some(NodeDelay::PerTrial(delays));
        self
    }

    pub fn with_on_finish(
        mut self,
        f: impl Fn(Option<&TrialRecord>) + Send + Sync + 'static,
    ) -> Self {
        self.on_finish = Some(Arc::new(f));
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Split the parameters into one map per trial.
    ///
    /// Every key in `per_trial` whose value is an array contributes one
    /// element to each trial; those arrays must agree in length. Other
    /// parameters are copied into every map. Without any array, the node
    /// describes a single trial.
    pub fn expand(&self, per_trial: &[&str]) -> FlowResult<Vec<DataMap>> {
        let mut count: Option<usize> = None;
        for key in per_trial {
            if let Some(Value::Array(values)) = self.params.get(*key) {
                match count {
                    None => count = Some(values.len()),
                    Some(expected) if expected != values.len() => {
                        return Err(ConfigurationError::ParameterLengthMismatch {
                            param: key.to_string(),
                            plugin: self.plugin.clone(),
                            expected,
                            actual: values.len(),
                        }
                        .into())
                    }
                    Some(_) => {}
                }
            }
        }
        let n = count.unwrap_or(1);

        Ok((0..n)
            .map(|i| {
                self.params
                    .iter()
                    .map(|(key, value)| {
                        let value = match value {
                            Value::Array(values) if per_trial.contains(&key.as_str()) => {
                                values[i].clone()
                            }
                            other => other.clone(),
                        };
                        (key.clone(), value)
                    })
                    .collect()
            })
            .collect())
    }
}

impl fmt::Debug for TrialNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrialNode")
            .field("plugin", &self.plugin)
            .field("params", &self.params)
            .field("randomize_order", &self.randomize_order)
            .field("repetitions", &self.repetitions)
            .field("data", &self.data)
            .field("inter_trial_delay", &self.inter_trial_delay)
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

/// One entry of a timeline
#[derive(Clone, Debug)]
pub enum Node {
    Chunk(ChunkNode),
    Trials(TrialNode),
}

impl From<ChunkNode> for Node {
    fn from(chunk: ChunkNode) -> Self {
        Node::Chunk(chunk)
    }
}

impl From<TrialNode> for Node {
    fn from(node: TrialNode) -> Self {
        Node::Trials(node)
    }
}

/// Named predicates and callbacks for declarative structures
#[derive(Clone, Default)]
pub struct Predicates {
    continue_fns: HashMap<String, ContinueFn>,
    condition_fns: HashMap<String, ConditionFn>,
    finish_fns: HashMap<String, FinishFn>,
}

impl Predicates {
    pub fn new() -> Self {
        Predicates::default()
    }

    pub fn with_continue(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&[&TrialRecord]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.continue_fns.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_condition(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&DataStore) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.condition_fns.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with_finish(
        mut self,
        name: impl Into<String>,
        f: impl Fn(Option<&TrialRecord>) + Send + Sync + 'static,
    ) -> Self {
        self.finish_fns.insert(name.into(), Arc::new(f));
        self
    }

    fn continue_fn(&self, name: &str) -> FlowResult<ContinueFn> {
        self.continue_fns
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownPredicate(name.to_string()).into())
    }

    fn condition_fn(&self, name: &str) -> FlowResult<ConditionFn> {
        self.condition_fns
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownPredicate(name.to_string()).into())
    }

    fn finish_fn(&self, name: &str) -> FlowResult<FinishFn> {
        self.finish_fns
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownCallback(name.to_string()).into())
    }
}

impl fmt::Debug for Predicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicates")
            .field("continue_fns", &self.continue_fns.keys().collect::<Vec<_>>())
            .field("condition_fns", &self.condition_fns.keys().collect::<Vec<_>>())
            .field("finish_fns", &self.finish_fns.keys().collect::<Vec<_>>())
            .finish()
    }
}

// Keys of a terminal node that are not plugin parameters
const KEY_TYPE: &str = "type";
const KEY_KIND: &str = "kind";
const KEY_TIMELINE: &str = "timeline";
const KEY_RANDOMIZE: &str = "randomize_order";
const KEY_REPETITIONS: &str = "repetitions";
const KEY_DATA: &str = "data";
const KEY_DELAY: &str = "inter_trial_delay";
const KEY_DELAY_LEGACY: &str = "timing_post_trial";
const KEY_ON_FINISH: &str = "on_finish";

/// Top-level experiment structure
#[derive(Clone, Debug, Default)]
pub struct Structure {
    pub nodes: Vec<Node>,
}

impl Structure {
    pub fn new(nodes: Vec<Node>) -> Self {
        Structure { nodes }
    }

    pub fn push(mut self, node: impl Into<Node>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn from_json_str(json: &str, predicates: &Predicates) -> FlowResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Structure::from_json(&value, predicates)
    }

    /// Parse a declarative structure. Any malformed node is a
    /// [`ConfigurationError`].
    pub fn from_json(value: &Value, predicates: &Predicates) -> FlowResult<Self> {
        let nodes = value.as_array().ok_or(ConfigurationError::NotAnArray)?;
        if nodes.is_empty() {
            return Err(ConfigurationError::EmptyStructure.into());
        }
        Ok(Structure {
            nodes: parse_timeline(nodes, predicates)?,
        })
    }
}

fn parse_timeline(nodes: &[Value], predicates: &Predicates) -> FlowResult<Vec<Node>> {
    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| parse_node(index, node, predicates))
        .collect()
}

fn parse_node(index: usize, node: &Value, predicates: &Predicates) -> FlowResult<Node> {
    let object = node
        .as_object()
        .ok_or(ConfigurationError::NodeNotAnObject { index })?;

    if let Some(kind) = object.get(KEY_KIND) {
        return parse_chunk(index, kind, object, predicates).map(Node::Chunk);
    }
    match object.get(KEY_TYPE).and_then(Value::as_str) {
        Some(plugin) => parse_trials(index, plugin, object, predicates).map(Node::Trials),
        None => Err(ConfigurationError::MissingTypeTag { index }.into()),
    }
}

fn parse_chunk(
    index: usize,
    kind: &Value,
    object: &DataMap,
    predicates: &Predicates,
) -> FlowResult<ChunkNode> {
    let invalid = || ConfigurationError::InvalidChunkKind {
        index,
        kind: kind.to_string(),
    };
    let kind = match kind.as_str().ok_or_else(invalid)? {
        "linear" => ChunkKind::Linear,
        "while" => ChunkKind::While(predicates.continue_fn(predicate_name(object, "continue")?)?),
        "if" => ChunkKind::If(predicates.condition_fn(predicate_name(object, "condition")?)?),
        _ => return Err(invalid().into()),
    };

    let timeline = match object.get(KEY_TIMELINE).and_then(Value::as_array) {
        Some(timeline) if !timeline.is_empty() => parse_timeline(timeline, predicates)?,
        _ => return Err(ConfigurationError::EmptyTimeline { index }.into()),
    };

    let data = match object.get(KEY_DATA) {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(invalid_param(KEY_DATA, "chunk data must be an object")),
    };

    Ok(ChunkNode {
        kind,
        timeline,
        data,
    })
}

fn predicate_name<'a>(object: &'a DataMap, key: &str) -> FlowResult<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_param(key, "expected the name of a registered predicate"))
}

fn parse_trials(
    index: usize,
    plugin: &str,
    object: &DataMap,
    predicates: &Predicates,
) -> FlowResult<TrialNode> {
    let mut node = TrialNode::new(plugin);

    for (key, value) in object {
        match key.as_str() {
            KEY_TYPE => {}
            KEY_RANDOMIZE => {
                node.randomize_order = value
                    .as_bool()
                    .ok_or_else(|| invalid_param(KEY_RANDOMIZE, "expected a boolean"))?;
            }
            KEY_REPETITIONS => {
                let n = value
                    .as_u64()
                    .ok_or_else(|| invalid_param(KEY_REPETITIONS, "expected a positive integer"))?;
                if n == 0 {
                    return Err(ConfigurationError::ZeroRepetitions { index }.into());
                }
                node.repetitions = n as usize;
            }
            KEY_DATA => node.data = Some(parse_data(value)?),
            KEY_DELAY | KEY_DELAY_LEGACY => node.inter_trial_delay = Some(parse_delay(value)?),
            KEY_ON_FINISH => {
                let name = value
                    .as_str()
                    .ok_or_else(|| invalid_param(KEY_ON_FINISH, "expected a callback name"))?;
                node.on_finish = Some(predicates.finish_fn(name)?);
            }
            _ => {
                node.params.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(node)
}

fn parse_data(value: &Value) -> FlowResult<NodeData> {
    match value {
        Value::Object(map) => Ok(NodeData::Uniform(map.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .cloned()
                    .ok_or_else(|| invalid_param(KEY_DATA, "per-trial data entries must be objects"))
            })
            .collect::<FlowResult<Vec<_>>>()
            .map(NodeData::PerTrial),
        _ => Err(invalid_param(KEY_DATA, "expected an object or an array of objects")),
    }
}

fn parse_delay(value: &Value) -> FlowResult<NodeDelay> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(millis)
            .collect::<FlowResult<Vec<_>>>()
            .map(NodeDelay::PerTrial),
        other => Ok(NodeDelay::Uniform(InterTrialDelay::Fixed(millis(other)?))),
    }
}

fn millis(value: &Value) -> FlowResult<Duration> {
    let invalid = || invalid_param(KEY_DELAY, "expected a non-negative number of milliseconds");
    match value.as_f64() {
        Some(ms) if ms >= 0.0 => {
            Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

fn invalid_param(param: &str, reason: &str) -> psyflow_core::FlowError {
    ConfigurationError::InvalidParameter {
        param: param.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use psyflow_core::FlowError;
    use serde_json::json;

    fn predicates() -> Predicates {
        Predicates::new()
            .with_continue("never", |_| false)
            .with_condition("always", |_| true)
            .with_finish("noop", |_| {})
    }

    #[test]
    fn test_parse_nested_structure() {
        let json = json!([
            {"type": "text", "text": "welcome"},
            {"kind": "while", "continue": "never", "timeline": [
                {"type": "text", "text": ["a", "b"], "randomize_order": true, "repetitions": 2,
                 "data": {"phase": "train"}, "inter_trial_delay": 250, "on_finish": "noop"},
                {"kind": "if", "condition": "always", "timeline": [{"type": "text", "text": "x"}]}
            ]}
        ]);
        let structure = Structure::from_json(&json, &predicates()).unwrap();
        assert_eq!(structure.nodes.len(), 2);

        let Node::Chunk(chunk) = &structure.nodes[1] else {
            panic!("expected a chunk");
        };
        assert_eq!(chunk.kind.name(), "while");
        let Node::Trials(node) = &chunk.timeline[0] else {
            panic!("expected trials");
        };
        assert_eq!(node.plugin, "text");
        assert!(node.randomize_order);
        assert_eq!(node.repetitions, 2);
        assert!(node.on_finish.is_some());
        assert!(matches!(
            node.inter_trial_delay,
            Some(NodeDelay::Uniform(InterTrialDelay::Fixed(d))) if d == Duration::from_millis(250)
        ));
        // Only plugin parameters remain in params
        let keys: Vec<_> = node.params.keys().cloned().collect();
        assert_eq!(keys, vec!["text"]);
    }

    #[test]
    fn test_structure_errors() {
        let p = predicates();
        let err = |v: Value| match Structure::from_json(&v, &p).unwrap_err() {
            FlowError::Configuration(e) => e,
            other => panic!("unexpected error: {other}"),
        };

        assert_eq!(err(json!({"type": "text"})), ConfigurationError::NotAnArray);
        assert_eq!(err(json!([])), ConfigurationError::EmptyStructure);
        assert_eq!(err(json!([5])), ConfigurationError::NodeNotAnObject { index: 0 });
        assert_eq!(
            err(json!([{"type": "text"}, {"text": "no type"}])),
            ConfigurationError::MissingTypeTag { index: 1 }
        );
        assert_eq!(
            err(json!([{"kind": "loop", "timeline": [{"type": "text"}]}])),
            ConfigurationError::InvalidChunkKind {
                index: 0,
                kind: "\"loop\"".to_string()
            }
        );
        assert_eq!(
            err(json!([{"kind": "linear", "timeline": []}])),
            ConfigurationError::EmptyTimeline { index: 0 }
        );
        assert_eq!(
            err(json!([{"type": "text", "repetitions": 0}])),
            ConfigurationError::ZeroRepetitions { index: 0 }
        );
        assert_eq!(
            err(json!([{"kind": "while", "continue": "missing", "timeline": [{"type": "t"}]}])),
            ConfigurationError::UnknownPredicate("missing".to_string())
        );
        assert_eq!(
            err(json!([{"type": "text", "on_finish": "nope"}])),
            ConfigurationError::UnknownCallback("nope".to_string())
        );
        assert!(matches!(
            err(json!([{"type": "text", "inter_trial_delay": -5}])),
            ConfigurationError::InvalidParameter { .. }
        ));
        assert!(matches!(
            err(json!([{"type": "text", "inter_trial_delay": 1e300}])),
            ConfigurationError::InvalidParameter { .. }
        ));
        assert!(matches!(
            Structure::from_json_str(r#"[{"type": "text", "inter_trial_delay": [10, 1e300]}]"#, &p),
            Err(FlowError::Configuration(ConfigurationError::InvalidParameter { .. }))
        ));
    }

    #[test]
    fn test_expand_per_trial_params() {
        let node = TrialNode::new("text")
            .with_param("text", json!(["a", "b", "c"]))
            .with_param("choices", json!(["f", "j"]))
            .with_param("timing", 500);

        // Only listed keys are split
        let trials = node.expand(&["text"]).unwrap();
        assert_eq!(trials.len(), 3);
        assert_eq!(trials[1]["text"], json!("b"));
        assert_eq!(trials[1]["choices"], json!(["f", "j"]));
        assert_eq!(trials[2]["timing"], json!(500));

        let err = node.expand(&["text", "choices"]).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Configuration(ConfigurationError::ParameterLengthMismatch { expected: 3, actual: 2, .. })
        ));

        assert_eq!(TrialNode::new("x").with_param("text", "solo").expand(&["text"]).unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_delay_key_and_per_trial_values() {
        let json = json!([{"type": "text", "timing_post_trial": [0, 100], "data": [{"a": 1}, {"a": 2}]}]);
        let structure = Structure::from_json(&json, &Predicates::new()).unwrap();
        let Node::Trials(node) = &structure.nodes[0] else {
            panic!("expected trials");
        };
        assert!(matches!(&node.inter_trial_delay, Some(NodeDelay::PerTrial(d)) if d.len() == 2));
        assert!(matches!(&node.data, Some(NodeData::PerTrial(d)) if d.len() == 2));
    }
}
