//! Tree builder - turns a structure description into a chunk tree

use std::time::Duration;

use tracing::info;

use psyflow_core::{
    ConfigurationError, DataMap, FlowResult, InterTrialDelay, Trial, TrialData,
};
use psyflow_random::Randomizer;

use crate::{ChunkIndex, ChunkTree, Node, NodeData, NodeDelay, PluginRegistry, Structure, TrialNode};

/// Pause after a trial when neither the structure nor the plugin sets one
pub const DEFAULT_INTER_TRIAL_DELAY: Duration = Duration::from_millis(500);

/// Builds a [`ChunkTree`], calling each plugin's `create` for its nodes
pub struct TreeBuilder<'r> {
    registry: &'r PluginRegistry,
    default_delay: Duration,
    rng: Option<Randomizer>,
}

impl<'r> TreeBuilder<'r> {
    pub fn new(registry: &'r PluginRegistry) -> Self {
        TreeBuilder {
            registry,
            default_delay: DEFAULT_INTER_TRIAL_DELAY,
            rng: None,
        }
    }

    pub fn default_inter_trial_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Randomizer used for block reshuffles, seeded from entropy if unset
    pub fn randomizer(mut self, rng: Randomizer) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn build(mut self, structure: &Structure) -> FlowResult<ChunkTree> {
        if structure.nodes.is_empty() {
            return Err(ConfigurationError::EmptyStructure.into());
        }
        let mut tree = ChunkTree::new(self.rng.take().unwrap_or_default());
        let root = tree.root();
        self.add_timeline(&mut tree, root, &structure.nodes, None)?;

        info!(
            trials = tree.length(),
            chunks = tree.chunk_count(),
            "chunk tree built"
        );
        Ok(tree)
    }

    fn add_timeline(
        &self,
        tree: &mut ChunkTree,
        parent: ChunkIndex,
        nodes: &[Node],
        chunk_data: Option<&DataMap>,
    ) -> FlowResult<()> {
        for (index, node) in nodes.iter().enumerate() {
            match node {
                Node::Chunk(chunk) => {
                    if chunk.timeline.is_empty() {
                        return Err(ConfigurationError::EmptyTimeline { index }.into());
                    }
                    let child = tree.add_chunk(parent, index, &chunk.kind);
                    self.add_timeline(tree, child, &chunk.timeline, chunk.data.as_ref())?;
                }
                Node::Trials(node) => {
                    if node.repetitions == 0 {
                        return Err(ConfigurationError::ZeroRepetitions { index }.into());
                    }
                    let trials = self.create_trials(node, chunk_data)?;
                    for _ in 0..node.repetitions {
                        tree.add_block(parent, index, trials.clone(), node.randomize_order);
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the plugin's `create` and apply the options every trial shares
    fn create_trials(&self, node: &TrialNode, chunk_data: Option<&DataMap>) -> FlowResult<Vec<Trial>> {
        let plugin = self.registry.require(&node.plugin)?;
        let created = plugin.create(node)?;
        if created.is_empty() {
            return Err(ConfigurationError::EmptyBlock(node.plugin.clone()).into());
        }
        let count = created.len();

        let check_len = |param: &str, actual: usize| -> FlowResult<()> {
            if actual == count {
                Ok(())
            } else {
                Err(ConfigurationError::ParameterLengthMismatch {
                    param: param.to_string(),
                    plugin: node.plugin.clone(),
                    expected: count,
                    actual,
                }
                .into())
            }
        };
        if let Some(NodeData::PerTrial(data)) = &node.data {
            check_len("data", data.len())?;
        }
        if let Some(NodeDelay::PerTrial(delays)) = &node.inter_trial_delay {
            check_len("inter_trial_delay", delays.len())?;
        }

        Ok(created
            .into_iter()
            .enumerate()
            .map(|(i, trial)| {
                let mut data: TrialData = trial.data().clone();
                if let Some(chunk_data) = chunk_data {
                    data.extend(chunk_data);
                }
                match &node.data {
                    Some(NodeData::Uniform(fields)) => data.extend(fields),
                    Some(NodeData::PerTrial(fields)) => data.extend(&fields[i]),
                    Some(NodeData::Computed(f)) => data.set_computed(f.clone()),
                    None => {}
                }

                let delay = match &node.inter_trial_delay {
                    Some(NodeDelay::Uniform(delay)) => delay.clone(),
                    Some(NodeDelay::PerTrial(delays)) => InterTrialDelay::Fixed(delays[i]),
                    None => trial
                        .inter_trial_delay()
                        .cloned()
                        .unwrap_or(InterTrialDelay::Fixed(self.default_delay)),
                };

                let on_finish = node.on_finish.clone().or_else(|| trial.on_finish().cloned());
                let trial = trial.with_data(data).with_inter_trial_delay(delay);
                match on_finish {
                    Some(f) => trial.with_on_finish(f),
                    None => trial,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkNode, Plugin, TrialContext};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use psyflow_core::FlowError;
    use psyflow_data::DataStore;
    use serde_json::{json, Value};

    /// One trial per entry of `stim`, tagged with plugin-level data
    struct Stim;

    #[async_trait]
    impl Plugin for Stim {
        fn kind(&self) -> &str {
            "stim"
        }

        fn create(&self, node: &TrialNode) -> FlowResult<Vec<Trial>> {
            let mut data = DataMap::new();
            data.insert("source".into(), json!("plugin"));
            data.insert("level".into(), json!("plugin"));
            let trials = node
                .expand(&["stim"])?
                .into_iter()
                .map(|params| {
                    let trial = Trial::new("stim", params).with_data(TrialData::fixed(data.clone()));
                    match node.param("plugin_delay").and_then(Value::as_u64) {
                        Some(ms) => trial.with_inter_trial_delay(Duration::from_millis(ms)),
                        None => trial,
                    }
                })
                .collect();
            Ok(trials)
        }

        async fn trial(&self, _ctx: &mut TrialContext<'_>, _trial: &Trial) -> FlowResult<()> {
            Ok(())
        }
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new().with(Stim)
    }

    fn map(value: Value) -> DataMap {
        value.as_object().cloned().unwrap()
    }

    fn collect(tree: &mut ChunkTree) -> Vec<Trial> {
        let store = DataStore::new();
        let mut out = Vec::new();
        while let Some(trial) = tree.next(&store) {
            out.push(trial);
            tree.advance(&store);
        }
        out
    }

    #[test]
    fn test_repetitions_push_blocks() {
        let structure = Structure::new(vec![
            TrialNode::new("stim").with_param("stim", json!(["a", "b"])).repetitions(3).into(),
            TrialNode::new("stim").with_param("stim", "c").into(),
        ]);
        let registry = registry();
        let mut tree = TreeBuilder::new(&registry).build(&structure).unwrap();
        assert_eq!(tree.length(), 7);
        assert_eq!(tree.children(tree.root()).len(), 4);
        assert_eq!(collect(&mut tree).len(), 7);
    }

    #[test]
    fn test_data_precedence() {
        let structure = Structure::new(vec![ChunkNode::linear(vec![TrialNode::new("stim")
            .with_param("stim", json!(["x", "y"]))
            .with_per_trial_data(vec![map(json!({"level": "node0"})), map(json!({"n": 1}))])
            .into()])
        .with_data(map(json!({"level": "chunk", "block": 2})))
        .into()]);

        let registry = registry();
        let mut tree = TreeBuilder::new(&registry).build(&structure).unwrap();
        let trials = collect(&mut tree);

        let first = trials[0].data().resolve();
        assert_eq!(first["source"], json!("plugin"));
        assert_eq!(first["block"], json!(2));
        assert_eq!(first["level"], json!("node0"));

        let second = trials[1].data().resolve();
        assert_eq!(second["level"], json!("chunk"));
        assert_eq!(second["n"], json!(1));
    }

    #[test]
    fn test_delay_precedence() {
        let structure = Structure::new(vec![
            TrialNode::new("stim").with_param("stim", "default").into(),
            TrialNode::new("stim")
                .with_param("stim", "plugin")
                .with_param("plugin_delay", 120)
                .into(),
            TrialNode::new("stim")
                .with_param("stim", "node")
                .with_param("plugin_delay", 120)
                .with_inter_trial_delay(Duration::from_millis(7))
                .into(),
        ]);
        let registry = registry();
        let mut tree = TreeBuilder::new(&registry)
            .default_inter_trial_delay(Duration::from_millis(300))
            .build(&structure)
            .unwrap();

        let delays: Vec<_> = collect(&mut tree)
            .iter()
            .map(|t| t.inter_trial_delay().map(InterTrialDelay::resolve))
            .collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(300)),
                Some(Duration::from_millis(120)),
                Some(Duration::from_millis(7))
            ]
        );
    }

    #[test]
    fn test_on_finish_attached() {
        let structure = Structure::new(vec![TrialNode::new("stim")
            .with_param("stim", "a")
            .with_on_finish(|_| {})
            .into()]);
        let registry = registry();
        let mut tree = TreeBuilder::new(&registry).build(&structure).unwrap();
        assert!(collect(&mut tree)[0].on_finish().is_some());
    }

    #[test]
    fn test_build_errors() {
        let registry = registry();
        let build = |nodes: Vec<Node>| match TreeBuilder::new(&registry).build(&Structure::new(nodes)) {
            Err(FlowError::Configuration(e)) => e,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("structure should be rejected"),
        };

        assert_eq!(build(vec![]), ConfigurationError::EmptyStructure);
        assert_eq!(
            build(vec![TrialNode::new("missing").into()]),
            ConfigurationError::UnregisteredPlugin("missing".to_string())
        );
        assert_eq!(
            build(vec![TrialNode::new("stim").with_param("stim", json!([])).into()]),
            ConfigurationError::EmptyBlock("stim".to_string())
        );
        assert_eq!(
            build(vec![TrialNode::new("stim").repetitions(0).into()]),
            ConfigurationError::ZeroRepetitions { index: 0 }
        );
        assert_eq!(
            build(vec![ChunkNode::linear(vec![]).into()]),
            ConfigurationError::EmptyTimeline { index: 0 }
        );
        assert_eq!(
            build(vec![TrialNode::new("stim")
                .with_param("stim", json!(["a", "b"]))
                .with_per_trial_delay(vec![Duration::ZERO])
                .into()]),
            ConfigurationError::ParameterLengthMismatch {
                param: "inter_trial_delay".to_string(),
                plugin: "stim".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }

    proptest! {
        #[test]
        fn prop_length_is_sum_of_blocks(
            nodes in proptest::collection::vec((1usize..5, 1usize..4), 1..8)
        ) {
            let structure = Structure::new(
                nodes
                    .iter()
                    .map(|&(n, reps)| {
                        let stim: Vec<Value> = (0..n).map(|i| json!(i)).collect();
                        TrialNode::new("stim").with_param("stim", stim).repetitions(reps).into()
                    })
                    .collect(),
            );
            let registry = registry();
            let mut tree = TreeBuilder::new(&registry).build(&structure).unwrap();

            let expected: usize = nodes.iter().map(|(n, reps)| n * reps).sum();
            prop_assert_eq!(tree.length(), expected);
            prop_assert_eq!(collect(&mut tree).len(), expected);
        }
    }
}
