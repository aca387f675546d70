//! Plugin contract
//!
//! A plugin owns one kind of trial. `create` runs once per terminal node
//! while the tree is built; `trial` runs each time one of its trials is
//! presented and completes when the trial is over.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use psyflow_core::{ConfigurationError, FlowResult, Trial};

use crate::{TrialContext, TrialNode};

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Kind tag matched against the `type` of terminal nodes
    fn kind(&self) -> &str;

    /// Expand a terminal node into the trials of one block
    fn create(&self, node: &TrialNode) -> FlowResult<Vec<Trial>>;

    /// Present `trial`. Returning is the trial's completion.
    async fn trial(&self, ctx: &mut TrialContext<'_>, trial: &Trial) -> FlowResult<()>;
}

/// Render target handed to a running trial
pub trait Surface: Send {
    /// Replace the displayed content
    fn show(&mut self, content: &str);

    fn clear(&mut self);
}

/// Surface that renders nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSurface;

impl Surface for NullSurface {
    fn show(&mut self, _content: &str) {}

    fn clear(&mut self) {}
}

/// Plugins by kind
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Register a plugin under its own kind, replacing any previous one
    pub fn register(&mut self, plugin: impl Plugin + 'static) -> &mut Self {
        self.register_arc(Arc::new(plugin))
    }

    pub fn register_arc(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        self.plugins.insert(plugin.kind().to_string(), plugin);
        self
    }

    pub fn with(mut self, plugin: impl Plugin + 'static) -> Self {
        self.register(plugin);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(kind).cloned()
    }

    /// Like `get`, but an unknown kind is a configuration error
    pub fn require(&self, kind: &str) -> FlowResult<Arc<dyn Plugin>> {
        self.get(kind)
            .ok_or_else(|| ConfigurationError::UnregisteredPlugin(kind.to_string()).into())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.plugins.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("PluginRegistry").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psyflow_core::FlowError;

    struct Marker;

    #[async_trait]
    impl Plugin for Marker {
        fn kind(&self) -> &str {
            "marker"
        }

        fn create(&self, node: &TrialNode) -> FlowResult<Vec<Trial>> {
            Ok(vec![Trial::new("marker", node.params.clone())])
        }

        async fn trial(&self, _ctx: &mut TrialContext<'_>, _trial: &Trial) -> FlowResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = PluginRegistry::new().with(Marker);
        assert!(registry.contains("marker"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.require("marker").unwrap().kind(), "marker");

        let err = registry.require("missing").err().unwrap();
        assert_eq!(
            err,
            FlowError::Configuration(ConfigurationError::UnregisteredPlugin("missing".to_string()))
        );
    }
}
