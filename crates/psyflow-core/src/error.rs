//! Error types for PSYFLOW

use thiserror::Error;

/// Malformed experiment structure or session configuration.
///
/// Raised synchronously while the chunk tree is built, before any trial
/// runs. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Experiment structure must be an array of nodes")]
    NotAnArray,

    #[error("Experiment structure must contain at least one node")]
    EmptyStructure,

    #[error("Node {index} is not an object")]
    NodeNotAnObject { index: usize },

    #[error("Node {index} is missing a 'type' parameter")]
    MissingTypeTag { index: usize },

    #[error("Node {index} has an invalid chunk kind: {kind}")]
    InvalidChunkKind { index: usize, kind: String },

    #[error("Chunk at node {index} has an empty timeline")]
    EmptyTimeline { index: usize },

    #[error("No plugin registered for trial type '{0}'")]
    UnregisteredPlugin(String),

    #[error("Plugin '{0}' created no trials")]
    EmptyBlock(String),

    #[error("Node {index} asks for zero repetitions")]
    ZeroRepetitions { index: usize },

    #[error("Parameter '{param}' of plugin '{plugin}' has {actual} entries for {expected} trials")]
    ParameterLengthMismatch {
        param: String,
        plugin: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid value for parameter '{param}': {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("No predicate named '{0}' is registered")]
    UnknownPredicate(String),

    #[error("No finish callback named '{0}' is registered")]
    UnknownCallback(String),

    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),
}

/// Listener registration failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputRegistrationError {
    #[error("Invalid key name '{0}'")]
    UnknownKey(String),

    #[error("Listener {0} is not armed")]
    UnknownListener(u64),
}

/// Randomization misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplingError {
    #[error("Cannot sample {requested} items without replacement from a population of {available}")]
    SampleTooLarge { requested: usize, available: usize },

    #[error("Cannot sample {requested} items from an empty population")]
    EmptyPopulation { requested: usize },

    #[error("Repetition counts ({counts}) do not match item count ({items})")]
    RepetitionMismatch { items: usize, counts: usize },

    #[error("No arrangement of {len} items avoids adjacent repeats")]
    NoRepeatArrangement { len: usize },

    #[error("Factorial design needs at least one factor with at least one level")]
    EmptyDesign,
}

/// Trial data store misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataAccessError {
    #[error("Cannot add data to last trial - no data recorded so far")]
    EmptyStore,

    #[error("Trial {0} already wrote its record")]
    DuplicateWrite(u64),
}

/// Core PSYFLOW errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Input registration error: {0}")]
    InputRegistration(#[from] InputRegistrationError),

    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Data access error: {0}")]
    DataAccess(#[from] DataAccessError),

    // Session errors
    #[error("Resources did not become ready within {0:?}")]
    LoadTimeout(std::time::Duration),

    #[error("Session aborted")]
    SessionAborted,

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::Io(err.to_string())
    }
}

/// Result type for PSYFLOW operations
pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_conversion() {
        let err: FlowError = SamplingError::SampleTooLarge {
            requested: 5,
            available: 3,
        }
        .into();
        assert!(matches!(err, FlowError::Sampling(_)));
        assert_eq!(
            err.to_string(),
            "Sampling error: Cannot sample 5 items without replacement from a population of 3"
        );
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: FlowError = parse.into();
        assert!(matches!(err, FlowError::Serialization(_)));
    }
}
