//! Session configuration
//!
//! Loaded from JSON. Durations are human-readable strings (`"500ms"`,
//! `"30s"`, `"1m 30s"`).

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use psyflow_core::{ConfigurationError, DataMap, FlowResult};
use psyflow_data::DataFormat;

/// Session configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Pause after a trial when neither the structure nor the plugin sets one
    #[serde(with = "human_duration")]
    pub default_inter_trial_delay: Duration,
    /// Bound on the readiness gate
    #[serde(with = "human_duration")]
    pub max_load_time: Duration,
    /// Start without waiting on the readiness gate
    pub skip_load_check: bool,
    /// Emit progress after every trial
    pub show_progress: bool,
    /// Seed for block reshuffles; entropy when unset
    pub seed: Option<u64>,
    /// Subject id handed to sinks; generated from the start time when unset
    pub subject_id: Option<String>,
    pub subject_info: DataMap,
    /// Counterbalancing order label handed to sinks
    pub blocks_order: Option<String>,
    /// Serialization of the log handed to sinks
    #[serde(with = "format_name")]
    pub data_format: DataFormat,
    pub logging: LoggingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            default_inter_trial_delay: Duration::from_millis(500),
            max_load_time: Duration::from_secs(30),
            skip_load_check: true,
            show_progress: false,
            seed: None,
            subject_id: None,
            subject_info: DataMap::new(),
            blocks_order: None,
            data_format: DataFormat::Json,
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> FlowResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConfigurationError::InvalidConfig(e.to_string()).into())
    }
}

/// Log output settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG` when set
    pub level: String,
    /// One JSON object per line instead of the human format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

mod human_duration {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod format_name {
    use super::*;

    pub fn serialize<S: Serializer>(format: &DataFormat, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(format)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DataFormat, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psyflow_core::FlowError;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.default_inter_trial_delay, Duration::from_millis(500));
        assert_eq!(config.max_load_time, Duration::from_secs(30));
        assert!(config.skip_load_check);
        assert!(!config.show_progress);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_json_str() {
        let config = SessionConfig::from_json_str(
            r#"{
                "default_inter_trial_delay": "250ms",
                "max_load_time": "1m 30s",
                "show_progress": true,
                "seed": 7,
                "subject_info": {"age": 31},
                "data_format": "csv",
                "logging": {"level": "debug", "json": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_inter_trial_delay, Duration::from_millis(250));
        assert_eq!(config.max_load_time, Duration::from_secs(90));
        assert!(config.show_progress);
        // Unset fields keep their defaults
        assert!(config.skip_load_check);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.subject_info["age"], 31);
        assert_eq!(config.data_format, DataFormat::Csv);
        assert_eq!(
            config.logging,
            LoggingConfig {
                level: "debug".to_string(),
                json: true
            }
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        for json in [
            r#"{"max_load_time": "soon"}"#,
            r#"{"data_format": "xml"}"#,
            r#"{"unknown": 1}"#,
            "42",
        ] {
            let err = SessionConfig::from_json_str(json).unwrap_err();
            assert!(
                matches!(err, FlowError::Configuration(ConfigurationError::InvalidConfig(_))),
                "{json}: {err}"
            );
        }
    }

    #[test]
    fn test_serializes_human_durations() {
        let json = serde_json::to_value(SessionConfig::default()).unwrap();
        assert_eq!(json["default_inter_trial_delay"], "500ms");
        assert_eq!(json["max_load_time"], "30s");
        assert_eq!(json["data_format"], "json");
    }
}
