//! End-to-end Integration Test Suite
//!
//! Runs whole sessions against a simulated participant and verifies:
//! - Trial ordering and chunk bookkeeping in the log
//! - Response timing through the input layer
//! - Log invariants that must hold for any structure

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use psyflow_core::{ChunkId, FlowResult, TrialRecord, FIELD_TIME_ELAPSED};
use psyflow_runtime::plugins::{CallFunction, Text};
use psyflow_runtime::{MemorySink, Phase, Session, SessionConfig, SessionHooks, Submission};
use psyflow_timeline::{PluginRegistry, Structure};

use crate::participant::{ParticipantConfig, SimulatedParticipant};

// ============================================================================
// SCENARIO CONFIGURATION
// ============================================================================

/// Session plus participant settings for one scenario
#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    pub session: SessionConfig,
    pub participant: ParticipantConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            session: SessionConfig {
                default_inter_trial_delay: Duration::from_millis(100),
                seed: Some(0),
                subject_id: Some("ID_scenario".to_string()),
                ..SessionConfig::default()
            },
            participant: ParticipantConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Participant answering with `key` after exactly `rt`
    pub fn fixed_participant(rt: Duration, key: u32) -> Self {
        ScenarioConfig {
            participant: ParticipantConfig::fixed(rt, key),
            ..ScenarioConfig::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.session.seed = Some(seed);
        self
    }
}

// ============================================================================
// SCENARIO RESULT
// ============================================================================

/// Outcome of a scenario run
#[derive(Clone, Debug)]
pub struct ScenarioResult {
    pub phase: Phase,
    pub records: Vec<TrialRecord>,
    /// Every screen the participant saw
    pub shown: Vec<String>,
    pub total_time: Duration,
    pub submissions: Vec<Submission>,
    pub invariant_violations: Vec<String>,
}

impl ScenarioResult {
    /// Finished with a clean log
    pub fn passed(&self) -> bool {
        self.phase == Phase::Finished && self.invariant_violations.is_empty()
    }

    /// Values of `key` across the log, `Null` where a record lacks it
    pub fn column(&self, key: &str) -> Vec<Value> {
        self.records
            .iter()
            .map(|r| r.get(key).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| r.chunk_id().map(str::to_string))
            .collect()
    }
}

// ============================================================================
// SCENARIO HARNESS
// ============================================================================

/// Runs a structure end to end with a simulated participant
pub struct ScenarioHarness {
    config: ScenarioConfig,
    registry: PluginRegistry,
}

impl ScenarioHarness {
    /// Harness with the built-in plugins and no registered functions
    pub fn new(config: ScenarioConfig) -> Self {
        ScenarioHarness {
            config,
            registry: PluginRegistry::new().with(Text).with(CallFunction::new()),
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub async fn run(&self, structure: &Structure) -> FlowResult<ScenarioResult> {
        let sink = MemorySink::new();
        let session = Session::init(
            self.config.session.clone(),
            structure,
            self.registry.clone(),
            SessionHooks::new(),
        )?;
        let participant =
            SimulatedParticipant::new(self.config.participant.clone(), session.input_sender());
        let screens = participant.screen_log();
        let mut session = session.with_surface(participant).with_sink(sink.clone());

        let phase = session.run().await?;
        let records = session.data().records().to_vec();
        let invariant_violations = check_invariants(&records);
        for violation in &invariant_violations {
            warn!(%violation, "log invariant violated");
        }
        info!(
            trials = records.len(),
            screens = screens.len(),
            ?phase,
            "scenario complete"
        );

        Ok(ScenarioResult {
            phase,
            records,
            shown: screens.shown(),
            total_time: session.total_time(),
            submissions: sink.submissions(),
            invariant_violations,
        })
    }
}

// ============================================================================
// LOG INVARIANTS
// ============================================================================

/// Properties every session log satisfies regardless of its structure
pub fn check_invariants(records: &[TrialRecord]) -> Vec<String> {
    let mut violations = Vec::new();
    let mut last_index: Option<u64> = None;
    let mut last_time = 0.0;

    for (row, record) in records.iter().enumerate() {
        match record.trial_index() {
            Some(index) => {
                if last_index.map_or(false, |last| index <= last) {
                    violations.push(format!("row {}: trial_index {} not increasing", row, index));
                }
                last_index = Some(index);
            }
            None => violations.push(format!("row {}: missing trial_index", row)),
        }

        match record.get(FIELD_TIME_ELAPSED).and_then(Value::as_f64) {
            Some(t) if t < last_time => {
                violations.push(format!("row {}: time_elapsed went back to {}", row, t))
            }
            Some(t) => last_time = t,
            None => violations.push(format!("row {}: missing time_elapsed", row)),
        }

        if record.kind().is_none() {
            violations.push(format!("row {}: missing type", row));
        }
        if record.chunk_id().and_then(ChunkId::parse).is_none() {
            violations.push(format!("row {}: missing or malformed chunk id", row));
        }
        if let Some(rt) = record.get("rt").and_then(Value::as_f64) {
            if rt < 0.0 {
                violations.push(format!("row {}: negative rt {}", row, rt));
            }
        }
    }
    violations
}
