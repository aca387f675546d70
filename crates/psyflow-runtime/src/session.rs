//! Session - the trial scheduler
//!
//! A session owns the chunk tree, the data store and the input port, and
//! moves through [`Phase`]s one [`Session::step`] at a time. Exactly one
//! trial is live at any point; its listeners are torn down before the next
//! trial can arm any.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use psyflow_core::{
    DataMap, FlowError, FlowResult, InterTrialDelay, SessionClock, Trial, TrialIndex, TrialRecord,
};
use psyflow_data::DataStore;
use psyflow_input::InputEvent;
use psyflow_random::Randomizer;
use psyflow_timeline::{
    now, wait_for_abort, ChunkTree, InputPort, NullSurface, PluginRegistry, Progress, Structure,
    Surface, TreeBuilder, TrialContext, TrialPosition,
};

use crate::{DataSink, SessionConfig, SubjectId, Submission};

/// Where the session loop stands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Built, not started
    Idle,
    /// A trial is live
    Presenting(TrialPosition),
    /// The live trial completed
    Finishing,
    /// Pause before the tree advances
    InterTrial(Duration),
    Advancing,
    Finished,
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Finished | Phase::Aborted)
    }
}

type TrialHook = Box<dyn FnMut(&Trial) + Send>;
type FinishHook = Box<dyn FnMut(Option<&TrialRecord>) + Send>;
type RecordHook = Box<dyn FnMut(&TrialRecord) + Send>;
type ProgressHook = Box<dyn FnMut(&Progress) + Send>;
type LogHook = Box<dyn FnMut(&[TrialRecord]) + Send>;

/// Session-level callbacks
#[derive(Default)]
pub struct SessionHooks {
    on_trial_start: Option<TrialHook>,
    on_trial_finish: Option<FinishHook>,
    on_data_update: Option<RecordHook>,
    on_progress: Option<ProgressHook>,
    on_finish: Option<LogHook>,
}

impl SessionHooks {
    pub fn new() -> Self {
        SessionHooks::default()
    }

    /// Before a trial is handed to its plugin
    pub fn on_trial_start(mut self, f: impl FnMut(&Trial) + Send + 'static) -> Self {
        self.on_trial_start = Some(Box::new(f));
        self
    }

    /// After the trial-level callback, with the trial's record if one was written
    pub fn on_trial_finish(
        mut self,
        f: impl FnMut(Option<&TrialRecord>) + Send + 'static,
    ) -> Self {
        self.on_trial_finish = Some(Box::new(f));
        self
    }

    /// Each time a record is appended
    pub fn on_data_update(mut self, f: impl FnMut(&TrialRecord) + Send + 'static) -> Self {
        self.on_data_update = Some(Box::new(f));
        self
    }

    /// After every advance, when `show_progress` is on
    pub fn on_progress(mut self, f: impl FnMut(&Progress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Once, with the whole log, when the session finishes normally
    pub fn on_finish(mut self, f: impl FnMut(&[TrialRecord]) + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("on_trial_start", &self.on_trial_start.is_some())
            .field("on_trial_finish", &self.on_trial_finish.is_some())
            .field("on_data_update", &self.on_data_update.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Control {
    abort: watch::Sender<bool>,
    end_session: AtomicBool,
    end_current_chunk: AtomicBool,
}

/// Remote control of a session, usable from hooks, plugins or other tasks
#[derive(Clone, Debug)]
pub struct SessionHandle {
    control: Arc<Control>,
}

impl SessionHandle {
    /// End the session at the next transition. `on_finish` and the sinks
    /// still run.
    pub fn end_session(&self) {
        self.control.end_session.store(true, Ordering::SeqCst);
    }

    /// Leave the chunk containing the live trial at the next transition
    pub fn end_current_chunk(&self) {
        self.control.end_current_chunk.store(true, Ordering::SeqCst);
    }

    /// Tear the session down without `on_finish`. Pending delays and input
    /// waits end immediately.
    pub fn abort(&self) {
        self.control.abort.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.control.abort.borrow()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub steps: u64,
    pub trials_presented: u64,
    pub records_written: u64,
    /// Sum of the inter-trial delays waited out
    pub total_delay: Duration,
}

/// One run of an experiment
pub struct Session {
    config: SessionConfig,
    registry: PluginRegistry,
    tree: ChunkTree,
    store: DataStore,
    input: InputPort,
    input_tx: mpsc::UnboundedSender<InputEvent>,
    surface: Box<dyn Surface>,
    hooks: SessionHooks,
    sinks: Vec<Arc<dyn DataSink>>,
    control: Arc<Control>,
    abort: watch::Receiver<bool>,
    clock: SessionClock,
    trial_index: TrialIndex,
    phase: Phase,
    /// Trial of the current `Presenting`/`Finishing`/`InterTrial` cycle
    current: Option<Trial>,
    subject_id: Option<SubjectId>,
    finished_at: Option<Instant>,
    stats: SessionStats,
}

impl Session {
    /// Build the chunk tree. Structure problems surface here, before
    /// anything is presented.
    pub fn init(
        config: SessionConfig,
        structure: &Structure,
        registry: PluginRegistry,
        hooks: SessionHooks,
    ) -> FlowResult<Self> {
        let rng = config.seed.map(Randomizer::with_seed).unwrap_or_default();
        let tree = TreeBuilder::new(&registry)
            .default_inter_trial_delay(config.default_inter_trial_delay)
            .randomizer(rng)
            .build(structure)
            .map_err(|e| {
                warn!(error = %e, "experiment structure rejected");
                e
            })?;

        let (input, input_tx) = InputPort::new();
        let (abort_tx, abort) = watch::channel(false);
        let control = Arc::new(Control {
            abort: abort_tx,
            end_session: AtomicBool::new(false),
            end_current_chunk: AtomicBool::new(false),
        });

        info!(
            trials = tree.length(),
            chunks = tree.chunk_count(),
            plugins = registry.len(),
            "session initialised"
        );

        Ok(Session {
            subject_id: config.subject_id.clone().map(SubjectId::new),
            config,
            registry,
            tree,
            store: DataStore::new(),
            input,
            input_tx,
            surface: Box::new(NullSurface),
            hooks,
            sinks: Vec::new(),
            control,
            abort,
            clock: SessionClock::new(),
            trial_index: TrialIndex::ZERO,
            phase: Phase::Idle,
            current: None,
            finished_at: None,
            stats: SessionStats::default(),
        })
    }

    pub fn with_surface(mut self, surface: impl Surface + 'static) -> Self {
        self.surface = Box::new(surface);
        self
    }

    pub fn with_sink(mut self, sink: impl DataSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            control: self.control.clone(),
        }
    }

    /// Sender the presentation layer pushes raw input events into
    pub fn input_sender(&self) -> mpsc::UnboundedSender<InputEvent> {
        self.input_tx.clone()
    }

    /// Merge `properties` into every record written from now on
    pub fn add_properties(&mut self, properties: &DataMap) {
        self.store.add_properties(properties);
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn data(&self) -> &DataStore {
        &self.store
    }

    pub fn tree(&self) -> &ChunkTree {
        &self.tree
    }

    /// Trial being presented or finished, `None` between trials
    pub fn current_trial(&self) -> Option<&Trial> {
        self.current.as_ref()
    }

    pub fn progress(&self) -> Progress {
        self.tree.progress(self.trial_index.get())
    }

    /// Time since start, frozen once the session has ended
    pub fn total_time(&self) -> Duration {
        match (self.clock.origin(), self.finished_at) {
            (Some(origin), Some(end)) => end.saturating_duration_since(origin),
            (Some(_), None) => self.clock.elapsed(now()),
            _ => Duration::ZERO,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run until the session finishes or is aborted
    pub async fn run(&mut self) -> FlowResult<Phase> {
        while !self.phase.is_terminal() {
            self.step().await?;
        }
        Ok(self.phase.clone())
    }

    /// Like [`run`](Self::run), waiting first on `readiness` for at most
    /// `max_load_time` unless `skip_load_check` is set
    pub async fn run_when_ready<F>(&mut self, readiness: F) -> FlowResult<Phase>
    where
        F: Future<Output = ()>,
    {
        if !self.config.skip_load_check {
            let limit = self.config.max_load_time;
            debug!(?limit, "waiting for resources");
            if tokio::time::timeout(limit, readiness).await.is_err() {
                warn!(?limit, "resources not ready in time");
                return Err(FlowError::LoadTimeout(limit));
            }
        }
        self.run().await
    }

    /// Execute one transition of the session loop. Steps after the session
    /// has ended are no-ops.
    pub async fn step(&mut self) -> FlowResult<Phase> {
        if self.phase.is_terminal() {
            return Ok(self.phase.clone());
        }
        self.stats.steps += 1;

        let aborted = *self.abort.borrow();
        let next = if aborted {
            self.teardown()
        } else {
            match self.phase.clone() {
                Phase::Idle => self.start().await?,
                Phase::Presenting(position) => self.present(position).await?,
                Phase::Finishing => self.finish_trial(),
                Phase::InterTrial(delay) => self.inter_trial(delay).await,
                Phase::Advancing => {
                    self.advance();
                    self.request_next().await?
                }
                terminal => terminal,
            }
        };

        if next != self.phase {
            debug!(from = ?self.phase, to = ?next, "phase transition");
        }
        self.phase = next;
        Ok(self.phase.clone())
    }

    async fn start(&mut self) -> FlowResult<Phase> {
        self.clock.start(now());
        let subject = self.subject_id.get_or_insert_with(SubjectId::generate);
        info!(subject = %subject, "session started");
        self.request_next().await
    }

    /// Ask the tree for the next trial, ending the session when there is none
    async fn request_next(&mut self) -> FlowResult<Phase> {
        match self.tree.next(&self.store) {
            Some(trial) => {
                let position = TrialPosition {
                    index: self.trial_index,
                    local: self.tree.current_trial_local_index().unwrap_or(0),
                    chunk_id: self.tree.active_chunk_id().unwrap_or_default(),
                };
                self.current = Some(trial);
                Ok(Phase::Presenting(position))
            }
            None => {
                self.finish().await?;
                Ok(Phase::Finished)
            }
        }
    }

    async fn present(&mut self, position: TrialPosition) -> FlowResult<Phase> {
        let Some(trial) = self.current.clone() else {
            return Ok(Phase::Advancing);
        };
        let plugin = self.registry.require(trial.kind())?;
        if let Some(hook) = self.hooks.on_trial_start.as_mut() {
            hook(&trial);
        }
        debug!(
            trial = %position.index,
            kind = trial.kind(),
            chunk = %position.chunk_id,
            "presenting trial"
        );

        let written = self.store.len();
        let result = {
            let mut ctx = TrialContext::new(
                self.surface.as_mut(),
                &mut self.input,
                &mut self.store,
                self.clock,
                self.abort.clone(),
                &trial,
                position,
            );
            plugin.trial(&mut ctx, &trial).await
        };
        self.stats.trials_presented += 1;

        match result {
            Ok(()) => {}
            Err(FlowError::SessionAborted) => return Ok(self.teardown()),
            Err(e) => {
                warn!(error = %e, kind = trial.kind(), "trial failed");
                self.input.cancel_all();
                return Err(e);
            }
        }

        if self.store.len() > written {
            self.stats.records_written += 1;
            if let (Some(hook), Some(record)) = (self.hooks.on_data_update.as_mut(), self.store.last()) {
                hook(record);
            }
        }
        Ok(Phase::Finishing)
    }

    /// Completion callbacks, listener teardown and the delay to wait out
    fn finish_trial(&mut self) -> Phase {
        let record = self.store.by_trial_index(self.trial_index.get());
        if let Some(on_finish) = self.current.as_ref().and_then(Trial::on_finish) {
            on_finish(record);
        }
        if let Some(hook) = self.hooks.on_trial_finish.as_mut() {
            hook(record);
        }

        self.input.cancel_all();

        let delay = self
            .current
            .as_ref()
            .and_then(Trial::inter_trial_delay)
            .map(InterTrialDelay::resolve)
            .unwrap_or(self.config.default_inter_trial_delay);
        Phase::InterTrial(delay)
    }

    async fn inter_trial(&mut self, delay: Duration) -> Phase {
        if !delay.is_zero() {
            let aborted = tokio::select! {
                _ = wait_for_abort(&mut self.abort) => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if aborted {
                return self.teardown();
            }
            self.stats.total_delay += delay;
        }
        Phase::Advancing
    }

    fn advance(&mut self) {
        self.trial_index = self.trial_index.next();
        self.current = None;

        if self.control.end_current_chunk.swap(false, Ordering::SeqCst) {
            self.tree.end_current_chunk();
        }
        if self.control.end_session.swap(false, Ordering::SeqCst) {
            info!(trial = %self.trial_index, "ending session early");
            self.tree.end();
        }
        self.tree.advance(&self.store);

        if self.config.show_progress {
            let progress = self.progress();
            debug!(
                trial = progress.current_trial_global,
                percent = progress.percent_complete(),
                "progress"
            );
            if let Some(hook) = self.hooks.on_progress.as_mut() {
                hook(&progress);
            }
        }
    }

    async fn finish(&mut self) -> FlowResult<()> {
        self.input.cancel_all();
        self.finished_at = Some(now());
        info!(
            trials = self.trial_index.get(),
            records = self.store.len(),
            total_time = ?self.total_time(),
            "session finished"
        );

        if let Some(hook) = self.hooks.on_finish.as_mut() {
            hook(self.store.records());
        }
        if self.sinks.is_empty() {
            return Ok(());
        }
        let submission = self.submission()?;
        for sink in &self.sinks {
            sink.submit(&submission).await?;
        }
        Ok(())
    }

    fn teardown(&mut self) -> Phase {
        self.input.cancel_all();
        self.current = None;
        self.finished_at.get_or_insert_with(now);
        self.surface.clear();
        info!(trial = %self.trial_index, "session aborted");
        Phase::Aborted
    }

    /// The log as handed to sinks
    pub fn submission(&self) -> FlowResult<Submission> {
        Ok(Submission {
            subject_id: self.subject_id.clone().unwrap_or_else(SubjectId::generate),
            subject_info: self.config.subject_info.clone(),
            blocks_order: self.config.blocks_order.clone(),
            format: self.config.data_format,
            data: self.store.export(self.config.data_format)?,
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("trial_index", &self.trial_index)
            .field("records", &self.store.len())
            .field("tree", &self.tree)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
