//! Trial context - what a running plugin can see and do

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::trace;

use psyflow_core::{
    ChunkId, DataAccessError, DataMap, FlowError, FlowResult, InputRegistrationError,
    SessionClock, Trial, TrialIndex, TrialRecord,
};
use psyflow_data::{DataStore, WriteContext};
use psyflow_input::{InputCapture, InputEvent, KeyboardConfig, ListenerId, Response};

use crate::Surface;

/// Current time on the runtime clock. Under paused tokio time this is the
/// virtual clock, which keeps reaction times deterministic in tests.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Listener registry plus the queue of raw events feeding it
#[derive(Debug)]
pub struct InputPort {
    capture: InputCapture,
    events: mpsc::UnboundedReceiver<InputEvent>,
}

impl InputPort {
    /// Port and the sender the presentation layer pushes events into
    pub fn new() -> (Self, mpsc::UnboundedSender<InputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let port = InputPort {
            capture: InputCapture::new(),
            events: rx,
        };
        (port, tx)
    }

    pub fn capture(&self) -> &InputCapture {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut InputCapture {
        &mut self.capture
    }

    /// Dispatch every event that is already queued
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        while let Ok(event) = self.events.try_recv() {
            self.capture.dispatch(&event);
            n += 1;
        }
        n
    }

    /// Deregister every listener of the outgoing trial
    pub fn cancel_all(&mut self) {
        self.drain();
        self.capture.cancel_all();
    }
}

/// Where the running trial sits in the session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrialPosition {
    pub index: TrialIndex,
    /// Position inside the active block
    pub local: usize,
    /// Chunk containing the active block
    pub chunk_id: ChunkId,
}

/// Resolves once `abort` is raised or its sender is gone
pub async fn wait_for_abort(abort: &mut watch::Receiver<bool>) {
    loop {
        let raised = *abort.borrow();
        if raised || abort.changed().await.is_err() {
            return;
        }
    }
}

/// Handed to [`Plugin::trial`](crate::Plugin::trial) for the lifetime of
/// one trial
pub struct TrialContext<'a> {
    surface: &'a mut dyn Surface,
    input: &'a mut InputPort,
    store: &'a mut DataStore,
    clock: SessionClock,
    abort: watch::Receiver<bool>,
    trial: &'a Trial,
    position: TrialPosition,
    written: bool,
}

impl<'a> TrialContext<'a> {
    pub fn new(
        surface: &'a mut dyn Surface,
        input: &'a mut InputPort,
        store: &'a mut DataStore,
        clock: SessionClock,
        abort: watch::Receiver<bool>,
        trial: &'a Trial,
        position: TrialPosition,
    ) -> Self {
        TrialContext {
            surface,
            input,
            store,
            clock,
            abort,
            trial,
            position,
            written: false,
        }
    }

    pub fn surface(&mut self) -> &mut dyn Surface {
        &mut *self.surface
    }

    /// Shortcut for `surface().show(..)`
    pub fn show(&mut self, content: &str) {
        self.surface.show(content);
    }

    pub fn clear(&mut self) {
        self.surface.clear();
    }

    pub fn trial_index(&self) -> TrialIndex {
        self.position.index
    }

    pub fn trial_index_local(&self) -> usize {
        self.position.local
    }

    pub fn chunk_id(&self) -> &ChunkId {
        &self.position.chunk_id
    }

    /// Time since session start
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed(now())
    }

    /// Read access to the log
    pub fn data(&self) -> &DataStore {
        self.store
    }

    pub fn is_aborted(&self) -> bool {
        *self.abort.borrow()
    }

    pub fn listen_keyboard(&mut self, config: &KeyboardConfig) -> FlowResult<ListenerId> {
        self.input.capture.register_keyboard(config, now())
    }

    pub fn listen_pointer(&mut self, arming_delay: Duration) -> ListenerId {
        self.input.capture.register_pointer(arming_delay, now())
    }

    pub fn cancel_listener(&mut self, id: ListenerId) -> bool {
        self.input.capture.cancel(id)
    }

    /// Wait for the next response of `listener`
    pub async fn next_response(&mut self, listener: ListenerId) -> FlowResult<Response> {
        self.wait_any(&[listener]).await.map(|(_, response)| response)
    }

    /// Wait for the first response of any of `listeners`, giving up after
    /// `timeout` with `Ok(None)`
    pub async fn next_any(
        &mut self,
        listeners: &[ListenerId],
        timeout: Option<Duration>,
    ) -> FlowResult<Option<(ListenerId, Response)>> {
        match timeout {
            None => self.wait_any(listeners).await.map(Some),
            Some(limit) => match tokio::time::timeout(limit, self.wait_any(listeners)).await {
                Ok(result) => result.map(Some),
                Err(_) => Ok(None),
            },
        }
    }

    async fn wait_any(&mut self, listeners: &[ListenerId]) -> FlowResult<(ListenerId, Response)> {
        loop {
            if self.is_aborted() {
                return Err(FlowError::SessionAborted);
            }
            for &id in listeners {
                if let Some(response) = self.input.capture.take_response(id) {
                    trace!(listener = id.0, ?response, "response delivered");
                    return Ok((id, response));
                }
            }
            if !listeners.iter().any(|&id| self.input.capture.is_live(id)) {
                let id = listeners.first().map(|id| id.0).unwrap_or_default();
                return Err(InputRegistrationError::UnknownListener(id).into());
            }

            tokio::select! {
                _ = wait_for_abort(&mut self.abort) => return Err(FlowError::SessionAborted),
                event = self.input.events.recv() => match event {
                    Some(event) => {
                        self.input.capture.dispatch(&event);
                    }
                    None => return Err(FlowError::Plugin("input channel closed".to_string())),
                },
            }
        }
    }

    /// Sleep that ends early with `SessionAborted` when the session is torn
    /// down
    pub async fn sleep(&mut self, duration: Duration) -> FlowResult<()> {
        tokio::select! {
            _ = wait_for_abort(&mut self.abort) => Err(FlowError::SessionAborted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Write this trial's record. A trial writes at most once.
    pub fn write(&mut self, payload: &DataMap) -> FlowResult<&TrialRecord> {
        if self.written {
            return Err(DataAccessError::DuplicateWrite(self.position.index.get()).into());
        }
        let context = WriteContext {
            kind: self.trial.kind().to_string(),
            trial_index: self.position.index,
            trial_index_local: self.position.local,
            time_elapsed: self.elapsed(),
            chunk_id: self.position.chunk_id.clone(),
        };
        let trial_data = self.trial.data().resolve();
        self.written = true;
        Ok(self.store.write(&context, payload, &trial_data))
    }

    pub fn has_written(&self) -> bool {
        self.written
    }
}
