//! Input capture hub
//!
//! Owns every armed listener of the live trial. Raw events are fed in with
//! [`InputCapture::dispatch`]; responses are queued per listener and taken
//! with [`InputCapture::take_response`]. An event stamped before a
//! listener's registration is never attributed to it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use psyflow_core::FlowResult;

use crate::{
    ClickResponse, InputEvent, KeyCode, KeyRelease, KeyResponse, KeyboardConfig,
    KeyboardListener, ListenerId, PointerListener, Response,
};

/// Key press that is waiting for its release
#[derive(Clone, Copy, Debug)]
struct PendingRelease {
    listener: ListenerId,
    key: KeyCode,
    down_at: Instant,
}

/// Registry of armed listeners
#[derive(Debug, Default)]
pub struct InputCapture {
    next_id: u64,
    keyboard: Vec<KeyboardListener>,
    pointer: Vec<PointerListener>,
    /// Keys currently down, with the time of their first key down
    held: HashMap<KeyCode, Instant>,
    releases: Vec<PendingRelease>,
    responses: VecDeque<(ListenerId, Response)>,
}

impl InputCapture {
    pub fn new() -> Self {
        InputCapture::default()
    }

    fn allocate(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    /// Arm a keyboard listener starting at `now`
    pub fn register_keyboard(
        &mut self,
        config: &KeyboardConfig,
        now: Instant,
    ) -> FlowResult<ListenerId> {
        let id = self.allocate();
        let listener = KeyboardListener::new(id, config, now)?;
        debug!(listener = id.0, persist = config.persist, "keyboard listener armed");
        self.keyboard.push(listener);
        Ok(id)
    }

    /// Arm a single-shot pointer listener starting at `now`
    pub fn register_pointer(&mut self, arming_delay: Duration, now: Instant) -> ListenerId {
        let id = self.allocate();
        debug!(listener = id.0, ?arming_delay, "pointer listener armed");
        self.pointer.push(PointerListener::new(id, arming_delay, now));
        id
    }

    /// Deregister one listener and drop its queued responses.
    /// Returns false if it was neither armed nor awaiting a release.
    pub fn cancel(&mut self, id: ListenerId) -> bool {
        let before = self.keyboard.len() + self.pointer.len() + self.releases.len();
        self.keyboard.retain(|l| l.id != id);
        self.pointer.retain(|l| l.id != id);
        self.releases.retain(|r| r.listener != id);
        self.responses.retain(|(listener, _)| *listener != id);
        let after = self.keyboard.len() + self.pointer.len() + self.releases.len();
        before != after
    }

    /// Deregister everything. Held-key state survives, since the keys are
    /// still physically down.
    pub fn cancel_all(&mut self) {
        if self.armed() > 0 {
            debug!(listeners = self.armed(), "cancelling all listeners");
        }
        self.keyboard.clear();
        self.pointer.clear();
        self.releases.clear();
        self.responses.clear();
    }

    /// Number of armed listeners
    pub fn armed(&self) -> usize {
        self.keyboard.len() + self.pointer.len()
    }

    /// True if `id` can still produce a response
    pub fn is_live(&self, id: ListenerId) -> bool {
        self.keyboard.iter().any(|l| l.id == id)
            || self.pointer.iter().any(|l| l.id == id)
            || self.releases.iter().any(|r| r.listener == id)
            || self.responses.iter().any(|(l, _)| *l == id)
    }

    pub fn is_held(&self, code: KeyCode) -> bool {
        self.held.contains_key(&code)
    }

    /// Oldest queued response for `id`
    pub fn take_response(&mut self, id: ListenerId) -> Option<Response> {
        let pos = self.responses.iter().position(|(l, _)| *l == id)?;
        self.responses.remove(pos).map(|(_, response)| response)
    }

    /// Route a raw event to the armed listeners. Returns the number of
    /// responses it produced.
    pub fn dispatch(&mut self, event: &InputEvent) -> usize {
        let queued = self.responses.len();
        match *event {
            InputEvent::KeyDown { code, at } => self.key_down(code, at),
            InputEvent::KeyUp { code, at } => self.key_up(code, at),
            InputEvent::Click { x, y, at } => self.click(x, y, at),
        }
        self.responses.len() - queued
    }

    fn key_down(&mut self, code: KeyCode, at: Instant) {
        let was_held = self.held.contains_key(&code);
        let mut fired = Vec::new();

        for listener in &self.keyboard {
            if at < listener.start || !listener.accepts(code) {
                continue;
            }
            if was_held && !listener.allow_held_key {
                trace!(listener = listener.id.0, key = code.0, "ignoring held key");
                continue;
            }
            let rt = at.saturating_duration_since(listener.start);
            self.responses
                .push_back((listener.id, Response::Key(KeyResponse { key: code, rt })));
            fired.push((listener.id, listener.persist));
        }

        for (id, persist) in fired {
            self.releases.push(PendingRelease {
                listener: id,
                key: code,
                down_at: at,
            });
            if !persist {
                self.keyboard.retain(|l| l.id != id);
            }
        }

        self.held.entry(code).or_insert(at);
    }

    fn key_up(&mut self, code: KeyCode, at: Instant) {
        self.held.remove(&code);

        let responses = &mut self.responses;
        self.releases.retain(|pending| {
            if pending.key != code {
                return true;
            }
            let hold = at.saturating_duration_since(pending.down_at);
            responses.push_back((pending.listener, Response::Release(KeyRelease { key: code, hold })));
            false
        });
    }

    fn click(&mut self, x: f64, y: f64, at: Instant) {
        let responses = &mut self.responses;
        self.pointer.retain(|listener| {
            if !listener.accepts(at) {
                return true;
            }
            let rt = at.saturating_duration_since(listener.start);
            responses.push_back((listener.id, Response::Click(ClickResponse { x, y, rt })));
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeySpec;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_reaction_time_from_registration() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();
        let id = capture
            .register_keyboard(&KeyboardConfig::keys(["f", "j"]), t0)
            .unwrap();

        assert_eq!(capture.dispatch(&InputEvent::key_down(70u32, t0 + ms(420))), 1);
        assert_eq!(
            capture.take_response(id),
            Some(Response::Key(KeyResponse {
                key: KeyCode(70),
                rt: ms(420)
            }))
        );
        // Not persistent: deregistered after the first response
        assert_eq!(capture.armed(), 0);
    }

    #[test]
    fn test_disallowed_key_is_ignored() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();
        let id = capture
            .register_keyboard(&KeyboardConfig::keys([KeySpec::from("space")]), t0)
            .unwrap();

        assert_eq!(capture.dispatch(&InputEvent::key_down(70u32, t0 + ms(10))), 0);
        assert!(capture.take_response(id).is_none());
        assert_eq!(capture.armed(), 1);
    }

    #[test]
    fn test_persistent_listener_keeps_firing() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();
        let id = capture
            .register_keyboard(&KeyboardConfig::any().persist(true), t0)
            .unwrap();

        capture.dispatch(&InputEvent::key_down(65u32, t0 + ms(100)));
        capture.dispatch(&InputEvent::key_up(65u32, t0 + ms(150)));
        capture.dispatch(&InputEvent::key_down(66u32, t0 + ms(300)));

        assert_eq!(capture.take_response(id).and_then(|r| r.rt()), Some(ms(100)));
        assert_eq!(
            capture.take_response(id),
            Some(Response::Release(KeyRelease {
                key: KeyCode(65),
                hold: ms(50)
            }))
        );
        assert_eq!(capture.take_response(id).and_then(|r| r.key()), Some(KeyCode(66)));
        assert_eq!(capture.armed(), 1);
    }

    #[test]
    fn test_held_key_is_rejected_unless_allowed() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();

        // Key goes down before any listener exists
        capture.dispatch(&InputEvent::key_down(32u32, t0));
        assert!(capture.is_held(KeyCode(32)));

        let strict = capture.register_keyboard(&KeyboardConfig::any(), t0 + ms(10)).unwrap();
        let lenient = capture
            .register_keyboard(&KeyboardConfig::any().allow_held_key(true), t0 + ms(10))
            .unwrap();

        // Auto-repeat of the held key
        capture.dispatch(&InputEvent::key_down(32u32, t0 + ms(50)));
        assert!(capture.take_response(strict).is_none());
        assert!(capture.take_response(lenient).is_some());

        capture.dispatch(&InputEvent::key_up(32u32, t0 + ms(60)));
        capture.dispatch(&InputEvent::key_down(32u32, t0 + ms(80)));
        assert_eq!(capture.take_response(strict).and_then(|r| r.rt()), Some(ms(70)));
    }

    #[test]
    fn test_stale_events_are_not_attributed() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();
        let id = capture
            .register_keyboard(&KeyboardConfig::any(), t0 + ms(500))
            .unwrap();

        // Event from the previous trial arriving late
        capture.dispatch(&InputEvent::key_down(70u32, t0 + ms(480)));
        assert!(capture.take_response(id).is_none());
        assert_eq!(capture.armed(), 1);
    }

    #[test]
    fn test_release_reported_after_deregistration() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();
        let id = capture.register_keyboard(&KeyboardConfig::any(), t0).unwrap();

        capture.dispatch(&InputEvent::key_down(74u32, t0 + ms(200)));
        assert!(capture.take_response(id).is_some());
        assert!(capture.is_live(id));

        capture.dispatch(&InputEvent::key_up(74u32, t0 + ms(290)));
        assert_eq!(
            capture.take_response(id),
            Some(Response::Release(KeyRelease {
                key: KeyCode(74),
                hold: ms(90)
            }))
        );
        assert!(!capture.is_live(id));
    }

    #[test]
    fn test_pointer_is_single_shot_and_armed_late() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();
        let id = capture.register_pointer(ms(100), t0);

        assert_eq!(capture.dispatch(&InputEvent::click(5.0, 5.0, t0 + ms(50))), 0);
        assert_eq!(capture.dispatch(&InputEvent::click(6.0, 7.0, t0 + ms(250))), 1);
        assert_eq!(capture.dispatch(&InputEvent::click(8.0, 9.0, t0 + ms(300))), 0);

        assert_eq!(
            capture.take_response(id),
            Some(Response::Click(ClickResponse {
                x: 6.0,
                y: 7.0,
                rt: ms(250)
            }))
        );
    }

    #[test]
    fn test_cancel_and_cancel_all() {
        let t0 = Instant::now();
        let mut capture = InputCapture::new();
        let a = capture.register_keyboard(&KeyboardConfig::any(), t0).unwrap();
        let b = capture.register_pointer(Duration::ZERO, t0);
        assert_eq!(capture.armed(), 2);

        assert!(capture.cancel(a));
        assert!(!capture.cancel(a));
        assert_eq!(capture.armed(), 1);

        capture.dispatch(&InputEvent::click(0.0, 0.0, t0));
        capture.cancel_all();
        assert_eq!(capture.armed(), 0);
        assert!(capture.take_response(b).is_none());
    }
}
