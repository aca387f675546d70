//! Input events and listener responses

use std::fmt;
use std::time::{Duration, Instant};

use crate::KeyCode;

/// Raw timestamped input delivered by the presentation layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    KeyDown { code: KeyCode, at: Instant },
    KeyUp { code: KeyCode, at: Instant },
    Click { x: f64, y: f64, at: Instant },
}

impl InputEvent {
    pub fn key_down(code: impl Into<KeyCode>, at: Instant) -> Self {
        InputEvent::KeyDown {
            code: code.into(),
            at,
        }
    }

    pub fn key_up(code: impl Into<KeyCode>, at: Instant) -> Self {
        InputEvent::KeyUp {
            code: code.into(),
            at,
        }
    }

    pub fn click(x: f64, y: f64, at: Instant) -> Self {
        InputEvent::Click { x, y, at }
    }

    /// When the event happened
    pub fn at(&self) -> Instant {
        match self {
            InputEvent::KeyDown { at, .. }
            | InputEvent::KeyUp { at, .. }
            | InputEvent::Click { at, .. } => *at,
        }
    }
}

/// Handle of an armed listener
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

/// Accepted key press
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyResponse {
    pub key: KeyCode,
    /// Time from listener registration to key down
    pub rt: Duration,
}

/// Release of a key that produced a [`KeyResponse`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyRelease {
    pub key: KeyCode,
    /// Time the key was held down
    pub hold: Duration,
}

/// Accepted pointer click
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClickResponse {
    pub x: f64,
    pub y: f64,
    /// Time from listener registration to the click
    pub rt: Duration,
}

/// Anything a listener can produce
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Response {
    Key(KeyResponse),
    Release(KeyRelease),
    Click(ClickResponse),
}

impl Response {
    /// Reaction time for presses and clicks
    pub fn rt(&self) -> Option<Duration> {
        match self {
            Response::Key(key) => Some(key.rt),
            Response::Click(click) => Some(click.rt),
            Response::Release(_) => None,
        }
    }

    pub fn key(&self) -> Option<KeyCode> {
        match self {
            Response::Key(key) => Some(key.key),
            Response::Release(release) => Some(release.key),
            Response::Click(_) => None,
        }
    }
}
