//! Time primitives for PSYFLOW
//!
//! Every timestamp is a monotonic `Instant` handed in by the caller. The
//! engine never reads the OS clock itself, so a driver with a virtual clock
//! (paused tokio time, a replayed log) gets deterministic reaction times.

use std::time::{Duration, Instant};

/// Elapsed-time origin of a session
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionClock {
    origin: Option<Instant>,
}

impl SessionClock {
    pub fn new() -> Self {
        SessionClock::default()
    }

    /// Record the session start. A second call keeps the first origin.
    pub fn start(&mut self, now: Instant) {
        if self.origin.is_none() {
            self.origin = Some(now);
        }
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.origin.is_some()
    }

    #[inline]
    pub fn origin(&self) -> Option<Instant> {
        self.origin
    }

    /// Time since start, zero before the session starts
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.origin
            .map(|origin| now.saturating_duration_since(origin))
            .unwrap_or(Duration::ZERO)
    }
}

/// Duration as fractional milliseconds, the unit stored in trial records
#[inline]
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
