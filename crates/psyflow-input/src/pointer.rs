//! Pointer listeners

use std::time::{Duration, Instant};

use crate::ListenerId;

/// Single-shot click listener
#[derive(Clone, Copy, Debug)]
pub struct PointerListener {
    pub id: ListenerId,
    pub start: Instant,
    /// Clicks before `start + arming_delay` are ignored
    pub arming_delay: Duration,
}

impl PointerListener {
    pub fn new(id: ListenerId, arming_delay: Duration, start: Instant) -> Self {
        PointerListener {
            id,
            start,
            arming_delay,
        }
    }

    /// Earliest instant a click is accepted
    pub fn armed_at(&self) -> Instant {
        self.start + self.arming_delay
    }

    pub fn accepts(&self, at: Instant) -> bool {
        at >= self.armed_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arming_delay() {
        let t0 = Instant::now();
        let listener = PointerListener::new(ListenerId(3), Duration::from_millis(100), t0);

        assert!(!listener.accepts(t0 + Duration::from_millis(99)));
        assert!(listener.accepts(t0 + Duration::from_millis(100)));
    }
}
