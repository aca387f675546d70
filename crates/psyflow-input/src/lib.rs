//! PSYFLOW Input Capture - timing-accurate response collection
//!
//! This crate implements:
//! - The key table mapping symbolic names to key codes
//! - Keyboard listeners with allow-lists, persistence and held-key rejection
//! - Single-shot pointer listeners with an arming delay
//! - A capture hub that routes timestamped events to armed listeners
//!
//! Reaction times are computed from the `Instant`s carried by the events,
//! never from the time an event is processed.

pub mod capture;
pub mod event;
pub mod keyboard;
pub mod keys;
pub mod pointer;

pub use capture::*;
pub use event::*;
pub use keyboard::*;
pub use keys::*;
pub use pointer::*;
