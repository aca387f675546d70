//! PSYFLOW Test Harness - end-to-end session validation
//!
//! This crate provides:
//! - A simulated participant answering displayed screens with timed input
//! - A scenario harness running whole sessions and checking log invariants
//! - End-to-end integration tests under paused tokio time

pub mod participant;
pub mod integration;

pub use participant::*;
pub use integration::*;
