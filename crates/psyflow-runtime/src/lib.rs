//! PSYFLOW Runtime - session orchestration and main loop
//!
//! This crate implements the session loop:
//! 1. Wait on the optional readiness gate
//! 2. Request the next trial from the chunk tree
//! 3. Present it through its plugin
//! 4. Run completion callbacks and deregister input listeners
//! 5. Wait out the inter-trial delay
//! 6. Advance the tree and report progress
//! 7. Hand the finished log to the configured sinks

pub mod config;
pub mod logging;
pub mod plugins;
pub mod session;
pub mod sink;

pub use config::*;
pub use session::*;
pub use sink::*;
