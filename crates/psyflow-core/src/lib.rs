//! PSYFLOW Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the PSYFLOW engine:
//! - Identifiers (ChunkId, TrialIndex)
//! - Time primitives (SessionClock, ElapsedTime)
//! - Trials and trial records
//! - Error taxonomy

pub mod id;
pub mod time;
pub mod record;
pub mod trial;
pub mod error;

pub use id::*;
pub use time::*;
pub use record::*;
pub use trial::*;
pub use error::*;
