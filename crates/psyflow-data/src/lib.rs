//! PSYFLOW Data - the session log
//!
//! This crate implements the trial data store:
//! - Appending immutable trial records with built-in session fields
//! - Global properties merged into every future record
//! - Queries by plugin type, chunk instance and trial index
//! - Column-major field collection for analysis
//! - JSON and CSV export

pub mod export;
pub mod query;
pub mod store;

pub use export::*;
pub use query::*;
pub use store::*;
