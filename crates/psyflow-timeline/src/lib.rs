//! PSYFLOW Timeline - the recursive control-flow structure of an experiment
//!
//! This crate implements:
//! - The structure description, typed or declarative JSON
//! - The plugin contract and the context a running trial sees
//! - The arena-backed chunk tree with linear, while and if chunks
//! - The builder that turns a structure into a chunk tree

pub mod builder;
pub mod context;
pub mod plugin;
pub mod structure;
pub mod tree;

pub use builder::*;
pub use context::*;
pub use plugin::*;
pub use structure::*;
pub use tree::*;
