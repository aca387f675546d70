//! PSYFLOW Randomization - counterbalancing primitives
//!
//! This crate provides:
//! - Uniform Fisher-Yates shuffles
//! - Weighted repetition of stimulus lists, optionally unpacked column-major
//! - Shuffles without adjacent repeats, with bounded repair and a greedy fallback
//! - Sampling with and without replacement
//! - Full factorial designs
//!
//! Every operation draws from a [`Randomizer`], so a session seeded with
//! [`Randomizer::with_seed`] reproduces the same trial order.

pub mod randomizer;
pub mod repeat;
pub mod no_repeat;
pub mod factorial;

pub use randomizer::*;
pub use repeat::*;
pub use no_repeat::*;
pub use factorial::*;
