//! Core data models for physrev.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants the executor and runner absorb

mod config;
mod error;
mod records;
mod rubric;

pub use config::*;
pub use error::*;
pub use records::*;
pub use rubric::*;
