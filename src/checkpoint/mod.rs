//! Checkpoint module for resumable pipeline execution.
//!
//! Provides:
//! - `JsonlStore`: Append-only stage output, the durability point
//! - `CheckpointSet`: Identifiers already recorded in a store
//! - `StageReport`: Outcome of one pass, including the re-run signal

mod state;
mod store;

pub use state::*;
pub use store::*;
