//! Pipeline module - stage runner, store layout and orchestration.

mod layout;
mod orchestrator;
mod runner;

pub use layout::*;
pub use orchestrator::*;
pub use runner::*;
