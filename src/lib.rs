//! physrev - Resumable propose/review/refine pipeline for physics solutions.
//!
//! ## Architecture
//!
//! physrev drives LLM agents through stages, each writing its own
//! append-only JSONL store:
//! - **Propose**: every proposer model solves every problem
//! - **Review**: independent reviewers score each solution per category
//! - **Meta-review**: one model consolidates the reviewers' findings
//! - **Refine**: the proposer rewrites its solution from the findings
//! - **Evaluate**: a grader scores any solutions store against reference steps
//!
//! Every model call goes through a retrying executor that rotates over the
//! endpoint's credential pool. Every pass skips identifiers already in its
//! store, so an interrupted run resumes where it stopped.
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, rotation, cooldown)

pub mod agents;
pub mod checkpoint;
pub mod client;
pub mod interpret;
pub mod models;
pub mod pipeline;

// Re-exports for convenience
pub use checkpoint::{CheckpointSet, JsonlStore, StageReport};
pub use client::{ChatEndpoint, CredentialPool, EndpointRegistry, Executor, ModelEndpoint};
pub use models::{
    Config, PipelineError, ProblemRecord, Result, ReviewRecord, SolutionRecord,
};
pub use pipeline::{BatchRunner, Pipeline, RunSummary, StageOperation, StoreLayout};
