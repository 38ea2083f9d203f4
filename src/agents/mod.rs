//! Model-backed agents, one per pipeline role.
//!
//! Each agent is a `StageOperation` the batch runner can drive:
//! - **Proposer**: problem → solution
//! - **Reviewer**: solution → scored review
//! - **MetaReviewer**: solution + reviews → consolidated mistakes
//! - **Refiner**: solution + mistakes → revised solution (or self-check)
//! - **Evaluator**: solution + reference steps → rubric grade

mod aggregator;
mod evaluator;
mod meta;
pub mod prompts;
mod proposer;
mod refiner;
mod reviewer;

pub use aggregator::*;
pub use evaluator::*;
pub use meta::*;
pub use proposer::*;
pub use refiner::*;
pub use reviewer::*;

use crate::client::{CallRequest, Executor, Message};
use crate::interpret::{StructuredReply, interpret};
use crate::models::{CallFailure, ItemError, ModelSpec};
use std::sync::Arc;

/// A model bound to the executor that serves its endpoint.
#[derive(Clone)]
pub struct Agent {
    executor: Arc<Executor>,
    model: ModelSpec,
}

impl Agent {
    pub fn new(executor: Arc<Executor>, model: ModelSpec) -> Self {
        Self { executor, model }
    }

    /// Name used in records, logs and store names.
    pub fn name(&self) -> &str {
        self.model.display_name()
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    fn request(&self, messages: Vec<Message>) -> CallRequest {
        CallRequest::new(self.model.id.clone(), messages)
            .with_limits(self.model.max_tokens, self.model.temperature)
    }

    /// Free-text completion.
    pub async fn complete(&self, messages: Vec<Message>) -> Result<String, CallFailure> {
        self.executor.call(&self.request(messages)).await
    }

    /// Structured completion, interpreted and validated as `T`.
    pub async fn ask<T: StructuredReply>(
        &self,
        messages: Vec<Message>,
        problem_id: &str,
    ) -> Result<T, ItemError> {
        let request = self.request(messages).with_schema(T::NAME, T::schema());
        let raw = self.executor.call(&request).await?;
        Ok(interpret::<T>(&raw, problem_id)?)
    }
}
