//! Refiner: rewrites a solution using consolidated feedback or a self-check turn.
//!
//! Epistemic foundation:
//! - K_i: No mistakes found → solution copied verbatim and marked terminal
//! - K_i: Terminal solutions stay terminal in later rounds
//! - B_i: Feedback improves the solution (might not → next round reviews it)

use crate::agents::{Agent, prompts};
use crate::interpret::require_text;
use crate::models::{AggregateRecord, ItemError, SolutionRecord};
use crate::pipeline::StageOperation;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// What the refiner feeds back to the proposer.
pub enum RefineMode {
    /// Consolidated findings, keyed by problem identifier
    Feedback(HashMap<String, AggregateRecord>),
    /// The proposer checks its own work
    SelfCheck,
}

pub struct Refiner {
    agent: Agent,
    mode: RefineMode,
}

impl Refiner {
    pub fn with_feedback(agent: Agent, aggregates: HashMap<String, AggregateRecord>) -> Self {
        Self {
            agent,
            mode: RefineMode::Feedback(aggregates),
        }
    }

    pub fn self_check(agent: Agent) -> Self {
        Self {
            agent,
            mode: RefineMode::SelfCheck,
        }
    }

    async fn rewrite(
        &self,
        solution: &SolutionRecord,
        messages: Vec<crate::client::Message>,
    ) -> Result<SolutionRecord, ItemError> {
        let raw = self.agent.complete(messages).await?;
        let text = require_text(&raw).map_err(|_| ItemError::EmptyReply)?;
        Ok(solution.revised(text, self.agent.name()))
    }
}

#[async_trait]
impl StageOperation for Refiner {
    type Input = SolutionRecord;
    type Output = SolutionRecord;

    fn stage(&self) -> &str {
        match self.mode {
            RefineMode::Feedback(_) => "refine",
            RefineMode::SelfCheck => "self-check",
        }
    }

    fn actor(&self) -> &str {
        self.agent.name()
    }

    fn needs_call(&self, solution: &SolutionRecord) -> bool {
        match &self.mode {
            RefineMode::Feedback(aggregates) => {
                !solution.no_mistakes
                    && aggregates
                        .get(&solution.id)
                        .is_some_and(|a| !a.mistakes.is_empty())
            }
            RefineMode::SelfCheck => true,
        }
    }

    async fn process(&self, solution: &SolutionRecord) -> Result<SolutionRecord, ItemError> {
        match &self.mode {
            RefineMode::SelfCheck => self.rewrite(solution, prompts::self_check(solution)).await,
            RefineMode::Feedback(aggregates) => {
                if solution.no_mistakes {
                    return Ok(solution.clone());
                }
                let aggregate = aggregates
                    .get(&solution.id)
                    .ok_or_else(|| ItemError::MissingAggregate(solution.id.clone()))?;

                if aggregate.mistakes.is_empty() {
                    debug!(problem_id = %solution.id, "No mistakes, carrying solution forward");
                    return Ok(solution.carried_forward());
                }

                debug!(
                    problem_id = %solution.id,
                    mistakes = aggregate.mistakes.len(),
                    "Refining with feedback"
                );
                self.rewrite(solution, prompts::refine(solution, &aggregate.mistakes))
                    .await
            }
        }
    }
}
