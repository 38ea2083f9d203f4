//! Proposer agent: writes a first solution for each problem.
//!
//! Epistemic foundation:
//! - K_i: One solution per problem per proposer store
//! - B_i: Generation may fail → counted by the runner, retried on re-run

use crate::agents::{Agent, prompts};
use crate::interpret::require_text;
use crate::models::{ItemError, ProblemRecord, SolutionRecord};
use crate::pipeline::StageOperation;
use async_trait::async_trait;
use tracing::debug;

pub struct Proposer {
    agent: Agent,
}

impl Proposer {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StageOperation for Proposer {
    type Input = ProblemRecord;
    type Output = SolutionRecord;

    fn stage(&self) -> &str {
        "propose"
    }

    fn actor(&self) -> &str {
        self.agent.name()
    }

    async fn process(&self, problem: &ProblemRecord) -> Result<SolutionRecord, ItemError> {
        let raw = self.agent.complete(prompts::propose(&problem.problem)).await?;
        let solution = require_text(&raw).map_err(|_| ItemError::EmptyReply)?;
        debug!(problem_id = %problem.id, chars = solution.len(), "Solution proposed");
        Ok(SolutionRecord::proposed(problem, solution, self.agent.name()))
    }
}
