//! Evaluator: grades a solution against the reference solution steps.
//!
//! Epistemic foundation:
//! - K_i: Rubric scores in [1, 5], overall correctness in [0, 10]
//! - K_i: Items without a solution or reference steps are not gradeable
//! - B_i: The grader echoes the right problem id (mismatch is logged, tolerated)

use crate::agents::{Agent, prompts};
use crate::models::{Evaluation, EvaluationRecord, ItemError, SolutionRecord};
use crate::pipeline::StageOperation;
use async_trait::async_trait;
use tracing::debug;

pub struct Evaluator {
    agent: Agent,
}

impl Evaluator {
    pub fn new(agent: Agent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StageOperation for Evaluator {
    type Input = SolutionRecord;
    type Output = EvaluationRecord;

    fn stage(&self) -> &str {
        "evaluate"
    }

    fn actor(&self) -> &str {
        self.agent.name()
    }

    fn accepts(&self, solution: &SolutionRecord) -> bool {
        solution.is_gradeable()
    }

    async fn process(&self, solution: &SolutionRecord) -> Result<EvaluationRecord, ItemError> {
        let evaluation: Evaluation = self
            .agent
            .ask(prompts::evaluate(solution), &solution.id)
            .await?;

        debug!(
            problem_id = %solution.id,
            overall = evaluation.overall_correctness,
            "Solution graded"
        );

        Ok(EvaluationRecord {
            solution: solution.clone(),
            evaluation,
            evaluator: self.agent.name().to_string(),
        })
    }
}
