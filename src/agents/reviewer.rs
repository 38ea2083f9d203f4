//! Reviewer agent: scores one solution on six categories and lists mistakes.
//!
//! Epistemic foundation:
//! - K_i: Scores are in [0, 10] or the review is rejected
//! - K_i: `final_score` is the category-weighted sum of this reviewer's scores
//! - K_i: Terminal solutions are not re-reviewed

use crate::agents::{Agent, prompts};
use crate::models::{CategoryWeights, ItemError, ReviewRecord, ReviewScores, SolutionRecord};
use crate::pipeline::StageOperation;
use async_trait::async_trait;
use tracing::debug;

pub struct Reviewer {
    agent: Agent,
    weights: CategoryWeights,
}

impl Reviewer {
    pub fn new(agent: Agent, weights: CategoryWeights) -> Self {
        Self { agent, weights }
    }
}

#[async_trait]
impl StageOperation for Reviewer {
    type Input = SolutionRecord;
    type Output = ReviewRecord;

    fn stage(&self) -> &str {
        "review"
    }

    fn actor(&self) -> &str {
        self.agent.name()
    }

    fn accepts(&self, solution: &SolutionRecord) -> bool {
        !solution.no_mistakes
    }

    async fn process(&self, solution: &SolutionRecord) -> Result<ReviewRecord, ItemError> {
        let scores: ReviewScores = self
            .agent
            .ask(prompts::review(solution), &solution.id)
            .await?;

        let record = ReviewRecord::new(&solution.id, self.agent.name(), scores, &self.weights);
        debug!(
            problem_id = %solution.id,
            reviewer = %self.agent.name(),
            final_score = record.final_score,
            mistakes = record.scores.mistake_count(),
            "Review recorded"
        );
        Ok(record)
    }
}
