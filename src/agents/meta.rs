//! Meta-reviewer: reduces every reviewer's findings to one list of real mistakes.
//!
//! Epistemic foundation:
//! - K_i: Every configured reviewer must have reviewed the item
//! - K_i: All reviewers clean → empty list, no model call
//! - B_i(reviewers disagree) → one model decides which findings are real
//!
//! With no reviewers configured this is a single-agent review: the model
//! lists mistakes directly from the solution.

use crate::agents::{Agent, ScoreAggregator, prompts};
use crate::models::{AggregateRecord, ItemError, MistakeList, ReviewRecord, SolutionRecord};
use crate::pipeline::StageOperation;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Reviews by one reviewer, keyed by problem identifier.
pub type ReviewIndex = HashMap<String, ReviewRecord>;

pub struct MetaReviewer {
    agent: Agent,
    reviews: Vec<(String, ReviewIndex)>,
    aggregator: Option<ScoreAggregator>,
}

impl MetaReviewer {
    /// Consolidate the reviews of `reviews` (in configured order).
    pub fn consolidating(
        agent: Agent,
        reviews: Vec<(String, ReviewIndex)>,
        aggregator: ScoreAggregator,
    ) -> Self {
        Self {
            agent,
            reviews,
            aggregator: Some(aggregator),
        }
    }

    /// Review alone, without upstream reviewers.
    pub fn single(agent: Agent) -> Self {
        Self {
            agent,
            reviews: Vec::new(),
            aggregator: None,
        }
    }

    fn is_single(&self) -> bool {
        self.reviews.is_empty()
    }

    /// Every reviewer's record for `problem_id`, in configured order.
    fn collect(&self, problem_id: &str) -> Result<Vec<&ReviewRecord>, ItemError> {
        self.reviews
            .iter()
            .map(|(reviewer, index)| {
                index.get(problem_id).ok_or_else(|| ItemError::MissingReview {
                    reviewer: reviewer.clone(),
                    problem_id: problem_id.to_string(),
                })
            })
            .collect()
    }

    async fn consolidate(
        &self,
        solution: &SolutionRecord,
        reviews: &[&ReviewRecord],
    ) -> Result<Vec<String>, ItemError> {
        if reviews.iter().all(|r| r.scores.mistake_count() == 0) {
            debug!(problem_id = %solution.id, "All reviewers clean, skipping meta-review call");
            return Ok(Vec::new());
        }
        let reply: MistakeList = self
            .agent
            .ask(prompts::meta_review(solution, reviews), &solution.id)
            .await?;
        Ok(reply.mistakes)
    }
}

fn clean(mistakes: Vec<String>) -> Vec<String> {
    mistakes
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

#[async_trait]
impl StageOperation for MetaReviewer {
    type Input = SolutionRecord;
    type Output = AggregateRecord;

    fn stage(&self) -> &str {
        if self.is_single() {
            "single-review"
        } else {
            "meta-review"
        }
    }

    fn actor(&self) -> &str {
        self.agent.name()
    }

    fn accepts(&self, solution: &SolutionRecord) -> bool {
        !solution.no_mistakes
    }

    fn needs_call(&self, solution: &SolutionRecord) -> bool {
        self.is_single()
            || self.reviews.iter().any(|(_, index)| {
                index
                    .get(&solution.id)
                    .is_none_or(|r| r.scores.mistake_count() > 0)
            })
    }

    async fn process(&self, solution: &SolutionRecord) -> Result<AggregateRecord, ItemError> {
        let (mistakes, weighted) = if self.is_single() {
            let reply: MistakeList = self
                .agent
                .ask(prompts::single_review(solution), &solution.id)
                .await?;
            (reply.mistakes, None)
        } else {
            let reviews = self.collect(&solution.id)?;
            let weighted = match &self.aggregator {
                Some(aggregator) => {
                    let by_reviewer: HashMap<&str, &ReviewRecord> = self
                        .reviews
                        .iter()
                        .map(|(name, _)| name.as_str())
                        .zip(reviews.iter().copied())
                        .collect();
                    Some(aggregator.aggregate(&solution.id, &by_reviewer)?)
                }
                None => None,
            };
            (self.consolidate(solution, &reviews).await?, weighted)
        };

        let mistakes = clean(mistakes);
        debug!(
            problem_id = %solution.id,
            mistakes = mistakes.len(),
            "Findings consolidated"
        );

        Ok(AggregateRecord {
            id: solution.id.clone(),
            mistakes,
            meta_reviewer: self.agent.name().to_string(),
            weighted,
        })
    }
}
