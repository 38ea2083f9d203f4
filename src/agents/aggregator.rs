//! Cross-rater score aggregation.
//!
//! Epistemic foundation:
//! - K_i: Rater weights are static and sum to 1
//! - K_i: A missing review is a lookup error, never a zero
//! - B_i(single rater) → B_i(HIGH) via weighted consensus

use crate::models::{Category, ConfigError, ItemError, ReviewRecord, WeightedScores};
use std::collections::{BTreeMap, HashMap};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Weighted combination of fixed raters.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    raters: Vec<(String, f64)>,
}

impl ScoreAggregator {
    /// Build from rater names and weights in the same order.
    pub fn new(raters: Vec<(String, f64)>) -> Result<Self, ConfigError> {
        if raters.is_empty() {
            return Err(ConfigError::InvalidWeights("no raters".to_string()));
        }
        let total: f64 = raters.iter().map(|(_, w)| w).sum();
        if raters.iter().any(|(_, w)| *w < 0.0) || (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::InvalidWeights(format!(
                "rater weights must be non-negative and sum to 1 (got {total:.4})"
            )));
        }
        Ok(Self { raters })
    }

    /// Equal weights for every rater.
    pub fn equal(names: Vec<String>) -> Result<Self, ConfigError> {
        let weight = 1.0 / names.len().max(1) as f64;
        Self::new(names.into_iter().map(|n| (n, weight)).collect())
    }

    pub fn raters(&self) -> impl Iterator<Item = &str> {
        self.raters.iter().map(|(n, _)| n.as_str())
    }

    /// `Σ w_i · s_i` for the final score and for each category.
    pub fn aggregate(
        &self,
        problem_id: &str,
        reviews: &HashMap<&str, &ReviewRecord>,
    ) -> Result<WeightedScores, ItemError> {
        let mut final_score = 0.0;
        let mut categories: BTreeMap<String, f64> = Category::ALL
            .iter()
            .map(|c| (c.score_field().to_string(), 0.0))
            .collect();

        for (rater, weight) in &self.raters {
            let review = reviews
                .get(rater.as_str())
                .ok_or_else(|| ItemError::MissingReview {
                    reviewer: rater.clone(),
                    problem_id: problem_id.to_string(),
                })?;

            final_score += weight * review.final_score;
            for category in Category::ALL {
                if let Some(total) = categories.get_mut(category.score_field()) {
                    *total += weight * review.scores.score(category);
                }
            }
        }

        Ok(WeightedScores {
            final_score,
            categories,
        })
    }
}
