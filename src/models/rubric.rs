//! Scoring rubrics: review categories, score ranges, and the reply shapes
//! that raters must produce.
//!
//! K_i: Every bounded score has a declared inclusive range.
//! K_i: Out-of-range scores are rejected, never clamped.

use crate::interpret::StructuredReply;
use crate::models::InterpretError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Inclusive numeric range for a score field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    /// Reviewer category scores.
    pub const REVIEW: Self = Self { min: 0.0, max: 10.0 };
    /// Grading rubric category scores.
    pub const RUBRIC: Self = Self { min: 1.0, max: 5.0 };
    /// Grading rubric overall correctness.
    pub const OVERALL: Self = Self { min: 0.0, max: 10.0 };

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && (self.min..=self.max).contains(&value)
    }

    /// Reject `value` if it falls outside the range.
    pub fn check(&self, field: &str, value: f64) -> Result<(), InterpretError> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(InterpretError::OutOfRange {
                field: field.to_string(),
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Review category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    CalculationAccuracy,
    FormulaCorrectness,
    LogicalConsistency,
    Completeness,
    AssumptionValidity,
    ClarityAndCoherence,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::CalculationAccuracy,
        Category::FormulaCorrectness,
        Category::LogicalConsistency,
        Category::Completeness,
        Category::AssumptionValidity,
        Category::ClarityAndCoherence,
    ];

    /// Name of the score field in a review record.
    pub fn score_field(self) -> &'static str {
        match self {
            Self::CalculationAccuracy => "calculation_accuracy_score",
            Self::FormulaCorrectness => "formula_correctness_score",
            Self::LogicalConsistency => "logical_consistency_score",
            Self::Completeness => "completeness_score",
            Self::AssumptionValidity => "assumption_validity_score",
            Self::ClarityAndCoherence => "clarity_and_coherence_score",
        }
    }

    /// Name of the mistake-list field in a review record.
    pub fn mistakes_field(self) -> &'static str {
        match self {
            Self::CalculationAccuracy => "calculation_mistakes",
            Self::FormulaCorrectness => "formula_mistakes",
            Self::LogicalConsistency => "logical_mistakes",
            Self::Completeness => "incomplete_requirements",
            Self::AssumptionValidity => "mistaken_assumptions",
            Self::ClarityAndCoherence => "incoherent_statements",
        }
    }
}

/// Per-category weights used to fold one reviewer's scores into `final_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryWeights {
    #[serde(default = "default_calculation_weight")]
    pub calculation_accuracy: f64,
    #[serde(default = "default_formula_weight")]
    pub formula_correctness: f64,
    #[serde(default = "default_logic_weight")]
    pub logical_consistency: f64,
    #[serde(default = "default_completeness_weight")]
    pub completeness: f64,
    #[serde(default = "default_minor_weight")]
    pub assumption_validity: f64,
    #[serde(default = "default_minor_weight")]
    pub clarity_and_coherence: f64,
}

fn default_calculation_weight() -> f64 {
    0.30
}

fn default_formula_weight() -> f64 {
    0.25
}

fn default_logic_weight() -> f64 {
    0.25
}

fn default_completeness_weight() -> f64 {
    0.10
}

fn default_minor_weight() -> f64 {
    0.05
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            calculation_accuracy: default_calculation_weight(),
            formula_correctness: default_formula_weight(),
            logical_consistency: default_logic_weight(),
            completeness: default_completeness_weight(),
            assumption_validity: default_minor_weight(),
            clarity_and_coherence: default_minor_weight(),
        }
    }
}

impl CategoryWeights {
    pub fn weight(&self, category: Category) -> f64 {
        match category {
            Category::CalculationAccuracy => self.calculation_accuracy,
            Category::FormulaCorrectness => self.formula_correctness,
            Category::LogicalConsistency => self.logical_consistency,
            Category::Completeness => self.completeness,
            Category::AssumptionValidity => self.assumption_validity,
            Category::ClarityAndCoherence => self.clarity_and_coherence,
        }
    }

    pub fn total(&self) -> f64 {
        Category::ALL.iter().map(|c| self.weight(*c)).sum()
    }

    pub fn is_valid(&self) -> bool {
        Category::ALL.iter().all(|c| self.weight(*c) >= 0.0) && (self.total() - 1.0).abs() < 1e-6
    }
}

/// Structured payload produced by one reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewScores {
    pub calculation_accuracy_score: f64,
    pub calculation_mistakes: Vec<String>,
    pub formula_correctness_score: f64,
    pub formula_mistakes: Vec<String>,
    pub logical_consistency_score: f64,
    pub logical_mistakes: Vec<String>,
    pub completeness_score: f64,
    pub incomplete_requirements: Vec<String>,
    pub assumption_validity_score: f64,
    pub mistaken_assumptions: Vec<String>,
    pub clarity_and_coherence_score: f64,
    pub incoherent_statements: Vec<String>,
}

impl ReviewScores {
    pub fn score(&self, category: Category) -> f64 {
        match category {
            Category::CalculationAccuracy => self.calculation_accuracy_score,
            Category::FormulaCorrectness => self.formula_correctness_score,
            Category::LogicalConsistency => self.logical_consistency_score,
            Category::Completeness => self.completeness_score,
            Category::AssumptionValidity => self.assumption_validity_score,
            Category::ClarityAndCoherence => self.clarity_and_coherence_score,
        }
    }

    pub fn mistakes(&self, category: Category) -> &[String] {
        match category {
            Category::CalculationAccuracy => &self.calculation_mistakes,
            Category::FormulaCorrectness => &self.formula_mistakes,
            Category::LogicalConsistency => &self.logical_mistakes,
            Category::Completeness => &self.incomplete_requirements,
            Category::AssumptionValidity => &self.mistaken_assumptions,
            Category::ClarityAndCoherence => &self.incoherent_statements,
        }
    }

    /// Total number of reported mistakes across all categories.
    pub fn mistake_count(&self) -> usize {
        Category::ALL.iter().map(|c| self.mistakes(*c).len()).sum()
    }

    /// Category-weighted score of this review.
    pub fn weighted_total(&self, weights: &CategoryWeights) -> f64 {
        Category::ALL
            .iter()
            .map(|c| weights.weight(*c) * self.score(*c))
            .sum()
    }
}

impl StructuredReply for ReviewScores {
    const NAME: &'static str = "review";

    fn schema() -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for category in Category::ALL {
            properties.insert(
                category.score_field().to_string(),
                json!({ "type": "number", "minimum": 0, "maximum": 10 }),
            );
            properties.insert(
                category.mistakes_field().to_string(),
                json!({ "type": "array", "items": { "type": "string" } }),
            );
            required.push(category.score_field());
            required.push(category.mistakes_field());
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    fn validate(&self) -> Result<(), InterpretError> {
        for category in Category::ALL {
            ScoreRange::REVIEW.check(category.score_field(), self.score(category))?;
        }
        Ok(())
    }
}

/// Consolidated list of mistakes (meta-review or single-agent review).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MistakeList {
    pub mistakes: Vec<String>,
}

impl StructuredReply for MistakeList {
    const NAME: &'static str = "mistakes";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "mistakes": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["mistakes"],
            "additionalProperties": false,
        })
    }

    fn validate(&self) -> Result<(), InterpretError> {
        Ok(())
    }
}

/// Weighted combination of several reviewers' scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedScores {
    /// Weighted mean of each reviewer's `final_score`
    pub final_score: f64,
    /// Weighted mean per category, keyed by score field name
    pub categories: BTreeMap<String, f64>,
}

/// Grading payload against the reference solution steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub problem_id: String,
    pub mathematical_accuracy: f64,
    pub logical_consistency: f64,
    pub completeness: f64,
    pub clarity_and_coherence: f64,
    pub formulas_principles: f64,
    pub assumptions_made: f64,
    pub overall_correctness: f64,
}

impl Evaluation {
    const RUBRIC_FIELDS: [&'static str; 6] = [
        "mathematical_accuracy",
        "logical_consistency",
        "completeness",
        "clarity_and_coherence",
        "formulas_principles",
        "assumptions_made",
    ];

    fn rubric_scores(&self) -> [f64; 6] {
        [
            self.mathematical_accuracy,
            self.logical_consistency,
            self.completeness,
            self.clarity_and_coherence,
            self.formulas_principles,
            self.assumptions_made,
        ]
    }
}

impl StructuredReply for Evaluation {
    const NAME: &'static str = "evaluation";

    fn schema() -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert("problem_id".to_string(), json!({ "type": "string" }));
        for field in Self::RUBRIC_FIELDS {
            properties.insert(
                field.to_string(),
                json!({ "type": "number", "minimum": 1, "maximum": 5 }),
            );
        }
        properties.insert(
            "overall_correctness".to_string(),
            json!({ "type": "number", "minimum": 0, "maximum": 10 }),
        );
        let mut required: Vec<&str> = vec!["problem_id"];
        required.extend(Self::RUBRIC_FIELDS);
        required.push("overall_correctness");
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    fn validate(&self) -> Result<(), InterpretError> {
        for (field, value) in Self::RUBRIC_FIELDS.iter().zip(self.rubric_scores()) {
            ScoreRange::RUBRIC.check(field, value)?;
        }
        ScoreRange::OVERALL.check("overall_correctness", self.overall_correctness)
    }

    fn reported_id(&self) -> Option<&str> {
        Some(&self.problem_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(value: f64) -> ReviewScores {
        ReviewScores {
            calculation_accuracy_score: value,
            calculation_mistakes: vec![],
            formula_correctness_score: value,
            formula_mistakes: vec![],
            logical_consistency_score: value,
            logical_mistakes: vec![],
            completeness_score: value,
            incomplete_requirements: vec![],
            assumption_validity_score: value,
            mistaken_assumptions: vec![],
            clarity_and_coherence_score: value,
            incoherent_statements: vec![],
        }
    }

    #[test]
    fn test_default_category_weights_sum_to_one() {
        let weights = CategoryWeights::default();
        assert!((weights.total() - 1.0).abs() < 1e-12);
        assert!(weights.is_valid());
    }

    #[test]
    fn test_weighted_total_uses_category_weights() {
        let mut review = scores(10.0);
        review.calculation_accuracy_score = 0.0;
        // Losing the 0.30 calculation weight drops 3 points
        let total = review.weighted_total(&CategoryWeights::default());
        assert!((total - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        assert!(ScoreRange::REVIEW.check("x", 0.0).is_ok());
        assert!(ScoreRange::REVIEW.check("x", 10.0).is_ok());
        assert!(ScoreRange::REVIEW.check("x", 10.5).is_err());
        assert!(ScoreRange::RUBRIC.check("x", 0.0).is_err());
        assert!(ScoreRange::RUBRIC.check("x", 5.0).is_ok());
    }

    #[test]
    fn test_review_with_out_of_range_score_is_rejected() {
        let mut review = scores(5.0);
        review.completeness_score = 11.0;
        match review.validate() {
            Err(InterpretError::OutOfRange { field, .. }) => {
                assert_eq!(field, "completeness_score")
            }
            other => panic!("expected out of range, got {other:?}"),
        }
    }

    #[test]
    fn test_mistake_count_spans_categories() {
        let mut review = scores(5.0);
        review.formula_mistakes = vec!["wrong sign".into()];
        review.incoherent_statements = vec!["a".into(), "b".into()];
        assert_eq!(review.mistake_count(), 3);
        assert_eq!(review.mistakes(Category::ClarityAndCoherence).len(), 2);
    }

    #[test]
    fn test_schema_lists_every_review_field() {
        let schema = ReviewScores::schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 12);
        assert_eq!(
            schema["properties"]["completeness_score"]["maximum"],
            json!(10)
        );
    }

    /// Strict structured output rejects schemas that allow extra keys or
    /// leave a property optional.
    #[test]
    fn test_schemas_are_closed_and_fully_required() {
        for schema in [
            ReviewScores::schema(),
            MistakeList::schema(),
            Evaluation::schema(),
        ] {
            assert_eq!(schema["additionalProperties"], json!(false));
            let properties = schema["properties"].as_object().unwrap();
            let required: Vec<&str> = schema["required"]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(Value::as_str)
                .collect();
            assert_eq!(required.len(), properties.len());
            for key in properties.keys() {
                assert!(required.contains(&key.as_str()), "{key} not required");
            }
        }
    }

    #[test]
    fn test_evaluation_overall_allows_zero_but_rubric_does_not() {
        let mut eval = Evaluation {
            problem_id: "P1".into(),
            mathematical_accuracy: 3.0,
            logical_consistency: 3.0,
            completeness: 3.0,
            clarity_and_coherence: 3.0,
            formulas_principles: 3.0,
            assumptions_made: 3.0,
            overall_correctness: 0.0,
        };
        assert!(eval.validate().is_ok());
        eval.assumptions_made = 0.0;
        assert!(eval.validate().is_err());
    }
}
