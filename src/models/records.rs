//! Record types flowing between stages.
//!
//! K_i: Every stored record carries `Problem_ID`.
//! K_i: Fields this crate does not know about are carried through untouched.

use super::rubric::{CategoryWeights, Evaluation, ReviewScores, WeightedScores};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// `Problem_ID` given as a string or a bare number.
fn problem_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "Problem_ID must be a string or number, got {other}"
        ))),
    }
}

/// Anything stored under a problem identifier.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Input physics problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemRecord {
    #[serde(rename = "Problem_ID", deserialize_with = "problem_id")]
    pub id: String,

    /// Problem statement
    pub problem: String,

    /// Reference solution steps, used only as grading context
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub elaborated_solution_steps: Value,

    /// Everything else (e.g. difficulty) passes through
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Candidate solution for one problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    #[serde(rename = "Problem_ID", deserialize_with = "problem_id")]
    pub id: String,

    pub problem: String,

    /// Generated solution text
    pub ai_solution: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub elaborated_solution_steps: Value,

    /// Terminal marker: reviewers found nothing left to fix
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_mistakes: bool,

    /// Proposer model that wrote `ai_solution`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SolutionRecord {
    /// Fresh proposal for `problem`.
    pub fn proposed(problem: &ProblemRecord, solution: String, model: &str) -> Self {
        Self {
            id: problem.id.clone(),
            problem: problem.problem.clone(),
            ai_solution: solution,
            elaborated_solution_steps: problem.elaborated_solution_steps.clone(),
            no_mistakes: false,
            model: Some(model.to_string()),
            extra: problem.extra.clone(),
        }
    }

    /// Same problem, new solution text.
    pub fn revised(&self, solution: String, model: &str) -> Self {
        Self {
            ai_solution: solution,
            no_mistakes: false,
            model: Some(model.to_string()),
            ..self.clone()
        }
    }

    /// Unchanged solution marked terminal.
    pub fn carried_forward(&self) -> Self {
        Self {
            no_mistakes: true,
            ..self.clone()
        }
    }

    /// Whether this solution has both a solution and reference steps to grade against.
    pub fn is_gradeable(&self) -> bool {
        let has_reference = match &self.elaborated_solution_steps {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            _ => true,
        };
        has_reference && !self.ai_solution.trim().is_empty()
    }
}

/// One reviewer's verdict on one solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(rename = "Problem_ID", deserialize_with = "problem_id")]
    pub id: String,

    /// Reviewer model identity
    pub reviewer: String,

    #[serde(flatten)]
    pub scores: ReviewScores,

    /// Category-weighted sum of this reviewer's scores
    pub final_score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ReviewRecord {
    pub fn new(id: &str, reviewer: &str, scores: ReviewScores, weights: &CategoryWeights) -> Self {
        let final_score = scores.weighted_total(weights);
        Self {
            id: id.to_string(),
            reviewer: reviewer.to_string(),
            scores,
            final_score,
            reviewed_at: Some(Utc::now()),
        }
    }
}

/// Consolidated verdict for one solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    #[serde(rename = "Problem_ID", deserialize_with = "problem_id")]
    pub id: String,

    /// Deduplicated real mistakes; empty means the solution is terminal
    pub mistakes: Vec<String>,

    /// Meta-reviewer model identity
    pub meta_reviewer: String,

    /// Weighted reviewer scores, when reviewers contributed any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted: Option<WeightedScores>,
}

/// Solution plus its rubric grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    #[serde(flatten)]
    pub solution: SolutionRecord,

    pub evaluation: Evaluation,

    /// Grading model identity
    pub evaluator: String,
}

impl Keyed for ProblemRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for SolutionRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for ReviewRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for AggregateRecord {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for EvaluationRecord {
    fn key(&self) -> &str {
        &self.solution.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn problem() -> ProblemRecord {
        serde_json::from_value(json!({
            "Problem_ID": "P1",
            "problem": "A ball is dropped from 20 m. How long until it lands?",
            "elaborated_solution_steps": ["h = g t^2 / 2", "t = 2.02 s"],
            "problem_difficulty": "easy"
        }))
        .unwrap()
    }

    #[test]
    fn test_extra_fields_pass_through() {
        let p = problem();
        assert_eq!(p.extra["problem_difficulty"], json!("easy"));

        let solution = SolutionRecord::proposed(&p, "t = 2 s".into(), "qwen");
        let value = serde_json::to_value(&solution).unwrap();
        assert_eq!(value["Problem_ID"], json!("P1"));
        assert_eq!(value["problem_difficulty"], json!("easy"));
        assert!(value.get("no_mistakes").is_none());
    }

    #[test]
    fn test_carried_forward_keeps_text() {
        let solution = SolutionRecord::proposed(&problem(), "t = 2.02 s".into(), "qwen");
        let copy = solution.carried_forward();
        assert!(copy.no_mistakes);
        assert_eq!(copy.ai_solution, solution.ai_solution);
        assert_eq!(serde_json::to_value(&copy).unwrap()["no_mistakes"], json!(true));
    }

    #[test]
    fn test_revised_clears_terminal_flag() {
        let solution = SolutionRecord::proposed(&problem(), "t = 3 s".into(), "qwen").carried_forward();
        let revised = solution.revised("t = 2.02 s".into(), "llama");
        assert!(!revised.no_mistakes);
        assert_eq!(revised.model.as_deref(), Some("llama"));
    }

    #[test]
    fn test_gradeable_requires_reference_and_solution() {
        let mut solution = SolutionRecord::proposed(&problem(), "t = 2.02 s".into(), "qwen");
        assert!(solution.is_gradeable());
        solution.elaborated_solution_steps = json!([]);
        assert!(!solution.is_gradeable());
        solution.elaborated_solution_steps = json!("step");
        solution.ai_solution = "  ".into();
        assert!(!solution.is_gradeable());
    }

    #[test]
    fn test_review_record_is_flat() {
        let record: ReviewRecord = serde_json::from_value(json!({
            "Problem_ID": "P1",
            "reviewer": "llama",
            "calculation_accuracy_score": 8,
            "calculation_mistakes": [],
            "formula_correctness_score": 9,
            "formula_mistakes": [],
            "logical_consistency_score": 7,
            "logical_mistakes": ["skips a step"],
            "completeness_score": 10,
            "incomplete_requirements": [],
            "assumption_validity_score": 10,
            "mistaken_assumptions": [],
            "clarity_and_coherence_score": 10,
            "incoherent_statements": [],
            "final_score": 8.5
        }))
        .unwrap();
        assert_eq!(record.key(), "P1");
        assert_eq!(record.scores.mistake_count(), 1);
        assert!(record.reviewed_at.is_none());
    }
}
