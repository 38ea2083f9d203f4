//! Message builders for every agent role.

use crate::client::Message;
use crate::models::{Category, ReviewRecord, SolutionRecord};

const PHYSICS_EXPERT: &str =
    "You are an expert on Physics. You are tasked to review the solutions to some problems.";

const CRITERIA: &str = "\
Score the solution on the following criteria:
- Accuracy of calculations (calculation_accuracy_score): are the numbers correct given the formulas used?
- Correctness of formulas and principles (formula_correctness_score): are the right physics concepts applied?
- Logical consistency (logical_consistency_score): does the reasoning flow correctly from one step to the next?
- Completeness (completeness_score): does it address every part of the question?
- Assumptions made (assumption_validity_score): are new assumptions introduced, and are they reasonable?
- Clarity and coherence (clarity_and_coherence_score): is the explanation clear and easy to follow?

Each score must be between 0 and 10. For each criterion, list the mistakes you found \
(calculation_mistakes, formula_mistakes, logical_mistakes, incomplete_requirements, \
mistaken_assumptions, incoherent_statements). Use an empty list when there are none.
Respond with a single JSON object.";

/// Opening turn shared by the proposer, refiner and self-check.
pub fn solve(problem: &str) -> Message {
    Message::user(format!(
        "You are an expert on Physics. You solve problems step by step while maintaining \
         logical consistency. Solve the following Physics problem: {problem}\n\
         Write all equations in LaTeX."
    ))
}

pub fn propose(problem: &str) -> Vec<Message> {
    vec![solve(problem)]
}

pub fn review(solution: &SolutionRecord) -> Vec<Message> {
    vec![
        Message::system(PHYSICS_EXPERT),
        Message::user(format!(
            "Problem: {}\n\nSolution: {}\n\nIs this solution correct? If there are any \
             mathematical or logical mistakes, point them out briefly.\n\n{CRITERIA}",
            solution.problem, solution.ai_solution
        )),
    ]
}

const MISTAKE_GUIDE: &str = "\
Consider the accuracy of calculations, the correctness of formulas and principles, \
logical consistency, completeness, the validity of assumptions, and clarity. \
Only list mistakes that are real and that change the correctness of the solution. \
Merge duplicates. If the solution is correct, return an empty list.
Respond with a JSON object of the form {\"mistakes\": [\"...\"]}.";

/// Meta-review: consolidate every reviewer's findings.
pub fn meta_review(solution: &SolutionRecord, reviews: &[&ReviewRecord]) -> Vec<Message> {
    let mut prompt = format!(
        "Problem: {}\n\nI had an LLM generate a solution to this. Solution: {}\n\n\
         I had {} other LLMs review this solution and point out any mistakes. \
         Decide which of the reported mistakes are real.\n\n{MISTAKE_GUIDE}\n\n",
        solution.problem,
        solution.ai_solution,
        reviews.len()
    );
    for review in reviews {
        prompt.push_str(&format!("{} had the following review:\n", review.reviewer));
        for category in Category::ALL {
            let mistakes = review.scores.mistakes(category);
            prompt.push_str(&format!(
                "  {} = {}; {} = {:?}\n",
                category.score_field(),
                review.scores.score(category),
                category.mistakes_field(),
                mistakes
            ));
        }
        prompt.push('\n');
    }
    vec![Message::system(PHYSICS_EXPERT), Message::user(prompt)]
}

/// Single-agent review: one model lists the mistakes directly.
pub fn single_review(solution: &SolutionRecord) -> Vec<Message> {
    vec![
        Message::system(PHYSICS_EXPERT),
        Message::user(format!(
            "Problem: {}\n\nI had an LLM generate a solution to this. Solution: {}\n\n\
             Point out the mistakes in this solution.\n\n{MISTAKE_GUIDE}",
            solution.problem, solution.ai_solution
        )),
    ]
}

/// Refinement with consolidated feedback.
pub fn refine(solution: &SolutionRecord, mistakes: &[String]) -> Vec<Message> {
    vec![
        solve(&solution.problem),
        Message::assistant(solution.ai_solution.clone()),
        Message::user(format!(
            "I have some feedback. {} After taking this into account, please generate the \
             solution once again. Remember to write all equations in LaTeX.",
            mistakes.join(" ")
        )),
    ]
}

/// Self-refinement without reviewers.
pub fn self_check(solution: &SolutionRecord) -> Vec<Message> {
    vec![
        solve(&solution.problem),
        Message::assistant(solution.ai_solution.clone()),
        Message::user(
            "You are a Physics Professor. Outline the physics principles of the given problem, \
             check your own answer for any mistakes, then answer again.",
        ),
    ]
}

const RUBRIC: &str = "\
Evaluate the AI-generated solution on these categories:
1. mathematical_accuracy (1-5): are calculations, numerical answers and units correct?
2. logical_consistency (1-5): does the solution progress step by step with sound reasoning?
3. completeness (1-5): are all parts of the problem addressed and answered?
4. clarity_and_coherence (1-5): is the explanation clear, concise and well structured?
5. formulas_principles (1-5): are the right physical formulas and principles chosen and applied?
6. assumptions_made (1-5): are assumptions stated, justified and reasonable?
7. overall_correctness (0-10): how sound are the approach and final answer overall?

Be strict. Use the reference steps to check the AI solution, but judge the AI solution on \
its own merits where it takes a different valid route.
Respond with a single JSON object with the keys problem_id, mathematical_accuracy, \
logical_consistency, completeness, clarity_and_coherence, formulas_principles, \
assumptions_made and overall_correctness.";

/// Grade a solution against the reference steps.
pub fn evaluate(solution: &SolutionRecord) -> Vec<Message> {
    let reference = match &solution.elaborated_solution_steps {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    vec![Message::user(format!(
        "You are an expert physics problem evaluator.\n\n{RUBRIC}\n\n\
         Problem ID: {}\n\nProblem:\n{}\n\nReference solution steps:\n{}\n\n\
         AI-generated solution:\n{}",
        solution.id, solution.problem, reference, solution.ai_solution
    ))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn solution() -> SolutionRecord {
        SolutionRecord {
            id: "P1".into(),
            problem: "Find the period of a 2 m pendulum.".into(),
            ai_solution: "T = 2 pi sqrt(L/g) = 2.84 s".into(),
            elaborated_solution_steps: Value::String("T = 2.84 s".into()),
            no_mistakes: false,
            model: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_refine_replays_prior_solution() {
        let messages = refine(&solution(), &["g is 9.8".into(), "units".into()]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, solution().ai_solution);
        assert!(messages[2].content.contains("g is 9.8 units"));
    }

    #[test]
    fn test_evaluate_includes_reference_and_id() {
        let messages = evaluate(&solution());
        assert!(messages[0].content.contains("Problem ID: P1"));
        assert!(messages[0].content.contains("T = 2.84 s"));
    }
}
