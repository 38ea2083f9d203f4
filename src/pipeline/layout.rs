//! Store layout under the output directory.
//!
//! ```text
//! <dir>/solutions/proposed_by_<model>.jsonl
//! <dir>/solutions/refined_r<k>_by_<model>.jsonl
//! <dir>/solutions/self_refined_by_<model>.jsonl
//! <dir>/reviews/r<k>/review_of_<model>_by_<reviewer>.jsonl
//! <dir>/reviews/r<k>/meta_review_of_<model>_by_<meta>_for_<r1>_and_<r2>.jsonl
//! <dir>/reviews/r<k>/single_review_of_<model>_by_<meta>.jsonl
//! <dir>/evaluations/evaluated_<stem>.jsonl
//! ```

use crate::checkpoint::JsonlStore;
use std::path::{Path, PathBuf};

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ' => '_',
            other => other,
        })
        .collect()
}

/// Paths of every stage store.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn solutions(&self, file: String) -> JsonlStore {
        JsonlStore::new(self.root.join("solutions").join(file))
    }

    fn reviews(&self, round: u32, file: String) -> JsonlStore {
        JsonlStore::new(self.root.join("reviews").join(format!("r{round}")).join(file))
    }

    pub fn proposed(&self, model: &str) -> JsonlStore {
        self.solutions(format!("proposed_by_{}.jsonl", sanitize_file_name(model)))
    }

    pub fn refined(&self, model: &str, round: u32) -> JsonlStore {
        self.solutions(format!(
            "refined_r{round}_by_{}.jsonl",
            sanitize_file_name(model)
        ))
    }

    /// Solutions reviewed in `round`: the proposals for round 0, refinements after.
    pub fn solutions_for_round(&self, model: &str, round: u32) -> JsonlStore {
        if round == 0 {
            self.proposed(model)
        } else {
            self.refined(model, round)
        }
    }

    pub fn self_refined(&self, model: &str) -> JsonlStore {
        self.solutions(format!("self_refined_by_{}.jsonl", sanitize_file_name(model)))
    }

    pub fn review(&self, model: &str, reviewer: &str, round: u32) -> JsonlStore {
        self.reviews(
            round,
            format!(
                "review_of_{}_by_{}.jsonl",
                sanitize_file_name(model),
                sanitize_file_name(reviewer)
            ),
        )
    }

    /// Consolidated findings; a single-agent review when `reviewers` is empty.
    pub fn meta_review(&self, model: &str, meta: &str, reviewers: &[&str], round: u32) -> JsonlStore {
        let file = if reviewers.is_empty() {
            format!(
                "single_review_of_{}_by_{}.jsonl",
                sanitize_file_name(model),
                sanitize_file_name(meta)
            )
        } else {
            let names: Vec<String> = reviewers.iter().map(|r| sanitize_file_name(r)).collect();
            format!(
                "meta_review_of_{}_by_{}_for_{}.jsonl",
                sanitize_file_name(model),
                sanitize_file_name(meta),
                names.join("_and_")
            )
        };
        self.reviews(round, file)
    }

    /// Evaluation output for any solutions store.
    pub fn evaluated(&self, input: &Path) -> JsonlStore {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "solutions".to_string());
        JsonlStore::new(
            self.root
                .join("evaluations")
                .join(format!("evaluated_{}.jsonl", sanitize_file_name(&stem))),
        )
    }
}
