//! Checkpointed batch runner shared by every stage.
//!
//! Pass flow:
//! Store → CheckpointSet → (skip done | process → append) per item → StageReport

use crate::checkpoint::{JsonlStore, StageReport};
use crate::models::{ItemError, Keyed, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-item work of one stage.
#[async_trait]
pub trait StageOperation: Send + Sync {
    type Input: Keyed + Send + Sync;
    type Output: Serialize + Send + Sync;

    /// Stage name for logs and reports.
    fn stage(&self) -> &str;

    /// Actor (model) doing the work.
    fn actor(&self) -> &str;

    /// Whether this item should be processed at all.
    fn accepts(&self, _item: &Self::Input) -> bool {
        true
    }

    /// Whether this item costs a model call (pacing applies only to these).
    fn needs_call(&self, _item: &Self::Input) -> bool {
        true
    }

    /// Produce the output record for one item.
    async fn process(&self, item: &Self::Input) -> std::result::Result<Self::Output, ItemError>;
}

/// Drives items through one stage against one output store.
///
/// K_i: An identifier already in the store is never reprocessed.
/// K_i: The append is the durability point; an append failure aborts the pass.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    pacing: Duration,
    progress: bool,
}

impl BatchRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between model calls.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Draw a progress bar.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn progress_bar(&self, len: usize, label: String) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .map(|s| s.progress_chars("##-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message(label);
        pb
    }

    /// Run one pass of `op` over `inputs`, appending to `store`.
    ///
    /// B_i(store writable) → Result
    pub async fn run<O: StageOperation>(
        &self,
        op: &O,
        inputs: &[O::Input],
        store: &JsonlStore,
    ) -> Result<StageReport> {
        let start = Instant::now();
        let mut done = store.load_ids()?;
        let mut report = StageReport::new(op.stage(), op.actor());

        let mut seen = HashSet::new();
        let items: Vec<&O::Input> = inputs.iter().filter(|i| seen.insert(i.key())).collect();
        if items.len() < inputs.len() {
            warn!(
                stage = %op.stage(),
                duplicates = inputs.len() - items.len(),
                "Duplicate identifiers in input, processing each once"
            );
        }
        report.total = items.len();

        info!(
            stage = %op.stage(),
            actor = %op.actor(),
            total = report.total,
            already_done = done.len(),
            store = %store.path().display(),
            "Starting pass"
        );

        let pb = self.progress_bar(items.len(), format!("{} [{}]", op.stage(), op.actor()));
        let mut calls_made = 0usize;

        for item in items {
            let id = item.key();
            if done.contains(id) {
                report.skipped += 1;
                pb.inc(1);
                continue;
            }
            if !op.accepts(item) {
                debug!(stage = %op.stage(), problem_id = %id, "Not eligible, skipping");
                report.ignored += 1;
                pb.inc(1);
                continue;
            }

            if op.needs_call(item) {
                if calls_made > 0 && !self.pacing.is_zero() {
                    tokio::time::sleep(self.pacing).await;
                }
                calls_made += 1;
            }

            match op.process(item).await {
                Ok(output) => {
                    store.append(&output)?;
                    done.insert(id);
                    report.processed += 1;
                    debug!(stage = %op.stage(), problem_id = %id, "Recorded");
                }
                Err(e) => {
                    warn!(
                        stage = %op.stage(),
                        actor = %op.actor(),
                        problem_id = %id,
                        error = %e,
                        "Item failed"
                    );
                    report.failed += 1;
                    report.failed_ids.push(id.to_string());
                }
            }

            pb.inc(1);
            pb.set_message(format!(
                "{} [{}] ok: {}, failed: {}",
                op.stage(),
                op.actor(),
                report.processed,
                report.failed
            ));
        }

        report.runtime_secs = start.elapsed().as_secs_f64();
        pb.finish_and_clear();

        if report.needs_rerun() {
            warn!(
                stage = %op.stage(),
                actor = %op.actor(),
                failed = report.failed,
                "Pass finished with failures, re-run needed"
            );
        } else {
            info!(
                stage = %op.stage(),
                actor = %op.actor(),
                processed = report.processed,
                skipped = report.skipped,
                "Pass complete"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CallError, CallFailure, ProblemRecord};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Echo {
        fail: HashSet<String>,
        seen: Mutex<Vec<String>>,
    }

    impl Echo {
        fn new(fail: &[&str]) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StageOperation for Echo {
        type Input = ProblemRecord;
        type Output = Value;

        fn stage(&self) -> &str {
            "echo"
        }

        fn actor(&self) -> &str {
            "test"
        }

        fn accepts(&self, item: &ProblemRecord) -> bool {
            !item.problem.is_empty()
        }

        async fn process(&self, item: &ProblemRecord) -> std::result::Result<Value, ItemError> {
            self.seen.lock().unwrap().push(item.id.clone());
            if self.fail.contains(&item.id) {
                return Err(ItemError::Call(CallFailure::Exhausted {
                    credentials: 1,
                    last_error: CallError::Network("down".into()),
                }));
            }
            Ok(json!({ "Problem_ID": item.id, "echo": item.problem }))
        }
    }

    fn problems(ids: &[&str]) -> Vec<ProblemRecord> {
        ids.iter()
            .map(|id| ProblemRecord {
                id: id.to_string(),
                problem: format!("problem {id}"),
                elaborated_solution_steps: Value::Null,
                extra: Map::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_resume_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("out.jsonl"));
        let inputs = problems(&["P1", "P2", "P3"]);
        let runner = BatchRunner::new();

        let first = runner.run(&Echo::new(&[]), &inputs, &store).await.unwrap();
        assert_eq!(first.processed, 3);

        let op = Echo::new(&[]);
        let second = runner.run(&op, &inputs, &store).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 3);
        assert!(op.seen().is_empty());

        let lines = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(lines.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_retried_on_rerun() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("out.jsonl"));
        let inputs = problems(&["P1", "P2", "P3"]);
        let runner = BatchRunner::new();

        let report = runner.run(&Echo::new(&["P2"]), &inputs, &store).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_ids, vec!["P2"]);
        assert!(report.needs_rerun());

        let op = Echo::new(&[]);
        let rerun = runner.run(&op, &inputs, &store).await.unwrap();
        assert_eq!(op.seen(), vec!["P2"]);
        assert_eq!(rerun.processed, 1);
        assert!(!rerun.needs_rerun());
    }

    #[tokio::test]
    async fn test_duplicate_inputs_processed_once() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("out.jsonl"));
        let inputs = problems(&["P1", "P1", "P2"]);

        let op = Echo::new(&[]);
        let report = BatchRunner::new().run(&op, &inputs, &store).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(op.seen(), vec!["P1", "P2"]);
        assert_eq!(store.load_ids().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ineligible_items_are_not_processed() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("out.jsonl"));
        let mut inputs = problems(&["P1", "P2"]);
        inputs[1].problem.clear();

        let op = Echo::new(&[]);
        let report = BatchRunner::new().run(&op, &inputs, &store).await.unwrap();
        assert_eq!(report.ignored, 1);
        assert_eq!(op.seen(), vec!["P1"]);
        assert!(!report.needs_rerun());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_calls_only() {
        let temp = TempDir::new().unwrap();
        let store = JsonlStore::new(temp.path().join("out.jsonl"));
        let inputs = problems(&["P1", "P2", "P3"]);
        let runner = BatchRunner::new().with_pacing(Duration::from_secs(3));

        let start = tokio::time::Instant::now();
        runner.run(&Echo::new(&[]), &inputs, &store).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }
}
