//! Pipeline orchestrator: sequences stages across proposers and rounds.
//!
//! Stage flow:
//! Propose → {Review_1 … Review_k} → MetaReview → [Refine → Review → MetaReview]*
//!
//! Epistemic foundation:
//! - K_i: A stage only starts when its upstream stores exist
//! - K_i: The next actor starts only after the current one reports zero failures
//! - K_i: Terminal solutions are carried forward, never re-reviewed
//! - I^R: Round cap, re-run passes and reviewer parallelism come from config
//! - I^B: Item failures are counted and surfaced, the process still succeeds

use crate::agents::{
    Agent, Evaluator, MetaReviewer, Proposer, Refiner, ReviewIndex, Reviewer, ScoreAggregator,
};
use crate::checkpoint::{JsonlStore, StageReport, load_collection};
use crate::client::EndpointRegistry;
use crate::models::{
    AggregateRecord, Config, ConfigError, ModelSpec, PipelineError, ProblemRecord, Result,
    ReviewRecord, SolutionRecord,
};
use crate::pipeline::layout::StoreLayout;
use crate::pipeline::runner::{BatchRunner, StageOperation};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Reports of every pass in a `run`, and why it stopped.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<StageReport>,
    /// Review/meta-review/refine rounds fully completed
    pub rounds_completed: u32,
    /// Stopped because an actor still had failures
    pub halted: bool,
    /// Stopped early because every solution is terminal
    pub all_terminal: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed).sum()
    }

    fn absorb(&mut self, reports: Vec<StageReport>) -> bool {
        let failed = reports.iter().any(StageReport::needs_rerun);
        self.reports.extend(reports);
        if failed {
            self.halted = true;
        }
        failed
    }
}

/// Run one actor pass, then re-run it while failures remain and passes are left.
async fn pass_with_reruns<O: StageOperation>(
    runner: &BatchRunner,
    extra_passes: u32,
    op: &O,
    inputs: &[O::Input],
    store: &JsonlStore,
) -> Result<StageReport> {
    let mut report = runner.run(op, inputs, store).await?;
    let mut pass = 0;
    while report.needs_rerun() && pass < extra_passes {
        pass += 1;
        info!(
            stage = %op.stage(),
            actor = %op.actor(),
            pass,
            failed = report.failed,
            "Re-running failed items"
        );
        let rerun = runner.run(op, inputs, store).await?;
        report.absorb_rerun(rerun);
    }
    Ok(report)
}

fn require_store(stage: &str, store: &JsonlStore) -> Result<()> {
    if store.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingUpstream {
            stage: stage.to_string(),
            path: store.path().to_path_buf(),
        })
    }
}

/// Resumable multi-stage pipeline over one output directory.
pub struct Pipeline {
    config: Config,
    registry: EndpointRegistry,
    layout: StoreLayout,
    runner: BatchRunner,
}

impl Pipeline {
    pub fn new(config: Config, registry: EndpointRegistry) -> Self {
        let layout = StoreLayout::new(config.output.dir.clone());
        Self {
            config,
            registry,
            layout,
            runner: BatchRunner::new().with_progress(true),
        }
    }

    /// Validate `config` and build executors for every referenced endpoint.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = EndpointRegistry::from_config(&config)?;
        Ok(Self::new(config, registry))
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.runner = self.runner.with_progress(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn agent(&self, model: &ModelSpec) -> Result<Agent> {
        let executor = self.registry.for_model(model)?;
        Ok(Agent::new(executor, model.clone()))
    }

    fn meta_spec(&self) -> Result<&ModelSpec> {
        self.config
            .meta_reviewer
            .as_ref()
            .ok_or(PipelineError::Config(ConfigError::MissingRole("meta_reviewer")))
    }

    fn reviewer_names(&self) -> Vec<&str> {
        self.config
            .reviewers
            .iter()
            .map(|r| r.model.display_name())
            .collect()
    }

    fn meta_store(&self, model: &str, round: u32) -> Result<JsonlStore> {
        let meta = self.meta_spec()?;
        Ok(self
            .layout
            .meta_review(model, meta.display_name(), &self.reviewer_names(), round))
    }

    async fn pass<O: StageOperation>(
        &self,
        op: &O,
        inputs: &[O::Input],
        store: &JsonlStore,
    ) -> Result<StageReport> {
        pass_with_reruns(
            &self.runner,
            self.config.pipeline.auto_rerun_passes,
            op,
            inputs,
            store,
        )
        .await
    }

    /// Solve every problem once per proposer model, in queue order.
    ///
    /// Halts at the first proposer that still has failures.
    pub async fn propose(&self, problems: &[ProblemRecord]) -> Result<Vec<StageReport>> {
        let mut reports = Vec::new();
        for spec in &self.config.proposer.models {
            let proposer = Proposer::new(self.agent(spec)?);
            let store = self.layout.proposed(spec.display_name());
            let report = self.pass(&proposer, problems, &store).await?;
            let failed = report.needs_rerun();
            reports.push(report);
            if failed {
                warn!(model = %spec.display_name(), "Proposer has failures, halting queue");
                break;
            }
        }
        Ok(reports)
    }

    /// Every reviewer scores every proposer's solutions for `round`.
    pub async fn review(&self, round: u32) -> Result<Vec<StageReport>> {
        if self.config.reviewers.is_empty() {
            info!(round, "No reviewers configured, skipping review");
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        for spec in &self.config.proposer.models {
            let model = spec.display_name();
            let solutions = self.layout.solutions_for_round(model, round);
            require_store("review", &solutions)?;
            let inputs: Vec<SolutionRecord> = solutions.read_all()?;

            let model_reports = if self.config.pipeline.parallel_reviewers {
                self.review_parallel(model, round, inputs).await?
            } else {
                self.review_sequential(model, round, &inputs).await?
            };

            let failed = model_reports.iter().any(StageReport::needs_rerun);
            reports.extend(model_reports);
            if failed {
                break;
            }
        }
        Ok(reports)
    }

    async fn review_sequential(
        &self,
        model: &str,
        round: u32,
        inputs: &[SolutionRecord],
    ) -> Result<Vec<StageReport>> {
        let mut reports = Vec::new();
        for reviewer in &self.config.reviewers {
            let op = Reviewer::new(self.agent(&reviewer.model)?, self.config.scoring.clone());
            let store = self.layout.review(model, reviewer.model.display_name(), round);
            let report = self.pass(&op, inputs, &store).await?;
            let failed = report.needs_rerun();
            reports.push(report);
            if failed {
                warn!(reviewer = %reviewer.model.display_name(), "Reviewer has failures, halting");
                break;
            }
        }
        Ok(reports)
    }

    /// Reviewer passes on a bounded task set; reports keep configured order.
    async fn review_parallel(
        &self,
        model: &str,
        round: u32,
        inputs: Vec<SolutionRecord>,
    ) -> Result<Vec<StageReport>> {
        let inputs = Arc::new(inputs);
        let semaphore = Arc::new(Semaphore::new(
            self.config.pipeline.reviewer_concurrency.max(1),
        ));
        let runner = self.runner.clone().with_progress(false);
        let extra_passes = self.config.pipeline.auto_rerun_passes;
        let mut tasks = JoinSet::new();

        for (index, reviewer) in self.config.reviewers.iter().enumerate() {
            let op = Reviewer::new(self.agent(&reviewer.model)?, self.config.scoring.clone());
            let store = self.layout.review(model, reviewer.model.display_name(), round);
            let inputs = Arc::clone(&inputs);
            let semaphore = Arc::clone(&semaphore);
            let runner = runner.clone();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Internal(format!("reviewer semaphore closed: {e}")))?;
                let report = pass_with_reruns(&runner, extra_passes, &op, inputs.as_slice(), &store).await?;
                Ok::<_, PipelineError>((index, report))
            });
        }

        let mut reports = Vec::with_capacity(self.config.reviewers.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, report) = joined
                .map_err(|e| PipelineError::Internal(format!("reviewer task failed: {e}")))??;
            reports.push((index, report));
        }
        reports.sort_by_key(|(index, _)| *index);
        Ok(reports.into_iter().map(|(_, report)| report).collect())
    }

    /// Consolidate every reviewer's findings for `round` into one mistake list.
    ///
    /// With no reviewers configured the meta-reviewer reviews alone.
    pub async fn meta_review(&self, round: u32) -> Result<Vec<StageReport>> {
        let meta = self.meta_spec()?;
        let weights = self.config.reviewer_weights()?;
        let mut reports = Vec::new();

        for spec in &self.config.proposer.models {
            let model = spec.display_name();
            let solutions = self.layout.solutions_for_round(model, round);
            require_store("meta-review", &solutions)?;
            let inputs: Vec<SolutionRecord> = solutions.read_all()?;

            let agent = self.agent(meta)?;
            let op = if self.config.reviewers.is_empty() {
                MetaReviewer::single(agent)
            } else {
                let mut reviews: Vec<(String, ReviewIndex)> = Vec::new();
                for reviewer in &self.config.reviewers {
                    let name = reviewer.model.display_name();
                    let store = self.layout.review(model, name, round);
                    require_store("meta-review", &store)?;
                    reviews.push((name.to_string(), store.read_map::<ReviewRecord>()?));
                }
                let raters = reviews
                    .iter()
                    .map(|(name, _)| name.clone())
                    .zip(weights.iter().copied())
                    .collect();
                MetaReviewer::consolidating(agent, reviews, ScoreAggregator::new(raters)?)
            };

            let store = self.meta_store(model, round)?;
            let report = self.pass(&op, &inputs, &store).await?;
            let failed = report.needs_rerun();
            reports.push(report);
            if failed {
                break;
            }
        }
        Ok(reports)
    }

    /// Each proposer rewrites its round `round - 1` solutions from the consolidated findings.
    pub async fn refine(&self, round: u32) -> Result<Vec<StageReport>> {
        if round == 0 {
            return Err(PipelineError::InvalidInput(
                "refine rounds start at 1".to_string(),
            ));
        }
        let previous = round - 1;
        let mut reports = Vec::new();

        for spec in &self.config.proposer.models {
            let model = spec.display_name();
            let solutions = self.layout.solutions_for_round(model, previous);
            require_store("refine", &solutions)?;
            let feedback = self.meta_store(model, previous)?;
            require_store("refine", &feedback)?;

            let inputs: Vec<SolutionRecord> = solutions.read_all()?;
            let aggregates = feedback.read_map::<AggregateRecord>()?;
            let op = Refiner::with_feedback(self.agent(spec)?, aggregates);

            let report = self
                .pass(&op, &inputs, &self.layout.refined(model, round))
                .await?;
            let failed = report.needs_rerun();
            reports.push(report);
            if failed {
                break;
            }
        }
        Ok(reports)
    }

    /// Each proposer checks its own proposals and answers again.
    pub async fn self_check(&self) -> Result<Vec<StageReport>> {
        let mut reports = Vec::new();
        for spec in &self.config.proposer.models {
            let model = spec.display_name();
            let solutions = self.layout.proposed(model);
            require_store("self-check", &solutions)?;
            let inputs: Vec<SolutionRecord> = solutions.read_all()?;

            let op = Refiner::self_check(self.agent(spec)?);
            let report = self
                .pass(&op, &inputs, &self.layout.self_refined(model))
                .await?;
            let failed = report.needs_rerun();
            reports.push(report);
            if failed {
                break;
            }
        }
        Ok(reports)
    }

    /// Grade any solutions store (JSON array or JSONL) against its reference steps.
    pub async fn evaluate(&self, input: &Path) -> Result<StageReport> {
        let spec = self
            .config
            .evaluator
            .as_ref()
            .ok_or(PipelineError::Config(ConfigError::MissingRole("evaluator")))?;
        if !input.exists() {
            return Err(PipelineError::MissingUpstream {
                stage: "evaluate".to_string(),
                path: input.to_path_buf(),
            });
        }

        let inputs: Vec<SolutionRecord> = load_collection(input)?;
        let op = Evaluator::new(self.agent(spec)?);
        let runner = self
            .runner
            .clone()
            .with_pacing(Duration::from_millis(self.config.pipeline.request_pacing_ms));

        pass_with_reruns(
            &runner,
            self.config.pipeline.auto_rerun_passes,
            &op,
            &inputs,
            &self.layout.evaluated(input),
        )
        .await
    }

    /// Whether every solution in round `round` is terminal.
    fn all_terminal(&self, round: u32) -> Result<bool> {
        for spec in &self.config.proposer.models {
            let store = self.layout.refined(spec.display_name(), round);
            let solutions: Vec<SolutionRecord> = store.read_all()?;
            if !solutions.iter().all(|s| s.no_mistakes) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Propose, then review, meta-review and refine for up to `refine.max_rounds` rounds.
    ///
    /// Stops at the first pass with failures, or once every solution is terminal.
    pub async fn run(&self, problems: &[ProblemRecord]) -> Result<RunSummary> {
        let max_rounds = self.config.refine.max_rounds;
        if max_rounds > 0 {
            self.meta_spec()?;
        }

        let mut summary = RunSummary::default();
        if summary.absorb(self.propose(problems).await?) {
            return Ok(summary);
        }

        for round in 0..max_rounds {
            info!(round, "Starting review round");
            if summary.absorb(self.review(round).await?)
                || summary.absorb(self.meta_review(round).await?)
                || summary.absorb(self.refine(round + 1).await?)
            {
                warn!(round, "Round has failures, re-run needed");
                return Ok(summary);
            }
            summary.rounds_completed = round + 1;

            if self.all_terminal(round + 1)? {
                info!(round, "Every solution is terminal, stopping");
                summary.all_terminal = true;
                break;
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::tests::{problem, review_json};
    use crate::client::mock::ScriptedEndpoint;
    use crate::client::{CallRequest, CredentialPool, ModelEndpoint, RetryPolicy};
    use crate::models::CallError;
    use secrecy::SecretString;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
        [endpoints.default]
        base_url = "http://localhost:11434/v1"
        require_key = false

        [proposer]
        models = [{ id = "qwen" }]

        [[reviewers]]
        id = "llama"

        [[reviewers]]
        id = "mistral"

        [[reviewers]]
        id = "phi"

        [meta_reviewer]
        id = "gemma"

        [evaluator]
        id = "grader"
    "#;

    const FIRST: &str = "t = 2 s";
    const REVISED: &str = "t = 2.02 s";

    fn pipeline(
        config: &str,
        temp: &TempDir,
        responder: impl Fn(&CallRequest) -> std::result::Result<String, CallError>
        + Send
        + Sync
        + 'static,
    ) -> (Pipeline, Arc<ScriptedEndpoint>) {
        let mut config = Config::from_toml(config).unwrap();
        config.output.dir = temp.path().to_path_buf();
        config.validate().unwrap();

        let endpoint = Arc::new(ScriptedEndpoint::responding(responder));
        let mut registry = EndpointRegistry::new();
        registry.insert_endpoint(
            "default",
            Arc::clone(&endpoint) as Arc<dyn ModelEndpoint>,
            CredentialPool::new("default", vec![SecretString::from(String::new())]).unwrap(),
            RetryPolicy::default(),
        );
        (Pipeline::new(config, registry).with_progress(false), endpoint)
    }

    fn schema(request: &CallRequest) -> Option<&str> {
        request.schema.as_ref().map(|s| s.name.as_str())
    }

    /// Proposes FIRST, flags it on review, accepts REVISED.
    fn physics_tutor(request: &CallRequest) -> std::result::Result<String, CallError> {
        let revised = request.messages.iter().any(|m| m.content.contains(REVISED));
        Ok(match schema(request) {
            None if request.messages.len() == 3 => REVISED.to_string(),
            None => FIRST.to_string(),
            Some("review") if revised => review_json(9.0, &[]),
            Some("review") => review_json(6.0, &["Uses g = 10"]),
            Some(_) => r#"{"mistakes": ["Uses g = 10 instead of 9.8"]}"#.to_string(),
        })
    }

    #[tokio::test]
    async fn test_clean_reviews_carry_solution_forward() {
        let temp = TempDir::new().unwrap();
        let (pipeline, endpoint) = pipeline(CONFIG, &temp, |request| {
            Ok(match schema(request) {
                None => FIRST.to_string(),
                Some("review") => review_json(9.0, &[]),
                Some(_) => r#"{"mistakes": []}"#.to_string(),
            })
        });

        let summary = pipeline.run(&[problem("P1")]).await.unwrap();
        assert!(!summary.halted);
        assert!(summary.all_terminal);
        assert_eq!(summary.rounds_completed, 1);
        assert_eq!(summary.failed(), 0);
        // One proposal and three reviews; meta-review and refine make no calls.
        assert_eq!(endpoint.calls(), 4);

        let layout = pipeline.layout();
        let meta: Vec<AggregateRecord> = layout
            .meta_review("qwen", "gemma", &["llama", "mistral", "phi"], 0)
            .read_all()
            .unwrap();
        assert_eq!(meta.len(), 1);
        assert!(meta[0].mistakes.is_empty());

        let refined: Vec<SolutionRecord> = layout.refined("qwen", 1).read_all().unwrap();
        assert_eq!(refined.len(), 1);
        assert!(refined[0].no_mistakes);
        assert_eq!(refined[0].ai_solution, FIRST);
    }

    #[tokio::test]
    async fn test_feedback_loop_until_terminal() {
        let temp = TempDir::new().unwrap();
        let config = format!("{CONFIG}\n[refine]\nmax_rounds = 3\n");
        let (pipeline, _) = pipeline(&config, &temp, physics_tutor);

        let summary = pipeline.run(&[problem("P1")]).await.unwrap();
        assert!(summary.all_terminal);
        assert_eq!(summary.rounds_completed, 2);

        let layout = pipeline.layout();
        let first: Vec<SolutionRecord> = layout.refined("qwen", 1).read_all().unwrap();
        assert_eq!(first[0].ai_solution, REVISED);
        assert!(!first[0].no_mistakes);

        let second: Vec<SolutionRecord> = layout.refined("qwen", 2).read_all().unwrap();
        assert_eq!(second[0].ai_solution, REVISED);
        assert!(second[0].no_mistakes);
        assert!(!layout.refined("qwen", 3).exists());
    }

    #[tokio::test]
    async fn test_parallel_reviewers_match_sequential() {
        let temp = TempDir::new().unwrap();
        let config = format!("{CONFIG}\n[pipeline]\nparallel_reviewers = true\nreviewer_concurrency = 2\n");
        let (pipeline, _) = pipeline(&config, &temp, physics_tutor);

        pipeline.propose(&[problem("P1"), problem("P2")]).await.unwrap();
        let reports = pipeline.review(0).await.unwrap();
        let actors: Vec<&str> = reports.iter().map(|r| r.actor.as_str()).collect();
        assert_eq!(actors, vec!["llama", "mistral", "phi"]);
        assert!(reports.iter().all(|r| r.processed == 2));

        for reviewer in ["llama", "mistral", "phi"] {
            let ids = pipeline.layout().review("qwen", reviewer, 0).load_ids().unwrap();
            assert_eq!(ids.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_review_requires_proposals() {
        let temp = TempDir::new().unwrap();
        let (pipeline, endpoint) = pipeline(CONFIG, &temp, physics_tutor);

        match pipeline.review(0).await {
            Err(PipelineError::MissingUpstream { stage, path }) => {
                assert_eq!(stage, "review");
                assert!(path.ends_with("solutions/proposed_by_qwen.jsonl"));
            }
            other => panic!("expected missing upstream, got {other:?}"),
        }
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_meta_review_requires_every_reviewer() {
        let temp = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(CONFIG, &temp, physics_tutor);
        pipeline.propose(&[problem("P1")]).await.unwrap();

        assert!(matches!(
            pipeline.meta_review(0).await,
            Err(PipelineError::MissingUpstream { stage, .. }) if stage == "meta-review"
        ));
    }

    #[tokio::test]
    async fn test_single_agent_review_feeds_refine() {
        let temp = TempDir::new().unwrap();
        let config = r#"
            [endpoints.default]
            base_url = "http://localhost:11434/v1"
            require_key = false

            [proposer]
            models = [{ id = "qwen" }]

            [meta_reviewer]
            id = "gemma"
        "#;
        let (pipeline, _) = pipeline(config, &temp, physics_tutor);

        let summary = pipeline.run(&[problem("P1")]).await.unwrap();
        assert_eq!(summary.failed(), 0);
        assert!(
            pipeline
                .layout()
                .meta_review("qwen", "gemma", &[], 0)
                .exists()
        );
        let refined: Vec<SolutionRecord> =
            pipeline.layout().refined("qwen", 1).read_all().unwrap();
        assert_eq!(refined[0].ai_solution, REVISED);
    }

    #[tokio::test]
    async fn test_failing_proposer_halts_queue_after_reruns() {
        let temp = TempDir::new().unwrap();
        let config = r#"
            [endpoints.default]
            base_url = "http://localhost:11434/v1"
            require_key = false

            [proposer]
            models = [{ id = "broken" }, { id = "qwen" }]

            [meta_reviewer]
            id = "gemma"

            [pipeline]
            auto_rerun_passes = 2
        "#;
        let (pipeline, endpoint) = pipeline(config, &temp, |request| {
            if request.model == "broken" {
                Err(CallError::Status {
                    status: 400,
                    message: "bad request".into(),
                })
            } else {
                Ok(FIRST.to_string())
            }
        });

        let summary = pipeline.run(&[problem("P1")]).await.unwrap();
        assert!(summary.halted);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].failed_ids, vec!["P1"]);
        assert_eq!(endpoint.calls(), 3);
        assert!(!pipeline.layout().proposed("qwen").exists());
    }

    #[tokio::test]
    async fn test_self_check_writes_own_store() {
        let temp = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(CONFIG, &temp, physics_tutor);
        pipeline.propose(&[problem("P1")]).await.unwrap();

        let reports = pipeline.self_check().await.unwrap();
        assert_eq!(reports[0].stage, "self-check");
        let checked: Vec<SolutionRecord> =
            pipeline.layout().self_refined("qwen").read_all().unwrap();
        assert_eq!(checked[0].ai_solution, REVISED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_skips_ungradeable_items() {
        let temp = TempDir::new().unwrap();
        let (pipeline, _) = pipeline(CONFIG, &temp, |_| {
            Ok(r#"{"problem_id": "P1", "mathematical_accuracy": 5, "logical_consistency": 4,
                "completeness": 5, "clarity_and_coherence": 4, "formulas_principles": 5,
                "assumptions_made": 4, "overall_correctness": 9}"#
                .to_string())
        });
        pipeline.propose(&[problem("P1"), problem("P2")]).await.unwrap();

        let input = pipeline.layout().proposed("qwen");
        let ungradeable = SolutionRecord::proposed(&problem("P3"), String::new(), "qwen");
        input.append(&ungradeable).unwrap();

        let report = pipeline.evaluate(input.path()).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.ignored, 1);
        assert!(
            pipeline
                .layout()
                .evaluated(input.path())
                .path()
                .ends_with("evaluations/evaluated_proposed_by_qwen.jsonl")
        );
    }
}
