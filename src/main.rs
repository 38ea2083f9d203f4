//! physrev CLI - Resumable propose/review/refine pipeline for physics solutions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use physrev::checkpoint::load_collection;
use physrev::{Config, EndpointRegistry, Pipeline, ProblemRecord, StageReport};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "physrev")]
#[command(version)]
#[command(about = "Propose, review and refine physics solutions with LLM agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "physrev.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve every problem with each proposer model
    Propose {
        /// Problem set (JSON array or JSONL)
        #[arg(short, long)]
        problems: PathBuf,
    },

    /// Score the solutions of a round with every reviewer
    Review {
        /// Round to review (0 = proposals)
        #[arg(short, long, default_value = "0")]
        round: u32,
    },

    /// Consolidate reviewer findings into one mistake list
    MetaReview {
        #[arg(short, long, default_value = "0")]
        round: u32,
    },

    /// Rewrite solutions from the previous round's findings
    Refine {
        /// Round to produce (reads findings of round - 1)
        #[arg(short, long, default_value = "1")]
        round: u32,
    },

    /// Let each proposer check and redo its own proposals
    SelfCheck,

    /// Grade a solutions store against the reference steps
    Evaluate {
        /// Solutions store (JSON array or JSONL)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Propose, then review/meta-review/refine up to refine.max_rounds
    Run {
        /// Problem set (JSON array or JSONL)
        #[arg(short, long)]
        problems: PathBuf,
    },

    /// Validate configuration file and credentials
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# physrev configuration file

# OpenAI-compatible endpoints, referenced by name from every model below
[endpoints.default]
base_url = "https://api.openai.com/v1"
# Credentials from any mix of: inline list, env var (comma separated), key file (one per line)
# api_keys = ["${OPENAI_API_KEY}"]
api_key_env = "OPENAI_API_KEY"
# api_key_file = "keys.txt"
timeout_secs = 180
structured_output = true

[endpoints.local]
base_url = "http://localhost:11434/v1"
require_key = false

[retry]
attempts_per_credential = 3
rate_limit_cooldown_secs = 20
transient_delay_secs = 5

[proposer]
models = [
    { endpoint = "local", id = "qwen2.5:7b" },
    { endpoint = "local", id = "llama3.1:8b" },
]

[[reviewers]]
id = "gpt-4o-mini"
# weight = 0.5   # either every reviewer sets a weight or none does

[[reviewers]]
endpoint = "local"
id = "mistral:7b"

[meta_reviewer]
id = "gpt-4o"
temperature = 0.0

[evaluator]
id = "gpt-4o"
max_tokens = 1024

[scoring]
calculation_accuracy = 0.30
formula_correctness = 0.25
logical_consistency = 0.25
completeness = 0.10
assumption_validity = 0.05
clarity_and_coherence = 0.05

[refine]
max_rounds = 1

[pipeline]
parallel_reviewers = false
reviewer_concurrency = 3
auto_rerun_passes = 0
request_pacing_ms = 3000

[output]
dir = "output"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_problems(path: &Path) -> Result<Vec<ProblemRecord>> {
    let problems: Vec<ProblemRecord> = load_collection(path)
        .with_context(|| format!("Failed to load problems from {path:?}"))?;
    info!(count = problems.len(), "Loaded problems");
    Ok(problems)
}

fn print_reports(title: &str, reports: &[StageReport]) {
    println!("\n=== {title} ===");
    for report in reports {
        println!("{report}");
        if report.needs_rerun() {
            println!("  failed: {}", report.failed_ids.join(", "));
        }
    }
    let failed: usize = reports.iter().map(|r| r.failed).sum();
    if failed > 0 {
        println!("{failed} item(s) failed - re-run the same command to retry them");
    }
}

fn print_ledgers(pipeline: &Pipeline) {
    let registry = pipeline.registry();
    for (endpoint, stats) in registry.stats() {
        println!("Endpoint {endpoint}: {stats}");
        if let Some(executor) = registry.get(&endpoint) {
            let (prompt, completion) = executor.token_usage();
            if prompt + completion > 0 {
                println!("  tokens: {prompt} prompt, {completion} completion");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;

            // Resolves every referenced credential pool
            let registry =
                EndpointRegistry::from_config(&config).context("Failed to resolve credentials")?;

            info!("Configuration is valid");
            for name in registry.endpoint_names() {
                if let Some(executor) = registry.get(name) {
                    info!("  Endpoint {name}: {} credential(s)", executor.pool().len());
                }
            }
            info!("  Proposers: {}", config.proposer.models.len());
            info!("  Reviewers: {}", config.reviewers.len());
            info!(
                "  Meta-reviewer: {}",
                config
                    .meta_reviewer
                    .as_ref()
                    .map_or("none", |m| m.display_name())
            );
            info!(
                "  Evaluator: {}",
                config
                    .evaluator
                    .as_ref()
                    .map_or("none", |m| m.display_name())
            );
            info!("  Max rounds: {}", config.refine.max_rounds);
            return Ok(());
        }

        _ => {}
    }

    let config = load_config(&cli.config)?;
    let pipeline = Pipeline::from_config(config).context("Failed to build pipeline")?;

    match cli.command {
        Commands::Propose { problems } => {
            let problems = load_problems(&problems)?;
            let reports = pipeline.propose(&problems).await?;
            print_reports("Propose", &reports);
        }

        Commands::Review { round } => {
            let reports = pipeline.review(round).await?;
            print_reports(&format!("Review round {round}"), &reports);
        }

        Commands::MetaReview { round } => {
            let reports = pipeline.meta_review(round).await?;
            print_reports(&format!("Meta-review round {round}"), &reports);
        }

        Commands::Refine { round } => {
            let reports = pipeline.refine(round).await?;
            print_reports(&format!("Refine round {round}"), &reports);
        }

        Commands::SelfCheck => {
            let reports = pipeline.self_check().await?;
            print_reports("Self-check", &reports);
        }

        Commands::Evaluate { input } => {
            let report = pipeline.evaluate(&input).await?;
            print_reports("Evaluate", std::slice::from_ref(&report));
            println!("Output:      {:?}", pipeline.layout().evaluated(&input).path());
        }

        Commands::Run { problems } => {
            let problems = load_problems(&problems)?;
            let summary = pipeline.run(&problems).await?;
            print_reports("Run", &summary.reports);
            println!("Rounds:      {}", summary.rounds_completed);
            if summary.all_terminal {
                println!("Every solution is terminal");
            }
            if summary.halted {
                println!("Halted on failures - re-run to resume");
            }
        }

        Commands::Validate | Commands::Example => {}
    }

    print_ledgers(&pipeline);
    println!("Output dir:  {:?}", pipeline.layout().root());
    Ok(())
}
