//! Configuration models for physrev.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use super::rubric::CategoryWeights;
use crate::pipeline::sanitize_file_name;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Top-level configuration for physrev.
///
/// I^R resolved: All configurable parameters are explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named OpenAI-compatible endpoints, referenced by model specs
    pub endpoints: HashMap<String, EndpointConfig>,

    /// Retry and backoff policy shared by every executor
    #[serde(default)]
    pub retry: RetryConfig,

    /// Proposer queue (processed in order)
    pub proposer: ProposerConfig,

    /// Independent reviewers, in fixed order
    #[serde(default)]
    pub reviewers: Vec<ReviewerSpec>,

    /// Model that consolidates reviewer findings
    #[serde(default)]
    pub meta_reviewer: Option<ModelSpec>,

    /// Model that grades solutions against the reference steps
    #[serde(default)]
    pub evaluator: Option<ModelSpec>,

    /// Category weights for each reviewer's final score
    #[serde(default)]
    pub scoring: CategoryWeights,

    /// Refinement loop settings
    #[serde(default)]
    pub refine: RefineConfig,

    /// Scheduling settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Configuration for an OpenAI-compatible endpoint.
///
/// K_i: Every endpoint speaks the chat completions API.
/// I^R: Credentials come from any mix of inline list, env var and key file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL for the API (e.g., "http://localhost:11434/v1")
    pub base_url: String,

    /// Inline API keys; values may contain ${ENV_VAR}
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Environment variable holding one key or a comma-separated list
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// File with one API key per line
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,

    /// Whether an empty credential pool is a configuration error
    #[serde(default = "default_true")]
    pub require_key: bool,

    /// Custom headers to include in requests
    /// Values can contain ${ENV_VAR} for environment variable expansion
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-attempt request timeout in seconds (default: 180)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Send a JSON schema as `response_format` when a typed reply is expected
    #[serde(default = "default_true")]
    pub structured_output: bool,
}

fn default_timeout() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_keys: Vec::new(),
            api_key_env: None,
            api_key_file: None,
            require_key: true,
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
            structured_output: true,
        }
    }
}

/// Retry policy for one logical call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts on one credential before moving on (default: 3)
    #[serde(default = "default_attempts")]
    pub attempts_per_credential: u32,

    /// Sleep after HTTP 429 before switching credential (default: 20)
    #[serde(default = "default_rate_limit_cooldown")]
    pub rate_limit_cooldown_secs: u64,

    /// Sleep before retrying a transient failure (default: 5)
    #[serde(default = "default_transient_delay")]
    pub transient_delay_secs: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_rate_limit_cooldown() -> u64 {
    20
}

fn default_transient_delay() -> u64 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts_per_credential: default_attempts(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown(),
            transient_delay_secs: default_transient_delay(),
        }
    }
}

/// Specification for a model.
///
/// K_i: Model ID format depends on the endpoint.
/// - OpenRouter: "provider/model" (e.g., "deepseek/deepseek-r1")
/// - vLLM/Ollama: model name as loaded (e.g., "llama3.3:70b")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Endpoint name, references [endpoints.<name>]
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model ID sent to the endpoint
    pub id: String,

    /// Human-readable label, also used in store file names
    #[serde(default)]
    pub label: Option<String>,

    /// Maximum tokens for this model (endpoint default when unset)
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Temperature for this model (endpoint default when unset)
    #[serde(default)]
    pub temperature: Option<f64>,
}

fn default_endpoint() -> String {
    "default".to_string()
}

impl ModelSpec {
    /// Name used for logs and store file names.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Proposer queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposerConfig {
    pub models: Vec<ModelSpec>,
}

/// One reviewer with an optional cross-rater weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerSpec {
    #[serde(flatten)]
    pub model: ModelSpec,

    /// Cross-rater weight; all reviewers share equally when none is set
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Refinement loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    /// Maximum review/meta-review/refine rounds in `run` (default: 1)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

fn default_max_rounds() -> u32 {
    1
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

/// Scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run reviewer passes concurrently instead of one after another
    #[serde(default)]
    pub parallel_reviewers: bool,

    /// Maximum reviewer passes in flight when parallel
    #[serde(default = "default_reviewer_concurrency")]
    pub reviewer_concurrency: usize,

    /// Extra passes over an actor's failed items before halting
    #[serde(default)]
    pub auto_rerun_passes: u32,

    /// Pause between evaluator requests in milliseconds
    #[serde(default = "default_pacing")]
    pub request_pacing_ms: u64,
}

fn default_reviewer_concurrency() -> usize {
    3
}

fn default_pacing() -> u64 {
    3000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_reviewers: false,
            reviewer_concurrency: default_reviewer_concurrency(),
            auto_rerun_passes: 0,
            request_pacing_ms: default_pacing(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory for every stage store
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Look up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> Result<&EndpointConfig, ConfigError> {
        self.endpoints
            .get(name)
            .ok_or_else(|| ConfigError::EndpointNotFound(name.to_string()))
    }

    /// Resolve the credential pool for an endpoint.
    ///
    /// Sources are merged in order: inline list, env var, key file.
    /// Blank entries are dropped. A keyless endpoint yields one empty
    /// credential so rotation still has something to hand out.
    ///
    /// B_i(at least one key) → Result
    pub fn resolve_credentials(&self, endpoint_name: &str) -> Result<Vec<SecretString>, ConfigError> {
        let endpoint = self.endpoint(endpoint_name)?;
        let mut keys: Vec<String> = endpoint
            .api_keys
            .iter()
            .map(|k| expand_env_vars(k))
            .filter(|k| {
                let unresolved = k.contains("${");
                if unresolved {
                    warn!(
                        endpoint = endpoint_name,
                        "Inline API key references an unset variable; skipped"
                    );
                }
                !unresolved
            })
            .collect();

        if let Some(env_var) = &endpoint.api_key_env {
            if let Ok(value) = std::env::var(env_var) {
                keys.extend(value.split(',').map(str::to_string));
            }
        }

        if let Some(path) = &endpoint.api_key_file {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
                path: path.clone(),
                source: e,
            })?;
            keys.extend(content.lines().map(str::to_string));
        }

        let keys: Vec<SecretString> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .collect();

        if keys.is_empty() {
            if endpoint.require_key {
                return Err(ConfigError::NoCredentials {
                    endpoint: endpoint_name.to_string(),
                });
            }
            return Ok(vec![SecretString::from(String::new())]);
        }

        Ok(keys)
    }

    /// Every model spec in the file, in a stable order.
    pub fn all_models(&self) -> impl Iterator<Item = &ModelSpec> {
        self.proposer
            .models
            .iter()
            .chain(self.reviewers.iter().map(|r| &r.model))
            .chain(self.meta_reviewer.iter())
            .chain(self.evaluator.iter())
    }

    /// Get all unique endpoint names referenced by models.
    pub fn referenced_endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.all_models().map(|m| m.endpoint.clone()).collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    /// Cross-rater weights, one per reviewer in configured order.
    ///
    /// Equal weights when no reviewer sets one; otherwise every reviewer
    /// must set one.
    pub fn reviewer_weights(&self) -> Result<Vec<f64>, ConfigError> {
        let n = self.reviewers.len();
        let set = self.reviewers.iter().filter(|r| r.weight.is_some()).count();
        if set == 0 {
            return Ok(vec![1.0 / n.max(1) as f64; n]);
        }
        if set != n {
            return Err(ConfigError::InvalidWeights(
                "either every reviewer sets a weight or none does".to_string(),
            ));
        }
        Ok(self.reviewers.iter().filter_map(|r| r.weight).collect())
    }

    /// Validate cross-references and weights before any item is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proposer.models.is_empty() {
            return Err(ConfigError::NoProposer);
        }

        for endpoint in self.referenced_endpoints() {
            if !self.endpoints.contains_key(&endpoint) {
                return Err(ConfigError::EndpointNotFound(endpoint));
            }
        }

        if !self.scoring.is_valid() {
            return Err(ConfigError::InvalidWeights(format!(
                "category weights must be non-negative and sum to 1 (got {:.4})",
                self.scoring.total()
            )));
        }

        unique_names("proposer", &self.proposer.models)?;
        unique_names("reviewer", self.reviewers.iter().map(|r| &r.model))?;

        let weights = self.reviewer_weights()?;
        if !weights.is_empty() {
            let total: f64 = weights.iter().sum();
            if weights.iter().any(|w| *w < 0.0) || (total - 1.0).abs() > 1e-6 {
                return Err(ConfigError::InvalidWeights(format!(
                    "reviewer weights must be non-negative and sum to 1 (got {total:.4})"
                )));
            }
        }

        Ok(())
    }
}

/// Each model of a role owns a store named after its display name, so two
/// names that sanitize to the same file would share it.
fn unique_names<'a>(
    role: &'static str,
    models: impl IntoIterator<Item = &'a ModelSpec>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for model in models {
        if !seen.insert(sanitize_file_name(model.display_name())) {
            return Err(ConfigError::DuplicateModel {
                role,
                name: model.display_name().to_string(),
            });
        }
    }
    Ok(())
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    re.replace_all(s, |cap: &regex::Captures| {
        std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
    })
    .into_owned()
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error, bad weights
/// - I^B materialized: Missing credentials
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(
        "No credentials for endpoint '{endpoint}': set api_keys, api_key_env or api_key_file, or require_key = false"
    )]
    NoCredentials { endpoint: String },

    #[error("Endpoint not found: '{0}' (referenced by model but not configured in [endpoints.*])")]
    EndpointNotFound(String),

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    #[error("No proposer model configured in [proposer]")]
    NoProposer,

    #[error("No {0} model configured")]
    MissingRole(&'static str),

    #[error("Duplicate {role} '{name}': set a distinct label")]
    DuplicateModel { role: &'static str, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
        [endpoints.default]
        base_url = "http://localhost:11434/v1"
        api_keys = ["key-one", "key-two"]

        [proposer]
        models = [{ id = "qwen2.5:7b" }]

        [[reviewers]]
        id = "llama3.1:8b"

        [[reviewers]]
        id = "mistral:7b"
        label = "mistral"
    "#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.retry.attempts_per_credential, 3);
        assert_eq!(config.retry.rate_limit_cooldown_secs, 20);
        assert_eq!(config.retry.transient_delay_secs, 5);
        assert_eq!(config.refine.max_rounds, 1);
        assert_eq!(config.pipeline.auto_rerun_passes, 0);
        assert!(!config.pipeline.parallel_reviewers);
        assert_eq!(config.output.dir, PathBuf::from("output"));
        assert_eq!(config.reviewers[1].model.display_name(), "mistral");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_equal_reviewer_weights_by_default() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.reviewer_weights().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_partial_reviewer_weights_rejected() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.reviewers[0].weight = Some(1.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_reviewer_weights_must_sum_to_one() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.reviewers[0].weight = Some(0.7);
        config.reviewers[1].weight = Some(0.7);
        assert!(config.validate().is_err());
        config.reviewers[1].weight = Some(0.3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.proposer.models[0].endpoint = "elsewhere".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EndpointNotFound(name)) if name == "elsewhere"
        ));
    }

    #[test]
    fn test_bad_category_weights_rejected() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.scoring.calculation_accuracy = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_merge_inline_and_file() {
        let temp = TempDir::new().unwrap();
        let key_file = temp.path().join("api_keys.txt");
        std::fs::write(&key_file, "file-key-1\n\n  file-key-2  \n").unwrap();

        let mut config = Config::from_toml(MINIMAL).unwrap();
        if let Some(endpoint) = config.endpoints.get_mut("default") {
            endpoint.api_key_file = Some(key_file);
        }

        let keys = config.resolve_credentials("default").unwrap();
        let keys: Vec<&str> = keys.iter().map(|k| k.expose_secret()).collect();
        assert_eq!(keys, vec!["key-one", "key-two", "file-key-1", "file-key-2"]);
    }

    #[test]
    fn test_empty_pool_is_fatal_unless_keyless() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        if let Some(endpoint) = config.endpoints.get_mut("default") {
            endpoint.api_keys.clear();
        }
        assert!(matches!(
            config.resolve_credentials("default"),
            Err(ConfigError::NoCredentials { .. })
        ));

        if let Some(endpoint) = config.endpoints.get_mut("default") {
            endpoint.require_key = false;
        }
        let keys = config.resolve_credentials("default").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].expose_secret(), "");
    }

    #[test]
    fn test_unset_inline_placeholder_is_not_a_credential() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        if let Some(endpoint) = config.endpoints.get_mut("default") {
            endpoint.api_keys = vec!["${PHYSREV_UNSET_TEST_KEY}".to_string()];
        }
        assert!(matches!(
            config.resolve_credentials("default"),
            Err(ConfigError::NoCredentials { .. })
        ));

        if let Some(endpoint) = config.endpoints.get_mut("default") {
            endpoint.require_key = false;
        }
        let keys = config.resolve_credentials("default").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].expose_secret(), "");
    }

    #[test]
    fn test_duplicate_reviewer_names_rejected() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        config.reviewers[1].model.label = None;
        config.reviewers[1].model.id = "llama3.1:8b".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateModel { role: "reviewer", .. })
        ));

        // distinct names that map to the same store file
        config.reviewers[0].model.id = "a:b".to_string();
        config.reviewers[1].model.id = "a_b".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateModel { role: "reviewer", .. })
        ));
    }

    #[test]
    fn test_duplicate_proposer_names_rejected() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        let first = config.proposer.models[0].clone();
        config.proposer.models.push(first);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateModel { role: "proposer", .. })
        ));
    }

    #[test]
    fn test_missing_key_file_is_reported() {
        let mut config = Config::from_toml(MINIMAL).unwrap();
        if let Some(endpoint) = config.endpoints.get_mut("default") {
            endpoint.api_key_file = Some(PathBuf::from("/nonexistent/keys.txt"));
        }
        assert!(matches!(
            config.resolve_credentials("default"),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_unset_placeholder_is_kept() {
        let value = expand_env_vars("Bearer ${PHYSREV_SURELY_UNSET_VARIABLE}");
        assert_eq!(value, "Bearer ${PHYSREV_SURELY_UNSET_VARIABLE}");
    }
}
