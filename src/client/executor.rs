//! Retrying call executor.
//!
//! Epistemic foundation:
//! - K_i: Every failed attempt is classified before anything else happens
//! - B_i: Some credential in the pool can serve the request (might not)
//! - I^B: Rate limits and outages are unknowable in advance → rotate and back off
//!
//! State machine for one logical call:
//!
//! ```text
//! for credential in rotation:             (every credential once)
//!     for attempt in 1..=attempts:
//!         Ok            → return
//!         429           → cooldown, next credential
//!         400/401/403   → next credential
//!         other status  → delay, same credential
//!         no status     → next credential
//!         unusable body → fail call
//! fail call (exhausted)
//! ```

use crate::client::{CallLedger, CallRequest, CredentialPool, ModelEndpoint};
use crate::models::{CallError, CallFailure, FailureClass, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts_per_credential: u32,
    pub rate_limit_cooldown: Duration,
    pub transient_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts_per_credential: config.attempts_per_credential.max(1),
            rate_limit_cooldown: Duration::from_secs(config.rate_limit_cooldown_secs),
            transient_delay: Duration::from_secs(config.transient_delay_secs),
        }
    }
}

/// Performs logical calls against one endpoint, rotating its credentials.
///
/// Keeps no per-call state: only the pool cursor and the ledger survive
/// between calls.
pub struct Executor {
    endpoint: Arc<dyn ModelEndpoint>,
    pool: CredentialPool,
    policy: RetryPolicy,
    ledger: CallLedger,
}

impl Executor {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>, pool: CredentialPool, policy: RetryPolicy) -> Self {
        Self {
            endpoint,
            pool,
            policy,
            ledger: CallLedger::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn ledger(&self) -> &CallLedger {
        &self.ledger
    }

    /// Tokens the endpoint reported (prompt, completion).
    pub fn token_usage(&self) -> (u64, u64) {
        self.endpoint.token_usage()
    }

    /// Perform one logical call.
    ///
    /// B_i(some credential succeeds) → Result
    pub async fn call(&self, request: &CallRequest) -> Result<String, CallFailure> {
        let attempts = self.policy.attempts_per_credential.max(1);
        let mut last_error: Option<CallError> = None;

        for credential in self.pool.rotation() {
            let suffix = credential.suffix();

            for attempt in 1..=attempts {
                let error = match self.endpoint.send(credential, request).await {
                    Ok(text) => {
                        self.ledger.record_success(credential.index(), &suffix);
                        debug!(
                            endpoint = %self.name(),
                            credential = %suffix,
                            attempt,
                            "Call succeeded"
                        );
                        return Ok(text);
                    }
                    Err(error) => error,
                };

                let class = error.class();
                self.ledger.record_failure(credential.index(), &suffix, class);

                match class {
                    FailureClass::RateLimited => {
                        warn!(
                            endpoint = %self.name(),
                            credential = %suffix,
                            cooldown_secs = self.policy.rate_limit_cooldown.as_secs(),
                            "Rate limited, cooling down before next credential"
                        );
                        self.pause(self.policy.rate_limit_cooldown, true).await;
                        last_error = Some(error);
                        break;
                    }
                    FailureClass::Rejected => {
                        warn!(
                            endpoint = %self.name(),
                            credential = %suffix,
                            error = %error,
                            "Request rejected, skipping credential"
                        );
                        last_error = Some(error);
                        break;
                    }
                    FailureClass::Transient => {
                        warn!(
                            endpoint = %self.name(),
                            credential = %suffix,
                            attempt,
                            error = %error,
                            "Transient failure"
                        );
                        last_error = Some(error);
                        if attempt < attempts {
                            self.pause(self.policy.transient_delay, false).await;
                        }
                    }
                    FailureClass::Unreachable => {
                        warn!(
                            endpoint = %self.name(),
                            credential = %suffix,
                            error = %error,
                            "Endpoint unreachable, trying next credential"
                        );
                        last_error = Some(error);
                        break;
                    }
                    FailureClass::Unusable => {
                        warn!(
                            endpoint = %self.name(),
                            credential = %suffix,
                            error = %error,
                            "Endpoint answered without usable content"
                        );
                        return Err(CallFailure::Unusable(error));
                    }
                }
            }
        }

        Err(CallFailure::Exhausted {
            credentials: self.pool.len(),
            last_error: last_error
                .unwrap_or_else(|| CallError::Network("no attempt was made".to_string())),
        })
    }

    async fn pause(&self, duration: Duration, cooldown: bool) {
        if duration.is_zero() {
            return;
        }
        self.ledger.record_wait(duration, cooldown);
        tokio::time::sleep(duration).await;
    }
}
