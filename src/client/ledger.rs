//! Per-endpoint call accounting.
//!
//! Epistemic foundation:
//! - K_i: Every attempt ends in exactly one recorded outcome
//! - I^B: Which credentials are throttled is unknowable until they answer,
//!   so outcomes are tallied per pool position

use crate::models::FailureClass;
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome tallies for one credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialUsage {
    /// Redacted key, for display only
    pub suffix: String,
    pub requests: u64,
    pub successes: u64,
    pub rate_limited: u64,
    pub rejected: u64,
}

/// Thread-safe ledger of attempts made through one executor.
#[derive(Debug, Default)]
pub struct CallLedger {
    per_credential: DashMap<usize, CredentialUsage>,
    requests: AtomicU64,
    successes: AtomicU64,
    rate_limited: AtomicU64,
    rejected: AtomicU64,
    transient: AtomicU64,
    unreachable: AtomicU64,
    unusable: AtomicU64,
    cooldowns: AtomicU64,
    wait_ms: AtomicU64,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt.
    pub fn record_success(&self, index: usize, suffix: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        let mut usage = self.entry(index, suffix);
        usage.requests += 1;
        usage.successes += 1;
    }

    /// Record a failed attempt.
    pub fn record_failure(&self, index: usize, suffix: &str, class: FailureClass) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match class {
            FailureClass::RateLimited => &self.rate_limited,
            FailureClass::Rejected => &self.rejected,
            FailureClass::Transient => &self.transient,
            FailureClass::Unreachable => &self.unreachable,
            FailureClass::Unusable => &self.unusable,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut usage = self.entry(index, suffix);
        usage.requests += 1;
        match class {
            FailureClass::RateLimited => usage.rate_limited += 1,
            FailureClass::Rejected => usage.rejected += 1,
            _ => {}
        }
    }

    fn entry(&self, index: usize, suffix: &str) -> RefMut<'_, usize, CredentialUsage> {
        self.per_credential
            .entry(index)
            .or_insert_with(|| CredentialUsage {
                suffix: suffix.to_string(),
                ..CredentialUsage::default()
            })
    }

    /// Record a backoff sleep.
    pub fn record_wait(&self, duration: Duration, cooldown: bool) {
        if cooldown {
            self.cooldowns.fetch_add(1, Ordering::Relaxed);
        }
        self.wait_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Usage for the credential at `index` in the pool.
    pub fn usage(&self, index: usize) -> Option<CredentialUsage> {
        self.per_credential.get(&index).map(|u| u.clone())
    }

    /// Get statistics.
    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            transient: self.transient.load(Ordering::Relaxed),
            unreachable: self.unreachable.load(Ordering::Relaxed),
            unusable: self.unusable.load(Ordering::Relaxed),
            cooldowns: self.cooldowns.load(Ordering::Relaxed),
            wait: Duration::from_millis(self.wait_ms.load(Ordering::Relaxed)),
            credentials_used: self.per_credential.len(),
        }
    }
}

/// Snapshot of a ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStats {
    pub requests: u64,
    pub successes: u64,
    pub rate_limited: u64,
    pub rejected: u64,
    pub transient: u64,
    pub unreachable: u64,
    pub unusable: u64,
    pub cooldowns: u64,
    pub wait: Duration,
    pub credentials_used: usize,
}

impl std::fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} requests ({} ok, {} rate limited, {} rejected, {} transient, {} unreachable, {} unusable), {} cooldowns, {:.0}s waiting, {} credentials used",
            self.requests,
            self.successes,
            self.rate_limited,
            self.rejected,
            self.transient,
            self.unreachable,
            self.unusable,
            self.cooldowns,
            self.wait.as_secs_f64(),
            self.credentials_used
        )
    }
}
