//! Credential rotation.
//!
//! Epistemic foundation:
//! - K_i: The pool is non-empty once constructed
//! - K_i: One atomic cursor is the only mutable state
//! - B_i: Any single credential may be exhausted or revoked → rotate

use crate::models::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One API credential. Never printed in full.
#[derive(Clone)]
pub struct Credential {
    secret: SecretString,
    index: usize,
}

impl Credential {
    pub fn new(secret: SecretString) -> Self {
        Self { secret, index: 0 }
    }

    /// Position in the owning pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw value, for building the Authorization header only.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Keyless endpoints carry a single empty credential.
    pub fn is_anonymous(&self) -> bool {
        self.expose().is_empty()
    }

    /// Last five characters, for logs.
    pub fn suffix(&self) -> String {
        let chars: Vec<char> = self.expose().chars().collect();
        if chars.is_empty() {
            return "anonymous".to_string();
        }
        let start = chars.len().saturating_sub(5);
        format!("...{}", chars[start..].iter().collect::<String>())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.suffix()).finish()
    }
}

/// Ordered pool of credentials with a wrapping round-robin cursor.
///
/// Safe for concurrent callers: every read of the cursor is a single
/// `fetch_add`, so two callers never observe the same step.
pub struct CredentialPool {
    endpoint: String,
    credentials: Vec<Credential>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Build a pool. Fails only when `secrets` is empty.
    pub fn new(endpoint: impl Into<String>, secrets: Vec<SecretString>) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into();
        if secrets.is_empty() {
            return Err(ConfigError::NoCredentials { endpoint });
        }
        Ok(Self {
            endpoint,
            credentials: secrets
                .into_iter()
                .enumerate()
                .map(|(index, secret)| Credential { secret, index })
                .collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Next credential in round-robin order, forever.
    pub fn next(&self) -> &Credential {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.credentials.len();
        &self.credentials[index]
    }

    /// Reserve one cursor step and yield every credential exactly once,
    /// starting at the reserved position.
    pub fn rotation(&self) -> impl Iterator<Item = &Credential> + '_ {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let len = self.credentials.len();
        (0..len).map(move |offset| &self.credentials[(start + offset) % len])
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .finish()
    }
}
