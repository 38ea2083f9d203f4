//! Scripted in-memory endpoint for tests.

use crate::client::{CallRequest, Credential, CredentialPool, ModelEndpoint};
use crate::models::CallError;
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::VecDeque;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&CallRequest) -> Result<String, CallError> + Send + Sync>;

/// Replays queued outcomes in order, then falls back to a responder.
///
/// Records which credential served every attempt and every request seen.
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<Result<String, CallError>>>,
    responder: Option<Responder>,
    credentials: Mutex<Vec<String>>,
    requests: Mutex<Vec<CallRequest>>,
}

impl ScriptedEndpoint {
    pub fn new(script: Vec<Result<String, CallError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            credentials: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with `responder`.
    pub fn responding(
        responder: impl Fn(&CallRequest) -> Result<String, CallError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new(Vec::new())
        }
    }

    /// Raw credential values, one per attempt.
    pub fn credentials_used(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }

    /// Every request received, one per attempt.
    pub fn requests(&self) -> Vec<CallRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelEndpoint for ScriptedEndpoint {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, credential: &Credential, request: &CallRequest) -> Result<String, CallError> {
        self.credentials
            .lock()
            .unwrap()
            .push(credential.expose().to_string());
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self.script.lock().unwrap().pop_front();
        match (scripted, &self.responder) {
            (Some(outcome), _) => outcome,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(status(500)),
        }
    }
}

pub fn status(code: u16) -> CallError {
    CallError::Status {
        status: code,
        message: format!("scripted {code}"),
    }
}

pub fn pool(keys: &[&str]) -> CredentialPool {
    CredentialPool::new(
        "scripted",
        keys.iter().map(|k| SecretString::from(k.to_string())).collect(),
    )
    .unwrap()
}
