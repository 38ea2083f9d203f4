//! Response interpreter: raw model text → validated structured reply.
//!
//! Epistemic foundation:
//! - B_i: The reply contains one JSON object (might be wrapped in prose or fences)
//! - K_i: A record either passes every shape and range check or is rejected whole
//! - K_i: No retry at this layer; the runner counts the failure

mod extract;

pub use extract::{ParseStrategy, extract_json};

use crate::models::InterpretError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// A reply shape a model is asked to produce.
pub trait StructuredReply: DeserializeOwned {
    /// Schema name sent alongside the request.
    const NAME: &'static str;

    /// JSON schema for `response_format`.
    fn schema() -> Value;

    /// Range and content checks beyond deserialization.
    fn validate(&self) -> Result<(), InterpretError>;

    /// Identifier the model echoed back, if the shape carries one.
    fn reported_id(&self) -> Option<&str> {
        None
    }
}

/// Interpret `raw` as `T`.
///
/// A self-reported identifier that disagrees with `expected_id` is logged
/// and tolerated.
///
/// B_i(reply is well formed) → Result
pub fn interpret<T: StructuredReply>(raw: &str, expected_id: &str) -> Result<T, InterpretError> {
    let (value, strategy) = extract_json(raw)?;
    debug!(problem_id = %expected_id, ?strategy, "Extracted JSON from reply");

    let reply: T =
        serde_json::from_value(value).map_err(|e| InterpretError::Shape(e.to_string()))?;
    reply.validate()?;

    if let Some(reported) = reply.reported_id() {
        if reported != expected_id {
            warn!(
                problem_id = %expected_id,
                reported_id = %reported,
                "Reply reports a different problem id"
            );
        }
    }

    Ok(reply)
}

/// Require non-empty free text (proposer and refiner replies).
pub fn require_text(raw: &str) -> Result<String, InterpretError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(InterpretError::EmptyField("content".to_string()));
    }
    Ok(text.to_string())
}
