//! JSON extraction strategies, tried in order until one parses.

use crate::models::InterpretError;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)```(?:json)?\s*(\{[\s\S]*?\})\s*```").ok());

/// How a JSON object was found in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The whole reply is JSON
    Direct,
    /// Inside a ``` or ```json fence
    FencedBlock,
    /// From the first `{` to the last `}`
    BraceSpan,
}

impl ParseStrategy {
    pub const CHAIN: [ParseStrategy; 3] = [Self::Direct, Self::FencedBlock, Self::BraceSpan];

    /// Candidate JSON text for this strategy, if any.
    fn candidate(self, raw: &str) -> Option<&str> {
        match self {
            Self::Direct => Some(raw.trim()),
            Self::FencedBlock => FENCED
                .as_ref()?
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str()),
            Self::BraceSpan => {
                let start = raw.find('{')?;
                let end = raw.rfind('}')?;
                (end > start).then(|| &raw[start..=end])
            }
        }
    }
}

/// Find the first JSON object in `raw`.
pub fn extract_json(raw: &str) -> Result<(Value, ParseStrategy), InterpretError> {
    for strategy in ParseStrategy::CHAIN {
        let Some(candidate) = strategy.candidate(raw) else {
            continue;
        };
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
            return Ok((value, strategy));
        }
    }
    Err(InterpretError::NoJson)
}
