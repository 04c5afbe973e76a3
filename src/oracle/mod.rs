//! Decision oracles.
//!
//! An oracle answers one question per active agent per step: would this
//! persona engage with the message and pass it on? The answer is a
//! [`Verdict`] with a priority in `[0, 1]` that drives the branching factor.
//!
//! Oracles are unreliable by contract. Any [`OracleError`] is turned into a
//! [`Verdict::fallback`] by the engine, so implementations simply return
//! `Err` and never need to invent their own defaults.
//!
//! # Implementations
//!
//! | Oracle           | Backend                                   |
//! |------------------|-------------------------------------------|
//! | [`LlmOracle`]    | OpenAI-compatible `/chat/completions`     |
//! | [`HttpOracle`]   | Remote `decide-engagement` service        |
//! | [`RandomOracle`] | Local coin flips (offline demos)          |

mod http;
mod llm;
mod random;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{OracleConfig, OracleKind};
use crate::engine::RandomSource;
use crate::error::{OracleError, Result, ViewsError};
use crate::graph::AgentNode;

pub use http::HttpOracle;
pub use llm::LlmOracle;
pub use random::RandomOracle;

/// Reason recorded when the oracle could not be reached
pub const FALLBACK_REASON: &str = "fallback: oracle unavailable";

/// Priority of a fallback verdict
pub const FALLBACK_PRIORITY: f64 = 0.5;

/// An engage/reject decision for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Spread the message
    pub engage: bool,
    /// Short rationale
    pub reason: String,
    /// How much the persona cares, in `[0, 1]`
    pub priority: f64,
}

impl Verdict {
    /// Create a verdict, clamping `priority` into `[0, 1]`
    pub fn new(engage: bool, reason: impl Into<String>, priority: f64) -> Self {
        let priority = if priority.is_nan() {
            FALLBACK_PRIORITY
        } else {
            priority.clamp(0.0, 1.0)
        };
        Self {
            engage,
            reason: reason.into(),
            priority,
        }
    }

    /// Engage with the given priority
    pub fn engage(reason: impl Into<String>, priority: f64) -> Self {
        Self::new(true, reason, priority)
    }

    /// Reject with the given priority
    pub fn reject(reason: impl Into<String>, priority: f64) -> Self {
        Self::new(false, reason, priority)
    }

    /// Substitute verdict for a failed oracle call.
    ///
    /// Engages iff a uniform draw is `>= 0.5`.
    pub fn fallback(rng: &mut dyn RandomSource) -> Self {
        let engage = rng.next_unit() >= 0.5;
        Self::new(engage, FALLBACK_REASON, FALLBACK_PRIORITY)
    }
}

/// What the oracle is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Agent identifier
    #[serde(alias = "personaId")]
    pub persona_id: String,
    /// Seed message being spread
    pub message: String,
    /// Display name, for prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_name: Option<String>,
    /// Persona archetype, for prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_type: Option<String>,
    /// Personality description, for prompts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OracleRequest {
    /// Bare request with only the wire fields
    pub fn new(persona_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            message: message.into(),
            persona_name: None,
            persona_type: None,
            description: None,
        }
    }

    /// Request carrying the node's persona profile
    pub fn for_node(node: &AgentNode, message: &str) -> Self {
        Self {
            persona_id: node.id.clone(),
            message: message.to_string(),
            persona_name: Some(node.name.clone()),
            persona_type: node.persona_type.clone(),
            description: node.description.clone(),
        }
    }
}

/// Source of engage/reject verdicts.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Decide whether the persona spreads the message
    async fn decide(&self, request: &OracleRequest) -> std::result::Result<Verdict, OracleError>;

    /// Short name for logs
    fn name(&self) -> &str {
        "oracle"
    }
}

#[async_trait]
impl<T: DecisionOracle + ?Sized> DecisionOracle for Arc<T> {
    async fn decide(&self, request: &OracleRequest) -> std::result::Result<Verdict, OracleError> {
        (**self).decide(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the oracle selected by `config`
pub fn build_oracle(config: &OracleConfig, seed: Option<u64>) -> Result<Arc<dyn DecisionOracle>> {
    let oracle: Arc<dyn DecisionOracle> = match config.kind {
        OracleKind::Llm => Arc::new(LlmOracle::from_config(config)?),
        OracleKind::Http => {
            let url = config.decide_url.as_deref().ok_or_else(|| {
                ViewsError::Config("oracle.decide_url is required for the http oracle".into())
            })?;
            Arc::new(HttpOracle::new(url, config)?)
        },
        OracleKind::Random => Arc::new(match seed {
            Some(seed) => RandomOracle::seeded(seed),
            None => RandomOracle::new(),
        }),
    };
    Ok(oracle)
}

/// Raw verdict as models tend to write it
#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    engage: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<serde_json::Value>,
    #[serde(default)]
    priority: Option<serde_json::Value>,
}

/// Parse a verdict out of free-form model output.
///
/// Accepts bare JSON or JSON wrapped in a Markdown code fence (optionally
/// tagged `json`). Missing fields default to `engage = false`,
/// `reason = "No reason given"` and `priority = 0.5`.
pub fn parse_verdict(content: &str) -> std::result::Result<Verdict, OracleError> {
    let body = strip_code_fence(content.trim());
    if body.is_empty() {
        return Err(OracleError::MalformedResponse("empty response".into()));
    }

    let raw: RawVerdict = serde_json::from_str(body)
        .map_err(|e| OracleError::MalformedResponse(format!("invalid verdict JSON: {e}")))?;

    let engage = match raw.engage {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        Some(other) => {
            return Err(OracleError::MalformedResponse(format!(
                "engage must be a boolean, got {other}"
            )))
        },
    };

    let reason = match raw.reason {
        None | Some(serde_json::Value::Null) => "No reason given".to_string(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    };

    let priority = match raw.priority {
        None | Some(serde_json::Value::Null) => FALLBACK_PRIORITY,
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(FALLBACK_PRIORITY),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
            OracleError::MalformedResponse(format!("priority is not a number: {s}"))
        })?,
        Some(other) => {
            return Err(OracleError::MalformedResponse(format!(
                "priority must be a number, got {other}"
            )))
        },
    };

    Ok(Verdict::new(engage, reason, priority))
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = match rest.find("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    rest.trim()
}
