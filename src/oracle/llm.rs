//! LLM-backed decision oracle.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint (OpenAI,
//! OpenRouter, vLLM, Ollama's compatibility layer) and asks the model to
//! role-play the persona.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{parse_verdict, DecisionOracle, OracleRequest, Verdict};
use crate::config::OracleConfig;
use crate::error::{OracleError, Result, ViewsError};

const SYSTEM_PROMPT: &str =
    "You are a decision-making assistant. Always respond with valid JSON only.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Oracle that asks a chat model to decide in character.
#[derive(Debug, Clone)]
pub struct LlmOracle {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmOracle {
    /// Create from oracle configuration
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ViewsError::Config(format!("Failed to create HTTP client: {e}")))?;

        if config.api_key.is_none() {
            tracing::warn!(
                "No API key configured for {}; requests are sent unauthenticated",
                config.base_url
            );
        }

        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Set the chat model
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Chat completions URL requests go to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(&self, prompt: String) -> std::result::Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::MalformedResponse("no choices in completion".into()))
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn decide(&self, request: &OracleRequest) -> std::result::Result<Verdict, OracleError> {
        let content = self.complete(engagement_prompt(request)).await?;
        let verdict = parse_verdict(&content)?;
        tracing::debug!(
            persona = %request.persona_id,
            engage = verdict.engage,
            priority = verdict.priority,
            "LLM verdict"
        );
        Ok(verdict)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Prompt asking the model to decide in character
fn engagement_prompt(request: &OracleRequest) -> String {
    let name = request
        .persona_name
        .as_deref()
        .unwrap_or(&request.persona_id);
    let persona_type = request.persona_type.as_deref().unwrap_or("person");
    let personality = request
        .description
        .as_deref()
        .unwrap_or("No particular personality was given; use your best judgement.");

    format!(
        r#"You are {name}, a {persona_type}.

Your personality: {personality}

You just heard this message/topic: "{message}"

Would you engage with this message and share it with others?

Consider:
- Does this topic interest you based on your personality?
- Is this relevant to your expertise or concerns?
- Would you want to discuss or spread this information?

Respond in JSON format:
{{
    "engage": true/false,
    "reason": "brief explanation (10-20 words)",
    "priority": 0.0-1.0 (how much you care)
}}

Be authentic to your character. Only engage if it truly matches your interests."#,
        message = request.message,
    )
}
