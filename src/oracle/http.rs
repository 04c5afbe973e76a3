//! Remote decide-engagement oracle.
//!
//! Posts `{persona_id, message}` to a service that owns the persona store
//! and answers `{engage, reason, priority}`. A `views serve` instance is such
//! a service (`POST /decide-engagement`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{DecisionOracle, OracleRequest, Verdict};
use crate::config::OracleConfig;
use crate::error::{OracleError, Result, ViewsError};

#[derive(Debug, Serialize)]
struct DecideRequest<'a> {
    persona_id: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct DecideResponse {
    engage: bool,
    #[serde(default)]
    reason: Option<String>,
    priority: f64,
}

/// Oracle backed by a remote HTTP decision service.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: Client,
    url: String,
}

impl HttpOracle {
    /// Create an oracle posting to `url`
    pub fn new(url: &str, config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ViewsError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Endpoint requests go to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn decide(&self, request: &OracleRequest) -> std::result::Result<Verdict, OracleError> {
        let response = self
            .client
            .post(&self.url)
            .json(&DecideRequest {
                persona_id: &request.persona_id,
                message: &request.message,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(OracleError::UnknownPersona(request.persona_id.clone())),
            status if !status.is_success() => Err(OracleError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
            _ => {
                let body: DecideResponse = response.json().await?;
                if !body.priority.is_finite() {
                    return Err(OracleError::MalformedResponse(format!(
                        "priority is not finite: {}",
                        body.priority
                    )));
                }
                Ok(Verdict::new(
                    body.engage,
                    body.reason.unwrap_or_else(|| "No reason given".to_string()),
                    body.priority,
                ))
            },
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Json, http::StatusCode, routing::post, Router};
    use serde_json::{json, Value};

    async fn decision_service() -> String {
        let router = Router::new().route(
            "/decide-engagement",
            post(|Json(body): Json<Value>| async move {
                match body["persona_id"].as_str() {
                    Some("ghost") => (StatusCode::NOT_FOUND, Json(json!({"detail": "not found"}))),
                    Some("broken") => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
                    Some(id) => (
                        StatusCode::OK,
                        Json(json!({
                            "persona_id": id,
                            "engage": body["message"] == "cats",
                            "reason": "depends on the topic",
                            "priority": 0.75,
                        })),
                    ),
                    None => (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({}))),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}/decide-engagement")
    }

    #[tokio::test]
    async fn test_http_oracle_verdicts() {
        let url = decision_service().await;
        let oracle = HttpOracle::new(&url, &OracleConfig::default()).unwrap();
        assert_eq!(oracle.url(), url);

        let yes = oracle.decide(&OracleRequest::new("p1", "cats")).await.unwrap();
        assert!(yes.engage);
        assert_eq!(yes.reason, "depends on the topic");
        assert!((yes.priority - 0.75).abs() < 1e-9);

        let no = oracle.decide(&OracleRequest::new("p1", "taxes")).await.unwrap();
        assert!(!no.engage);
    }

    #[tokio::test]
    async fn test_http_oracle_errors() {
        let url = decision_service().await;
        let oracle = HttpOracle::new(&url, &OracleConfig::default()).unwrap();

        let missing = oracle.decide(&OracleRequest::new("ghost", "cats")).await;
        assert_eq!(missing, Err(OracleError::UnknownPersona("ghost".into())));

        let broken = oracle.decide(&OracleRequest::new("broken", "cats")).await;
        assert!(matches!(broken, Err(OracleError::Status { status: 500, .. })));
    }
}
