use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::Check;
use crate::models::SendRequest;

/// Task type served by [`ExternalApiCheck`].
pub const EXTERNAL_API: &str = "external-api";

/// Asks an external HTTP classifier about the prompt.
///
/// The prompt is POSTed as JSON. A non-2xx status is an execution error.
/// A 2xx body carrying a boolean `passed` or a string `verdict` decides the
/// outcome, and one carrying either key with another type is an error. Any
/// other 2xx body counts as a pass, since the endpoint answered.
pub struct ExternalApiCheck {
    api_url: String,
    client: reqwest::Client,
}

impl ExternalApiCheck {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Read the decision out of a 2xx body.
    ///
    /// A body that is not a JSON object, or an object without `passed` or
    /// `verdict`, passes. A decision field of the wrong type is an error.
    fn parse_response(body: &str) -> Result<bool> {
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
            return Ok(true);
        };
        if let Some(passed) = fields.get("passed") {
            return match passed {
                Value::Bool(passed) => Ok(*passed),
                other => bail!("malformed classifier response: passed is {other}"),
            };
        }
        match fields.get("verdict") {
            Some(Value::String(verdict)) => Ok(verdict.trim().eq_ignore_ascii_case("benign")),
            Some(other) => bail!("malformed classifier response: verdict is {other}"),
            None => Ok(true),
        }
    }
}

#[async_trait]
impl Check for ExternalApiCheck {
    fn name(&self) -> &str {
        EXTERNAL_API
    }

    async fn evaluate(&self, request: &SendRequest) -> Result<bool> {
        let body = ApiRequest {
            user_id: request.user_id,
            chat_id: request.chat_id,
            prompt: &request.prompt,
        };

        let resp = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.api_url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("classifier returned {}: {}", status, text);
        }

        let text = resp
            .text()
            .await
            .context("failed to read classifier response")?;
        debug!(status = %status, bytes = text.len(), "classifier responded");

        Self::parse_response(&text)
    }
}

// --- API types ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<Uuid>,
    prompt: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passed_field_decides() {
        assert!(ExternalApiCheck::parse_response(r#"{"passed": true}"#).unwrap());
        assert!(!ExternalApiCheck::parse_response(r#"{"passed": false}"#).unwrap());
    }

    #[test]
    fn verdict_field_decides() {
        assert!(ExternalApiCheck::parse_response(r#"{"verdict": "Benign"}"#).unwrap());
        assert!(!ExternalApiCheck::parse_response(r#"{"verdict": "malicious"}"#).unwrap());
    }

    #[test]
    fn passed_wins_over_verdict() {
        let body = r#"{"passed": false, "verdict": "benign"}"#;
        assert!(!ExternalApiCheck::parse_response(body).unwrap());
    }

    #[test]
    fn non_json_body_passes() {
        assert!(ExternalApiCheck::parse_response("<html>ok</html>").unwrap());
        assert!(ExternalApiCheck::parse_response("").unwrap());
        assert!(ExternalApiCheck::parse_response("{}").unwrap());
        assert!(ExternalApiCheck::parse_response("[false]").unwrap());
        assert!(ExternalApiCheck::parse_response(r#"{"status": "ok"}"#).unwrap());
    }

    #[test]
    fn wrongly_typed_decision_is_an_error() {
        for body in [
            r#"{"passed": "false"}"#,
            r#"{"passed": null}"#,
            r#"{"verdict": 0}"#,
            r#"{"verdict": ["benign"]}"#,
        ] {
            let err = ExternalApiCheck::parse_response(body).unwrap_err();
            assert!(err.to_string().contains("malformed classifier response"), "{body}");
        }
    }

    #[test]
    fn name_is_external_api() {
        let check = ExternalApiCheck::new("http://localhost:1");
        assert_eq!(check.name(), "external-api");
        assert_eq!(check.api_url(), "http://localhost:1");
    }
}
