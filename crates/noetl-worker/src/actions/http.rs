//! Reference `http` action executor: issues one HTTP request from the
//! rendered `with` parameters (`method`, `url`, `headers`, `body`/`json`,
//! `timeout_seconds`) and reports the response as structured data.
//!
//! Network/timeout failures are classified `Transient` (retryable, per
//! §4.H step 4); a non-2xx response is reported as a successful
//! invocation whose `data.status` the playbook author can branch on,
//! matching how the original executor never conflates "the server
//! answered with an error" with "the request itself failed".

use std::time::Duration;

use async_trait::async_trait;
use noetl_core::Value;
use reqwest::Client;

use super::{ActionError, ActionExecutor, ActionOutcome};

pub struct HttpExecutor {
    client: Client,
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    async fn execute(
        &self,
        _action_spec: &Value,
        input_context: &Value,
    ) -> Result<ActionOutcome, ActionError> {
        let method = input_context
            .get_path("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let url = input_context
            .get_path("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Invalid("http action requires a `url` parameter".to_string()))?;

        let method: reqwest::Method = method
            .parse()
            .map_err(|_| ActionError::Invalid(format!("unsupported HTTP method: {method}")))?;

        let mut request = self.client.request(method, url);

        if let Some(headers) = input_context.get_path("headers").and_then(Value::as_map) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        if let Some(timeout_seconds) = input_context.get_path("timeout_seconds") {
            let seconds = match timeout_seconds {
                Value::Int(i) => Some(*i as u64),
                Value::Float(f) => Some(*f as u64),
                _ => None,
            };
            if let Some(seconds) = seconds {
                request = request.timeout(Duration::from_secs(seconds));
            }
        }

        if let Some(body) = input_context.get_path("json") {
            request = request.json(&body.to_json());
        } else if let Some(body) = input_context.get_path("body").and_then(Value::as_str) {
            request = request.body(body.to_string());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ActionError::Transient(e.to_string())
            } else {
                ActionError::Invalid(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ActionError::Transient(e.to_string()))?;
        let body_value = serde_json::from_str::<serde_json::Value>(&text)
            .map(Value::from_json)
            .unwrap_or(Value::String(text));

        let mut data = Value::map();
        data.insert("status", Value::Int(status as i64));
        data.insert("body", body_value);
        Ok(ActionOutcome::success(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_url() {
        let err = HttpExecutor::default()
            .execute(&Value::map(), &Value::map())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Invalid(_)));
    }

    #[tokio::test]
    async fn rejects_unsupported_method() {
        let mut ctx = Value::map();
        ctx.insert("method", Value::String("TELEPORT".to_string()));
        ctx.insert("url", Value::String("https://example.invalid".to_string()));
        let err = HttpExecutor::default().execute(&Value::map(), &ctx).await.unwrap_err();
        assert!(matches!(err, ActionError::Invalid(_)));
    }
}
