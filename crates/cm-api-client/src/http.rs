use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{ApiClient, ApiError, Method};

const DEFAULT_ENDPOINT: &str = "http://localhost:3000";

/// HTTP transport for the backend.
///
/// Reads `CM_API_URL` from the environment when no endpoint is given
/// (default: `http://localhost:3000`).
pub struct HttpApiClient {
    endpoint: String,
    http: reqwest::Client,
}

impl Default for HttpApiClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl HttpApiClient {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("CM_API_URL").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.endpoint, path);
        let builder = match method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Put => self.http.put(&url),
            Method::Delete => self.http.delete(&url),
        };
        let builder = match &body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let transport = |err: reqwest::Error| ApiError::Transport {
            path: path.to_owned(),
            message: err.to_string(),
        };

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        debug!(%method, path, status = status.as_u16(), bytes = text.len(), "api response");

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                path: path.to_owned(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|err| ApiError::Decode {
            path: path.to_owned(),
            reason: format!("JSON parse error: {err}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let client = HttpApiClient::new(Some("http://billing.local:8080/".into()));
        assert_eq!(client.endpoint(), "http://billing.local:8080");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = HttpApiClient::new(Some("http://127.0.0.1:9".into()));
        let err = client
            .request(Method::Get, "/api/customers", None)
            .await
            .expect_err("nothing listens on port 9");
        assert!(matches!(err, ApiError::Transport { .. }));
    }
}
