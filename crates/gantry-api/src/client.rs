use std::time::Duration;

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Header carrying the API key on every authenticated request.
pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the workflow API.
#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result of probing the remote instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

/// Filters for `list_workflows`.
#[derive(Clone, Debug, Default)]
pub struct ListWorkflowsQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub active: Option<bool>,
}

/// One page of workflows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowPage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// REST client for the workflow-automation API.
pub struct WorkflowApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
}

impl WorkflowApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| ApiError::InvalidConfig(format!("base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidConfig(
                "base URL cannot carry a path".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Probe the instance's health endpoint.
    pub async fn health_check(&self) -> Result<HealthStatus, ApiError> {
        let url = self.endpoint(&["healthz"])?;
        let body = self.send(self.http.get(url)).await?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("ok")
            .to_string();
        Ok(HealthStatus { status })
    }

    pub async fn list_workflows(&self, query: &ListWorkflowsQuery) -> Result<WorkflowPage, ApiError> {
        let url = self.endpoint(&["api", "v1", "workflows"])?;
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(cursor) = &query.cursor {
            params.push(("cursor", cursor.clone()));
        }
        if let Some(active) = query.active {
            params.push(("active", active.to_string()));
        }
        let body = self.send(self.http.get(url).query(&params)).await?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Value, ApiError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ApiError::InvalidArgument("workflow id must be non-empty".into()));
        }
        let url = self.endpoint(&["api", "v1", "workflows", id])?;
        self.send(self.http.get(url)).await
    }

    /// POST to a webhook path (`webhook/<path>`). Non-JSON replies come back as a string.
    pub async fn trigger_webhook(&self, path: &str, payload: Option<&Value>) -> Result<Value, ApiError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(ApiError::InvalidArgument("webhook path must be non-empty".into()));
        }
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(ApiError::InvalidArgument("webhook path must not contain dot segments".into()));
        }
        let mut all = vec!["webhook"];
        all.extend(segments);
        let url = self.endpoint(&all)?;
        let request = match payload {
            Some(body) => self.http.post(url).json(body),
            None => self.http.post(url),
        };
        self.send(request).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidConfig("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "workflow API returned error status");
            return Err(ApiError::from_status(status.as_u16(), body));
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
