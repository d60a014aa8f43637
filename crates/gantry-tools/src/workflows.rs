use std::sync::Arc;

use async_trait::async_trait;
use gantry_api::{ListWorkflowsQuery, WorkflowApiClient};
use gantry_mcp::{Tool, ToolError};
use serde_json::{json, Value};

use crate::{api_failure, require_client};

/// Probes the remote instance's health endpoint.
pub struct HealthTool {
    client: Option<Arc<WorkflowApiClient>>,
}

impl HealthTool {
    pub fn new(client: Option<Arc<WorkflowApiClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for HealthTool {
    fn name(&self) -> &str {
        "workflow_api_health"
    }

    fn description(&self) -> &str {
        "Check that the workflow automation instance is reachable"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let client = require_client(self.client.as_ref())?;
        let health = client.health_check().await.map_err(api_failure)?;
        Ok(json!({ "status": health.status, "baseUrl": client.base_url() }))
    }
}

/// Lists workflows, one page at a time.
pub struct ListWorkflowsTool {
    client: Option<Arc<WorkflowApiClient>>,
}

impl ListWorkflowsTool {
    pub fn new(client: Option<Arc<WorkflowApiClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ListWorkflowsTool {
    fn name(&self) -> &str {
        "list_workflows"
    }

    fn description(&self) -> &str {
        "List workflows. Pass the returned nextCursor to fetch the following page."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "description": "Page size" },
                "cursor": { "type": "string", "description": "Cursor from a previous page" },
                "active": { "type": "boolean", "description": "Only active or inactive workflows" }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let client = require_client(self.client.as_ref())?;
        let limit = match args.get("limit").and_then(Value::as_u64) {
            Some(n) => Some(
                u32::try_from(n).map_err(|_| ToolError::InvalidArguments("limit is too large".into()))?,
            ),
            None => None,
        };
        let query = ListWorkflowsQuery {
            limit,
            cursor: args.get("cursor").and_then(Value::as_str).map(str::to_string),
            active: args.get("active").and_then(Value::as_bool),
        };
        let page = client.list_workflows(&query).await.map_err(api_failure)?;
        serde_json::to_value(page).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}

/// Fetches one workflow by id.
pub struct GetWorkflowTool {
    client: Option<Arc<WorkflowApiClient>>,
}

impl GetWorkflowTool {
    pub fn new(client: Option<Arc<WorkflowApiClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GetWorkflowTool {
    fn name(&self) -> &str {
        "get_workflow"
    }

    fn description(&self) -> &str {
        "Fetch a single workflow, including its nodes and connections"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Workflow id" }
            },
            "required": ["id"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let client = require_client(self.client.as_ref())?;
        let id = args
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("id is required".into()))?;
        client.get_workflow(id).await.map_err(api_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_api::ApiConfig;
    use secrecy::SecretString;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> Option<Arc<WorkflowApiClient>> {
        let config = ApiConfig::new(server.uri(), SecretString::from("key".to_string()));
        Some(Arc::new(WorkflowApiClient::new(config).unwrap()))
    }

    #[tokio::test]
    async fn unconfigured_tool_reports_not_configured() {
        let err = HealthTool::new(None).call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotConfigured(_)));
        let err = GetWorkflowTool::new(None).call(json!({"id": "1"})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn health_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let out = HealthTool::new(client_for(&server)).call(json!({})).await.unwrap();
        assert_eq!(out["status"], "ok");
    }

    #[tokio::test]
    async fn list_forwards_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "7"}],
                "nextCursor": null
            })))
            .mount(&server)
            .await;

        let out = ListWorkflowsTool::new(client_for(&server))
            .call(json!({"cursor": "page2"}))
            .await
            .unwrap();
        assert_eq!(out["data"][0]["id"], "7");
        assert!(out.get("nextCursor").is_none());
    }

    #[tokio::test]
    async fn get_workflow_server_error_is_execution_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows/9"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = GetWorkflowTool::new(client_for(&server))
            .call(json!({"id": "9"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn get_workflow_blank_id_is_invalid() {
        let server = MockServer::start().await;
        let err = GetWorkflowTool::new(client_for(&server))
            .call(json!({"id": " "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
