use std::sync::Arc;

use async_trait::async_trait;
use gantry_api::WorkflowApiClient;
use gantry_mcp::{Tool, ToolError};
use serde_json::{json, Value};

use crate::{api_failure, require_client};

/// Fires a production webhook, starting the workflow behind it.
pub struct TriggerWebhookTool {
    client: Option<Arc<WorkflowApiClient>>,
}

impl TriggerWebhookTool {
    pub fn new(client: Option<Arc<WorkflowApiClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for TriggerWebhookTool {
    fn name(&self) -> &str {
        "trigger_webhook"
    }

    fn description(&self) -> &str {
        "Trigger a workflow through its webhook path, optionally with a JSON payload"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Webhook path, e.g. orders/new" },
                "payload": { "type": "object", "description": "JSON body to send" }
            },
            "required": ["path"]
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let client = require_client(self.client.as_ref())?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("path is required".into()))?;
        let payload = args.get("payload").filter(|p| !p.is_null());
        let response = client.trigger_webhook(path, payload).await.map_err(api_failure)?;
        Ok(json!({ "response": response }))
    }
}
