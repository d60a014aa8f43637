//! Built-in tools exposed over MCP.
//!
//! Every tool talks to the workflow-automation REST API through a shared
//! [`WorkflowApiClient`]. When no client is configured the tools stay
//! listed but answer with [`ToolError::NotConfigured`].

use std::sync::Arc;

use gantry_api::{ApiError, WorkflowApiClient};
use gantry_mcp::{ToolCatalogue, ToolError};

mod webhook;
mod workflows;

pub use webhook::TriggerWebhookTool;
pub use workflows::{GetWorkflowTool, HealthTool, ListWorkflowsTool};

/// Register all built-in tools on `catalogue`.
pub fn register_builtin_tools(catalogue: &mut ToolCatalogue, client: Option<Arc<WorkflowApiClient>>) {
    catalogue.register(Arc::new(HealthTool::new(client.clone())));
    catalogue.register(Arc::new(ListWorkflowsTool::new(client.clone())));
    catalogue.register(Arc::new(GetWorkflowTool::new(client.clone())));
    catalogue.register(Arc::new(TriggerWebhookTool::new(client)));
    tracing::debug!(count = catalogue.count(), "registered built-in tools");
}

fn require_client(client: Option<&Arc<WorkflowApiClient>>) -> Result<&WorkflowApiClient, ToolError> {
    client.map(Arc::as_ref).ok_or_else(|| {
        ToolError::NotConfigured("workflow API URL and key are not set".into())
    })
}

fn api_failure(e: ApiError) -> ToolError {
    match e {
        ApiError::InvalidArgument(msg) => ToolError::InvalidArguments(msg),
        other => ToolError::ExecutionFailed(other.to_string()),
    }
}
