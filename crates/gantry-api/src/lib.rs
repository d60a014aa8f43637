//! Outbound REST client for the remote workflow-automation API.

mod client;
mod error;

pub use client::{ApiConfig, HealthStatus, ListWorkflowsQuery, WorkflowApiClient, WorkflowPage, API_KEY_HEADER};
pub use error::ApiError;
