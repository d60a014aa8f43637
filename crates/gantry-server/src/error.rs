use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gantry_core::GatewayError;
use tracing::{debug, warn};

/// HTTP rendering of a [`GatewayError`]: its status code and a body of the
/// form `{"error": "<fixed sentence>"}`.
#[derive(Debug)]
pub struct ErrorResponse(pub GatewayError);

impl From<GatewayError> for ErrorResponse {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_server_error() {
            warn!(kind = self.0.error_kind(), status = status.as_u16(), "request failed");
        } else if self.0.is_client_error() {
            debug!(kind = self.0.error_kind(), status = status.as_u16(), "request rejected");
        }
        let body = serde_json::json!({ "error": self.0.public_message() });
        (status, Json(body)).into_response()
    }
}
