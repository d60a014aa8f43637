//! Bearer-token gate for the protected routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use gantry_core::{Credential, GatewayError};
use tracing::debug;

use crate::error::ErrorResponse;

const SCHEME: &str = "Bearer ";

/// Reject the request unless it carries `Authorization: Bearer <secret>`.
pub async fn require_bearer(
    State(credential): State<Arc<Credential>>,
    request: Request,
    next: Next,
) -> Result<Response, ErrorResponse> {
    let token = match bearer_token(request.headers()) {
        Ok(token) => token,
        Err(e) => {
            debug!(path = %request.uri().path(), kind = e.error_kind(), "rejected request");
            return Err(e.into());
        }
    };
    if !credential.verify(token) {
        debug!(path = %request.uri().path(), kind = "invalid_credential", "rejected request");
        return Err(GatewayError::InvalidCredential.into());
    }
    Ok(next.run(request).await)
}

/// Extract the token from the `Authorization` header.
///
/// An absent header is `MissingCredential`. A header that is not valid
/// text, uses another scheme, or carries an empty token is
/// `MalformedCredential`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(GatewayError::MissingCredential)?;
    let value = value
        .to_str()
        .map_err(|_| GatewayError::MalformedCredential)?;
    let token = value
        .strip_prefix(SCHEME)
        .ok_or(GatewayError::MalformedCredential)?
        .trim();
    if token.is_empty() {
        return Err(GatewayError::MalformedCredential);
    }
    Ok(token)
}
