use crate::protocol::PushError;

/// Failures the gateway surfaces to remote clients.
///
/// Every variant maps to a fixed HTTP status and a fixed public sentence.
/// Neither ever includes the configured secret, the presented token, or
/// text from a downstream error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("missing credential")]
    MissingCredential,
    #[error("malformed credential")]
    MalformedCredential,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("missing routing key")]
    MissingRoutingKey,
    #[error("unknown session")]
    UnknownSession,
    #[error("malformed payload")]
    MalformedPayload,
    #[error("downstream establish failure")]
    DownstreamEstablishFailure,
    #[error("downstream processing failure")]
    DownstreamProcessingFailure,
}

impl GatewayError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingCredential | Self::MalformedCredential => 401,
            Self::InvalidCredential => 403,
            Self::MissingRoutingKey | Self::MalformedPayload => 400,
            Self::UnknownSession => 404,
            Self::DownstreamEstablishFailure | Self::DownstreamProcessingFailure => 500,
        }
    }

    /// The only text a client ever sees for this error.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingCredential => "Authentication required",
            Self::MalformedCredential => "Malformed authorization header",
            Self::InvalidCredential => "Invalid authentication token",
            Self::MissingRoutingKey => "Missing sessionId query parameter",
            Self::UnknownSession => "Session not found",
            Self::MalformedPayload => "Request body is not valid JSON",
            Self::DownstreamEstablishFailure => "Failed to establish session",
            Self::DownstreamProcessingFailure => "Failed to process message",
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedCredential => "malformed_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::MissingRoutingKey => "missing_routing_key",
            Self::UnknownSession => "unknown_session",
            Self::MalformedPayload => "malformed_payload",
            Self::DownstreamEstablishFailure => "downstream_establish_failure",
            Self::DownstreamProcessingFailure => "downstream_processing_failure",
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

/// Failures raised by a protocol core or one of its connections.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("establish failed: {0}")]
    Establish(String),

    #[error("connection closed")]
    Closed,

    #[error("push failed: {0}")]
    Push(#[from] PushError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
