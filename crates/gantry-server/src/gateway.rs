//! HTTP routes: `GET /sse` opens a session, `POST /messages` delivers into
//! one, `GET /health` is the unauthenticated liveness probe.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use futures::{future, stream, StreamExt};
use gantry_core::{Credential, GatewayError, ProtocolCore, QueueSink, SessionId};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::config::ServerConfig;
use crate::error::ErrorResponse;
use crate::registry::SessionRegistry;
use crate::session::ChannelSession;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages";
pub const HEALTH_PATH: &str = "/health";

const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub core: Arc<dyn ProtocolCore>,
    pub credential: Arc<Credential>,
    pub config: Arc<ServerConfig>,
}

/// Build the router with auth on the session routes only.
pub fn build_router(state: GatewayState) -> Router {
    let protected = Router::new()
        .route(SSE_PATH, get(subscribe))
        .route(MESSAGES_PATH, post(deliver))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.credential),
            auth::require_bearer,
        ));

    Router::new()
        .merge(protected)
        .route(HEALTH_PATH, get(health))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// De-registers the session when dropped. Held from registration onwards,
/// so an abandoned subscribe or a disconnected stream both release it.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.registry.remove(self.id.as_str()) {
            info!(session_id = %self.id, "session released");
        }
    }
}

async fn subscribe(State(state): State<GatewayState>) -> Result<Response, ErrorResponse> {
    let session = Arc::new(ChannelSession::new());
    let id = session.id().clone();

    // must be in the registry before the id reaches the client
    if let Err(e) = state.registry.register(Arc::clone(&session)) {
        error!(session_id = %id, error = %e, "session registration failed");
        return Err(GatewayError::DownstreamEstablishFailure.into());
    }
    let guard = SessionGuard {
        registry: Arc::clone(&state.registry),
        id: id.clone(),
    };

    let (sink, rx) = QueueSink::channel(state.config.push_queue);
    let connection = match state.core.establish(Arc::new(sink)).await {
        Ok(connection) => connection,
        Err(e) => {
            error!(session_id = %id, error = %e, "failed to establish protocol connection");
            return Err(GatewayError::DownstreamEstablishFailure.into());
        }
    };
    if !session.install_connection(connection) {
        warn!(session_id = %id, "session closed while establishing");
        return Err(GatewayError::DownstreamEstablishFailure.into());
    }
    info!(session_id = %id, active = state.registry.len(), "session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?sessionId={id}"));
    let messages = ReceiverStream::new(rx).map(|message| Event::default().event("message").data(message));
    let events = stream::once(future::ready(endpoint))
        .chain(messages)
        .take_until(session.closed_token().cancelled_owned())
        .map(move |event| {
            let _held = &guard;
            Ok::<_, Infallible>(event)
        });

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default().interval(KEEP_ALIVE))
        .into_response())
}

#[derive(Debug, Deserialize)]
struct DeliverQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn deliver(
    State(state): State<GatewayState>,
    query: Result<Query<DeliverQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ErrorResponse> {
    let session_id = query
        .ok()
        .and_then(|Query(q)| q.session_id)
        .filter(|id| !id.is_empty())
        .ok_or(GatewayError::MissingRoutingKey)?;

    let session = state
        .registry
        .lookup(&session_id)
        .filter(|session| !session.is_closed())
        .ok_or(GatewayError::UnknownSession)?;
    let connection = session.connection().ok_or(GatewayError::UnknownSession)?;

    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            debug!(session_id = %session_id, "payload too large");
            let body = json!({ "error": "Request body too large" });
            return Ok((StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response());
        }
        Err(_) => return Err(GatewayError::MalformedPayload.into()),
    };
    let raw = std::str::from_utf8(&body).map_err(|_| GatewayError::MalformedPayload)?;
    if serde_json::from_str::<Value>(raw).is_err() {
        return Err(GatewayError::MalformedPayload.into());
    }

    match connection.handle_inbound(raw).await {
        Ok(ack) => {
            state.registry.touch(&session_id);
            if session.mark_active() {
                debug!(session_id = %session_id, "session active");
            }
            Ok((StatusCode::ACCEPTED, Json(json!({ "status": ack }))).into_response())
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "failed to process message");
            Err(GatewayError::DownstreamProcessingFailure.into())
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, BodyDataStream};
    use axum::http::Request;
    use gantry_core::{Ack, Connection, CoreError, PushSink};
    use gantry_mcp::{McpCore, ToolCatalogue};
    use secrecy::SecretString;
    use tower::ServiceExt;

    const SECRET: &str = "s3cr3t-token-for-tests-0123456789abcdef";

    struct FailingCore;

    #[async_trait]
    impl ProtocolCore for FailingCore {
        async fn establish(&self, _sink: Arc<dyn PushSink>) -> Result<Arc<dyn Connection>, CoreError> {
            Err(CoreError::Establish("database at 10.0.0.5 refused".into()))
        }
    }

    struct BrokenConnection;

    #[async_trait]
    impl Connection for BrokenConnection {
        async fn handle_inbound(&self, _raw: &str) -> Result<Ack, CoreError> {
            Err(CoreError::Internal("stack trace: handler.rs:42".into()))
        }
        fn close(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct BrokenCore;

    #[async_trait]
    impl ProtocolCore for BrokenCore {
        async fn establish(&self, _sink: Arc<dyn PushSink>) -> Result<Arc<dyn Connection>, CoreError> {
            Ok(Arc::new(BrokenConnection))
        }
    }

    struct HangingCore;

    #[async_trait]
    impl ProtocolCore for HangingCore {
        async fn establish(&self, _sink: Arc<dyn PushSink>) -> Result<Arc<dyn Connection>, CoreError> {
            std::future::pending().await
        }
    }

    fn state_with(core: Arc<dyn ProtocolCore>) -> GatewayState {
        GatewayState {
            registry: Arc::new(SessionRegistry::new()),
            core,
            credential: Arc::new(Credential::new(SecretString::from(SECRET.to_string()))),
            config: Arc::new(ServerConfig::default()),
        }
    }

    fn mcp_state() -> GatewayState {
        state_with(Arc::new(McpCore::new(ToolCatalogue::new())))
    }

    fn sse_request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(SSE_PATH);
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn deliver_request(query: &str, body: &str) -> Request<Body> {
        Request::post(format!("{MESSAGES_PATH}{query}"))
            .header("authorization", format!("Bearer {SECRET}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn messages_request(auth: &str) -> Request<Body> {
        Request::post(format!("{MESSAGES_PATH}?sessionId=x"))
            .header("authorization", auth)
            .header("content-type", "application/json")
            .body(Body::from(PING))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn next_frame(stream: &mut BodyDataStream) -> Option<String> {
        let chunk = stream.next().await?.unwrap();
        Some(String::from_utf8(chunk.to_vec()).unwrap())
    }

    /// Open a session. The returned stream keeps it alive.
    async fn open_session(app: &Router) -> (String, BodyDataStream) {
        let response = app
            .clone()
            .oneshot(sse_request(Some(&format!("Bearer {SECRET}"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut stream = response.into_body().into_data_stream();
        let frame = next_frame(&mut stream).await.unwrap();
        assert!(frame.starts_with("event: endpoint\n"), "frame: {frame}");
        let id = frame
            .split("sessionId=")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .unwrap()
            .to_string();
        (id, stream)
    }

    const PING: &str = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;

    #[tokio::test]
    async fn health_has_exactly_two_fields() {
        let app = build_router(mcp_state());
        let response = app
            .oneshot(Request::get(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let object = body.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(body["status"], "ok");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn missing_credential_on_every_protected_route() {
        let app = build_router(mcp_state());
        let response = app.clone().oneshot(sse_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Authentication required");

        let request = Request::post(format!("{MESSAGES_PATH}?sessionId=x"))
            .body(Body::from(PING))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Authentication required");
    }

    #[tokio::test]
    async fn malformed_credential_is_401() {
        let app = build_router(mcp_state());
        for value in ["Basic abc", "Bearer ", SECRET] {
            let response = app.clone().oneshot(sse_request(Some(value))).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "value {value}");
            assert_eq!(json_body(response).await["error"], "Malformed authorization header");

            let response = app.clone().oneshot(messages_request(value)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "value {value}");
            assert_eq!(json_body(response).await["error"], "Malformed authorization header");
        }
    }

    #[tokio::test]
    async fn wrong_secret_is_403_and_never_echoed() {
        let state = mcp_state();
        let app = build_router(state.clone());
        let wrong = format!("Bearer {}x", SECRET);
        let responses = [
            app.clone().oneshot(sse_request(Some(&wrong))).await.unwrap(),
            app.oneshot(messages_request(&wrong)).await.unwrap(),
        ];
        for response in responses {
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let text = String::from_utf8(bytes.to_vec()).unwrap();
            assert!(!text.contains(SECRET));
            assert_eq!(
                serde_json::from_str::<Value>(&text).unwrap(),
                json!({"error": "Invalid authentication token"})
            );
        }
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn subscribe_then_deliver_is_accepted() {
        let state = mcp_state();
        let app = build_router(state.clone());
        let (id, mut stream) = open_session(&app).await;
        assert_eq!(state.registry.len(), 1);

        let response = app
            .clone()
            .oneshot(deliver_request(&format!("?sessionId={id}"), PING))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await, json!({"status": "queued"}));

        let frame = next_frame(&mut stream).await.unwrap();
        assert!(frame.starts_with("event: message\n"), "frame: {frame}");
        assert!(frame.contains(r#""result":{}"#));

        let session = state.registry.lookup(&id).unwrap();
        assert_eq!(session.state(), crate::session::SessionState::Active);
    }

    #[tokio::test]
    async fn notification_is_accepted_without_reply() {
        let app = build_router(mcp_state());
        let (id, _stream) = open_session(&app).await;
        let response = app
            .oneshot(deliver_request(
                &format!("?sessionId={id}"),
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await, json!({"status": "accepted"}));
    }

    #[tokio::test]
    async fn missing_routing_key_is_400() {
        let app = build_router(mcp_state());
        for query in ["", "?sessionId=", "?other=1"] {
            let response = app.clone().oneshot(deliver_request(query, PING)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {query:?}");
            assert_eq!(json_body(response).await["error"], "Missing sessionId query parameter");
        }
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let app = build_router(mcp_state());
        let (_id, _stream) = open_session(&app).await;
        for query in [
            "?sessionId=nonexistent",
            "?sessionId=..%2F..%2Fetc%2Fpasswd",
            "?sessionId=sess_1%27%20OR%20%271%27%3D%271",
            "?sessionId=%2A",
        ] {
            let response = app.clone().oneshot(deliver_request(query, PING)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "query {query}");
            assert_eq!(json_body(response).await["error"], "Session not found");
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_400() {
        let state = mcp_state();
        let app = build_router(state.clone());
        let (id, _stream) = open_session(&app).await;
        let response = app
            .oneshot(deliver_request(&format!("?sessionId={id}"), "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Request body is not valid JSON");
        assert!(state.registry.lookup(&id).is_some());
    }

    #[tokio::test]
    async fn oversized_payload_is_413() {
        let mut state = mcp_state();
        state.config = Arc::new(ServerConfig {
            max_body_bytes: 64,
            ..ServerConfig::default()
        });
        let app = build_router(state);
        let (id, _stream) = open_session(&app).await;
        let big = format!(r#"{{"jsonrpc":"2.0","id":1,"method":"{}"}}"#, "x".repeat(256));
        let response = app
            .oneshot(deliver_request(&format!("?sessionId={id}"), &big))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn establish_failure_is_500_and_deregisters() {
        let state = state_with(Arc::new(FailingCore));
        let app = build_router(state.clone());
        let response = app
            .oneshot(sse_request(Some(&format!("Bearer {SECRET}"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body, json!({"error": "Failed to establish session"}));
        assert!(state.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_subscribe_deregisters_session() {
        let state = state_with(Arc::new(HangingCore));
        let app = build_router(state.clone());
        let pending = app.oneshot(sse_request(Some(&format!("Bearer {SECRET}"))));
        let result = tokio::time::timeout(Duration::from_millis(50), pending).await;
        assert!(result.is_err());
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn processing_failure_keeps_session() {
        let state = state_with(Arc::new(BrokenCore));
        let app = build_router(state.clone());
        let (id, _stream) = open_session(&app).await;
        let response = app
            .oneshot(deliver_request(&format!("?sessionId={id}"), PING))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body, json!({"error": "Failed to process message"}));
        let session = state.registry.lookup(&id).unwrap();
        assert!(!session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn only_successful_delivery_refreshes_activity() {
        let state = state_with(Arc::new(BrokenCore));
        let app = build_router(state.clone());
        let (id, _stream) = open_session(&app).await;
        let session = state.registry.lookup(&id).unwrap();
        let opened_at = session.last_activity();

        tokio::time::advance(Duration::from_secs(60)).await;
        let response = app
            .clone()
            .oneshot(deliver_request(&format!("?sessionId={id}"), PING))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(session.last_activity(), opened_at);

        let state = mcp_state();
        let app = build_router(state.clone());
        let (id, _stream) = open_session(&app).await;
        let session = state.registry.lookup(&id).unwrap();
        let opened_at = session.last_activity();

        tokio::time::advance(Duration::from_secs(60)).await;
        let response = app
            .oneshot(deliver_request(&format!("?sessionId={id}"), PING))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(session.last_activity() >= opened_at + Duration::from_secs(60));
    }

    #[tokio::test]
    async fn concurrent_subscribes_get_distinct_ids() {
        let state = mcp_state();
        let app = build_router(state.clone());
        let opened = futures::future::join_all((0..16).map(|_| open_session(&app))).await;
        let ids: std::collections::HashSet<_> = opened.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids.len(), 16);
        assert_eq!(state.registry.len(), 16);

        // every id is immediately deliverable
        for id in &ids {
            let response = app
                .clone()
                .oneshot(deliver_request(&format!("?sessionId={id}"), PING))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
    }

    #[tokio::test]
    async fn dropping_stream_removes_session() {
        let state = mcp_state();
        let app = build_router(state.clone());
        let (id, stream) = open_session(&app).await;
        assert!(state.registry.lookup(&id).is_some());
        drop(stream);
        assert!(state.registry.lookup(&id).is_none());

        let response = app
            .oneshot(deliver_request(&format!("?sessionId={id}"), PING))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn eviction_ends_stream() {
        let state = mcp_state();
        let app = build_router(state.clone());
        let (id, mut stream) = open_session(&app).await;
        assert!(state.registry.remove(&id));
        assert!(next_frame(&mut stream).await.is_none());
    }
}
