//! HTTP Handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use agent_core::{
    AgentError, CancellationToken, ErrorKind, ResourceAddress, SessionId, ToolCall, ToolDescriptor,
    ToolPayload, provider::TokenUsage, reasoning::RunOutcome,
};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model_service: String,
    pub model_service_connected: bool,
    pub live_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToolCallSummary {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub result: String,
    pub is_error: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub status: &'static str,
    pub text: String,
    pub tool_calls: Vec<ToolCallSummary>,
    pub iterations: usize,
    pub usage: TokenUsage,
}

impl ChatResponse {
    fn new(session_id: &SessionId, outcome: RunOutcome) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: if outcome.is_completed() { "completed" } else { "aborted" },
            text: outcome.text().to_string(),
            tool_calls: outcome
                .tool_executions
                .into_iter()
                .map(|exec| ToolCallSummary {
                    call_id: exec.call_id,
                    name: exec.name,
                    arguments: exec.arguments,
                    result: exec.result.payload.to_text(),
                    is_error: exec.result.is_error,
                })
                .collect(),
            iterations: outcome.iterations,
            usage: outcome.usage,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Structured failure: `{error, code}` with a matching status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.into(),
            },
        }
    }

    fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error, "not_found")
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        let kind = e.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::ToolExecution => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Transport | ErrorKind::Protocol | ErrorKind::Session | ErrorKind::Model => {
                StatusCode::BAD_GATEWAY
            }
            ErrorKind::ModelTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Config | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.user_message(), kind.as_str())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_service_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        model_service: state.provider.info().name,
        model_service_connected,
        live_sessions: state.sessions.len().await,
    })
}

/// Run one user message through the turn loop
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "message must not be empty", "validation"));
    }

    let (id, shared) = match payload.session_id {
        Some(raw) => {
            let id = SessionId::from_string(raw);
            let shared = state
                .sessions
                .get(&id)
                .await
                .ok_or_else(|| ApiError::not_found(format!("No live session {id}")))?;
            (id, shared)
        }
        None => state.sessions.create().await?,
    };

    // Runs detached; dropping the request cancels the run, which closes the session
    let message = payload.message;
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();
    let orchestrator = Arc::clone(&state.orchestrator);
    let sessions = Arc::clone(&state.sessions);
    let run_id = id.clone();
    let run = tokio::spawn(async move {
        let mut session = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AgentError::Cancelled),
            session = shared.lock_owned() => session,
        };
        let result = orchestrator.run(&mut session, message, &cancel).await;
        if let Err(e) = &result {
            // The run already closed the session
            drop(session);
            sessions.forget(&run_id).await;
            tracing::error!(session_id = %run_id, error = %e, "chat failed");
        }
        result
    });

    let outcome = run.await.map_err(|e| {
        tracing::error!(session_id = %id, error = %e, "chat task failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "chat task failed", ErrorKind::Internal.as_str())
    })??;
    Ok(Json(ChatResponse::new(&id, outcome)))
}

/// Close a live session
pub async fn end_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let id = SessionId::from_string(id);
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("No live session {id}")))
    }
}

/// Tool catalog as advertised by a fresh tool provider
pub async fn list_tools(State(state): State<AppState>) -> Result<Json<ToolsResponse>, ApiError> {
    let mut session = state.sessions.transient().await?;
    let tools = session.registry().catalog().to_vec();
    session.close().await;
    Ok(Json(ToolsResponse { tools }))
}

pub async fn list_patients(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read_resource(&state, ResourceAddress::all_patients()).await
}

pub async fn get_patient(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let address: ResourceAddress = format!("patients://{id}").parse()?;
    read_resource(&state, address).await
}

/// Register a patient without going through the model
pub async fn create_patient(
    State(state): State<AppState>,
    Json(patient): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let call = ToolCall::new(uuid::Uuid::new_v4().to_string(), "create_patient", patient);

    let mut session = state.sessions.transient().await?;
    let result = session.proxy().invoke(&call).await;
    session.close().await;
    let result = result?;

    if result.is_error {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            result.payload.to_text(),
            ErrorKind::ToolExecution.as_str(),
        ));
    }
    let body = match result.payload {
        ToolPayload::Structured(value) => value,
        ToolPayload::Text(text) => json!({ "message": text }),
    };
    Ok((StatusCode::CREATED, Json(body)))
}

async fn read_resource(state: &AppState, address: ResourceAddress) -> Result<Json<Value>, ApiError> {
    let mut session = state.sessions.transient().await?;
    let contents = session.proxy().read_resource(&address).await;
    session.close().await;

    let contents = contents.map_err(|e| match e {
        AgentError::ToolExecution(_) => ApiError::not_found(format!("No such resource {address}")),
        other => other.into(),
    })?;
    let body = contents.json().map_err(AgentError::from)?;
    Ok(Json(body))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use tower::ServiceExt;

    use agent_core::mock::{ScriptedProvider, ScriptedReply, ScriptedTransport};
    use agent_core::protocol::{CallToolResult, JsonRpcResponse, codes, methods};
    use agent_core::provider::{ModelReply, ReplyBlock};
    use agent_core::Orchestrator;

    use crate::sessions::SessionManager;
    use crate::sessions::tests::ScriptedLauncher;

    /// In-memory stand-in for the clinic server
    pub fn clinic_double() -> ScriptedTransport {
        let tools = vec![
            ToolDescriptor::new("list_patients", "List all patients", json!({"type": "object"})),
            ToolDescriptor::new(
                "create_patient",
                "Register a new patient",
                json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "species": {"type": "string"}
                    },
                    "required": ["id", "name", "species"]
                }),
            ),
        ];
        ScriptedTransport::new(move |request| {
            let id = request.id.clone();
            let params = request.params.clone().unwrap_or_default();
            let response = match request.method.as_str() {
                methods::TOOLS_CALL if params["arguments"]["id"] == "P001" => {
                    let result = CallToolResult::error("A patient with id P001 already exists");
                    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
                }
                methods::TOOLS_CALL => {
                    let result = CallToolResult {
                        structured_content: Some(json!({"created": true, "patient": params["arguments"]})),
                        ..CallToolResult::text("created")
                    };
                    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
                }
                methods::RESOURCES_READ if params["uri"] == "patients://P001" => JsonRpcResponse::success(
                    id,
                    json!({"contents": [{
                        "uri": "patients://P001",
                        "mimeType": "application/json",
                        "text": "{\"patient\":{\"id\":\"P001\",\"name\":\"Max\"}}"
                    }]}),
                ),
                methods::RESOURCES_READ => JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Unknown resource"),
                _ => return ScriptedTransport::default_reply(request, &tools),
            };
            ScriptedReply::Respond(response.into())
        })
    }

    fn app(replies: Vec<ModelReply>) -> (AppState, Router) {
        let (state, app, _) = app_with(ScriptedProvider::new(replies));
        (state, app)
    }

    fn app_with(provider: ScriptedProvider) -> (AppState, Router, Arc<ScriptedLauncher>) {
        let provider = Arc::new(provider);
        let orchestrator = Orchestrator::builder().provider(provider.clone()).build().unwrap();
        let launcher = Arc::new(ScriptedLauncher::default());
        let sessions = SessionManager::new(launcher.clone());
        let state = AppState::new(provider, orchestrator, sessions);
        (state.clone(), crate::router(state), launcher)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = app(vec![]);
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["live_sessions"], 0);
    }

    #[tokio::test]
    async fn test_chat_keeps_the_session() {
        let (state, app) = app(vec![
            ModelReply::new(vec![ReplyBlock::tool_call(
                "toolu_1",
                "create_patient",
                json!({"id": "P010", "name": "Rex", "species": "Dog"}),
            )]),
            ModelReply::text("Rex is registered."),
            ModelReply::text("You registered Rex."),
        ]);

        let (status, body) = send(&app, Method::POST, "/api/chat", Some(json!({"message": "Register Rex"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["text"], "Rex is registered.");
        assert_eq!(body["tool_calls"][0]["name"], "create_patient");
        assert_eq!(body["tool_calls"][0]["is_error"], false);
        assert_eq!(body["iterations"], 2);

        let session_id = body["session_id"].as_str().unwrap().to_string();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "Who did I register?", "session_id": session_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], session_id.as_str());
        assert_eq!(state.sessions.len().await, 1);

        let uri = format!("/api/sessions/{session_id}");
        assert_eq!(send(&app, Method::DELETE, &uri, None).await.0, StatusCode::NO_CONTENT);
        assert_eq!(send(&app, Method::DELETE, &uri, None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_failure_drops_the_session() {
        let (state, app) = app(vec![]);
        let (status, body) = send(&app, Method::POST, "/api/chat", Some(json!({"message": "hello"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "model");
        assert_eq!(state.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn test_client_disconnect_closes_the_session() {
        let provider = ScriptedProvider::repeating(ModelReply::text("late")).with_delay(Duration::from_secs(3600));
        let (state, app, launcher) = app_with(provider);

        let request = tokio::spawn(async move {
            send(&app, Method::POST, "/api/chat", Some(json!({"message": "hello"}))).await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(state.sessions.len().await, 1);
        request.abort();

        for _ in 0..100 {
            if state.sessions.len().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.sessions.len().await, 0);
        let taps = launcher.taps.lock().unwrap();
        assert_eq!(taps.len(), 1);
        assert_eq!(taps[0].terminations(), 1);
    }

    #[tokio::test]
    async fn test_chat_rejects_unknown_session_and_empty_message() {
        let (_, app) = app(vec![]);
        let (status, _) =
            send(&app, Method::POST, "/api/chat", Some(json!({"message": "hi", "session_id": "nope"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::POST, "/api/chat", Some(json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_tools_and_patients() {
        let (_, app) = app(vec![]);
        let (status, body) = send(&app, Method::GET, "/api/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(2));

        let (status, body) = send(&app, Method::GET, "/api/patients/P001", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["patient"]["name"], "Max");

        let (status, _) = send(&app, Method::GET, "/api/patients/P404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_patient() {
        let (_, app) = app(vec![]);
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/patients",
            Some(json!({"id": "P010", "name": "Rex", "species": "Dog"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["patient"]["name"], "Rex");

        let (status, body) = send(&app, Method::POST, "/api/patients", Some(json!({"id": "P011", "name": "Tom"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/patients",
            Some(json!({"id": "P001", "name": "Max", "species": "Dog"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "A patient with id P001 already exists");
    }
}
