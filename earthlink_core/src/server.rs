//! HTTP/WebSocket boundary between the session and its two clients: the
//! agent runtime issuing operation calls and the map renderer reporting
//! clicks and camera moves.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::geo::LngLat;
use crate::runtime::SessionRuntime;
use crate::session::selection::{ClickOutcome, SelectionMode};
use crate::session::viewport::Viewport;
use crate::session::{SessionEvent, SessionSnapshot};
use crate::tools::{ToolCall, ToolCallResult, ToolDef};

const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Clone)]
pub struct ServerState {
    pub runtime: Arc<SessionRuntime>,
    pub auth: BackendAuthConfig,
    pub ws_events: broadcast::Sender<ApiEventEnvelope>,
}

#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: Value,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ToolCallResponse {
    name: String,
    success: bool,
    result: Value,
}

impl From<ToolCallResult> for ToolCallResponse {
    fn from(result: ToolCallResult) -> Self {
        Self {
            success: result.output.is_success(),
            result: result.output.to_json(),
            name: result.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct MapClickRequest {
    lng: f64,
    lat: f64,
}

#[derive(Debug, Deserialize)]
struct SelectionModeRequest {
    mode: String,
}

#[derive(Debug, Deserialize)]
struct PanelOpenRequest {
    open: bool,
}

#[derive(Debug, Serialize)]
struct FlyToResponse {
    target: Option<Viewport>,
}

#[derive(Debug, Serialize)]
struct PanelToggleResponse {
    toggled: bool,
}

pub async fn serve_backend(runtime: SessionRuntime) -> Result<()> {
    let bind_addr = std::env::var("EARTHLINK_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse::<SocketAddr>()
        .context("Invalid EARTHLINK_BIND (expected host:port)")?;

    let auth = load_auth_config()?;
    let (ws_events, _) = broadcast::channel(512);

    spawn_event_bridge(runtime.session.subscribe(), ws_events.clone());

    let state = Arc::new(ServerState {
        runtime: Arc::new(runtime),
        auth,
        ws_events,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!("Earthlink session server listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Session server failed")?;
    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route("/turns", post(run_turn))
        .route("/session", get(get_session))
        .route("/map/click", post(map_click))
        .route("/map/viewport", put(set_viewport))
        .route("/map/mode", put(set_selection_mode))
        .route("/map/fly-to/consume", post(consume_fly_to))
        .route("/panel/toggle", post(toggle_panel))
        .route("/panel/open", put(set_panel_open))
        .route("/ws/events", get(ws_events_route))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().nest("/v1", protected)
}

fn spawn_event_bridge(
    event_rx: flume::Receiver<SessionEvent>,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            let _ = ws_events.send(map_session_event(&event));
        }
    });
}

fn map_session_event(event: &SessionEvent) -> ApiEventEnvelope {
    envelope(
        event.event_type(),
        serde_json::to_value(event).unwrap_or_else(|_| json!({})),
    )
}

fn envelope(event_type: &str, payload: Value) -> ApiEventEnvelope {
    ApiEventEnvelope {
        event_type: event_type.to_string(),
        emitted_at: Utc::now(),
        payload,
    }
}

fn load_auth_config() -> Result<BackendAuthConfig> {
    let mode = parse_auth_mode(std::env::var("EARTHLINK_AUTH_MODE").ok())?;
    let token = std::env::var("EARTHLINK_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "EARTHLINK_TOKEN is required when auth mode is 'required'"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Auth mode is disabled; all API routes are unauthenticated");
    }

    Ok(BackendAuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let normalized = raw
        .unwrap_or_else(|| "required".to_string())
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid EARTHLINK_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &BackendAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let expected = format!("Bearer {}", token);
    if auth_value.trim() != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        session_id: state.runtime.session.id().to_string(),
    })
}

async fn list_tools(State(state): State<Arc<ServerState>>) -> Json<Vec<ToolDef>> {
    let runtime = &state.runtime;
    Json(
        runtime
            .tool_registry
            .tool_definitions_for_context(runtime.context())
            .await,
    )
}

async fn call_tool(
    State(state): State<Arc<ServerState>>,
    Json(call): Json<ToolCall>,
) -> Json<ToolCallResponse> {
    Json(state.runtime.call(&call).await.into())
}

async fn run_turn(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<TurnRequest>,
) -> Json<Vec<ToolCallResponse>> {
    let results = state.runtime.run_turn(&body.calls).await;
    Json(results.into_iter().map(ToolCallResponse::from).collect())
}

async fn get_session(State(state): State<Arc<ServerState>>) -> Json<SessionSnapshot> {
    Json(state.runtime.session.snapshot())
}

async fn map_click(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<MapClickRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if !body.lng.is_finite() || !body.lat.is_finite() {
        return Err(bad_request("click coordinates must be finite".to_string()));
    }
    let outcome = state
        .runtime
        .session
        .handle_map_click(LngLat::new(body.lng, body.lat));
    Ok(Json(click_outcome_json(&outcome)))
}

fn click_outcome_json(outcome: &ClickOutcome) -> Value {
    match outcome {
        ClickOutcome::PointSelected(point) => json!({"outcome": "point_selected", "point": point}),
        ClickOutcome::CornerPlaced(corner) => json!({"outcome": "corner_placed", "corner": corner}),
        ClickOutcome::RegionCompleted(bbox) => json!({"outcome": "region_completed", "bbox": bbox}),
    }
}

async fn set_viewport(
    State(state): State<Arc<ServerState>>,
    Json(viewport): Json<Viewport>,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    let finite = [viewport.longitude, viewport.latitude, viewport.zoom]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Err(bad_request("viewport values must be finite".to_string()));
    }
    let session = &state.runtime.session;
    session.set_viewport(viewport);
    Ok(Json(session.snapshot()))
}

async fn set_selection_mode(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<SelectionModeRequest>,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    let mode = SelectionMode::parse(&body.mode)
        .ok_or_else(|| bad_request(format!("unknown selection mode '{}'", body.mode)))?;
    let session = &state.runtime.session;
    session.set_selection_mode(mode);
    Ok(Json(session.snapshot()))
}

/// The renderer takes the pending camera move; a second consume gets nothing.
async fn consume_fly_to(State(state): State<Arc<ServerState>>) -> Json<FlyToResponse> {
    Json(FlyToResponse {
        target: state.runtime.session.take_fly_to_request(),
    })
}

async fn toggle_panel(State(state): State<Arc<ServerState>>) -> Json<PanelToggleResponse> {
    Json(PanelToggleResponse {
        toggled: state.runtime.session.toggle_panel(),
    })
}

async fn set_panel_open(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<PanelOpenRequest>,
) -> Json<SessionSnapshot> {
    let session = &state.runtime.session;
    if body.open {
        session.open_panel();
    } else {
        session.close_panel();
    }
    Json(session.snapshot())
}

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(state, socket))
}

async fn handle_events_socket(state: Arc<ServerState>, mut socket: WebSocket) {
    let mut rx = state.ws_events.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(serialized) => serialized,
                            Err(error) => {
                                tracing::warn!("Failed to serialize websocket event: {}", error);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Websocket client lagged; skipped {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn bad_request(message: String) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message)
}
