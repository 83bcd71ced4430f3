// HTTP API server.
//
// Profile CRUD plus the viewer WebSocket endpoint. Profile ids are
// assigned by the server; a client supplying its own id is rejected.
// Errors are structured JSON bodies and never mutate state.

use std::sync::Arc;

use axum::{
    extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Envelope, ViewerConnection};
use crate::config::ServerConfig;
use crate::profile::{ProfileDefinition, ProfileState, ProfileUpdate};
use crate::registry::ProfileRegistry;
use crate::{PulseError, Result};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProfileRegistry>,
    pub broadcaster: Arc<Broadcaster>,
}

pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<ProfileRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            config,
            state: AppState {
                registry,
                broadcaster,
            },
        }
    }

    /// Serve until the process terminates.
    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, "api server listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/profiles",
            get(list_profiles)
                .post(create_profile)
                .delete(delete_without_id),
        )
        .route(
            "/profiles/:id",
            axum::routing::put(update_profile).delete(delete_profile),
        )
        .route("/ws", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Structured error response: `{"error": <text>}` with a status code.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<PulseError> for ApiError {
    fn from(err: PulseError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn list_profiles(State(state): State<AppState>) -> Json<Vec<ProfileState>> {
    Json(state.registry.list().await)
}

async fn create_profile(
    State(state): State<AppState>,
    Json(mut definition): Json<ProfileDefinition>,
) -> std::result::Result<Json<ProfileDefinition>, ApiError> {
    if !definition.id.is_empty() {
        return Err(ApiError::bad_request("profile ids are assigned by the server"));
    }
    definition.id = Uuid::new_v4().to_string();

    let profile_state = state.registry.add(definition).await?;
    let definition = profile_state.definition.clone();
    state
        .broadcaster
        .fanout(&Envelope::update(profile_state))
        .await;
    Ok(Json(definition))
}

async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> std::result::Result<Json<ProfileState>, ApiError> {
    match state.registry.update(&id, update).await? {
        Some(profile_state) => {
            state
                .broadcaster
                .fanout(&Envelope::update(profile_state.clone()))
                .await;
            Ok(Json(profile_state))
        }
        None => Err(ApiError::not_found(format!("no profile with id {:?}", id))),
    }
}

async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    if id.is_empty() {
        return Err(ApiError::bad_request("a profile id is required"));
    }
    // Deleting an id that was never there is a no-op, not an error, and
    // nothing is broadcast for it.
    if state.registry.remove(&id).await? {
        state.broadcaster.fanout(&Envelope::delete(id)).await;
    }
    Ok(StatusCode::OK)
}

async fn delete_without_id() -> ApiError {
    ApiError::bad_request("a profile id is required")
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Plumb one viewer socket: a writer task drains the connection's queue
/// onto the wire, and the broadcaster owns when that queue is fed. The
/// full-state replay is queued before the connection goes live.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsFrame::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let replay: Vec<Envelope> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(Envelope::update)
        .collect();
    state
        .broadcaster
        .register(ViewerConnection::new(tx), &replay)
        .await;

    // Viewers only listen; drain incoming frames until the peer hangs up.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsFrame::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    debug!("viewer socket closed");
}
