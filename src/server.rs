//! HTTP boundary.
//!
//! Serves the management API under the configured prefix and hands every
//! other request to the [`Dispatcher`].

use crate::config::{RouteDefinition, StubServerConfig};
use crate::dispatch::{Dispatcher, StubResponse};
use crate::error::StubError;
use crate::request::IncomingRequest;
use crate::store::{RouteStore, RouteView};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state of all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// The stub server: a route store plus the HTTP surface around it.
pub struct StubServer {
    config: StubServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl StubServer {
    /// Build a server and seed its store with the configured routes.
    pub async fn new(config: StubServerConfig) -> Result<Self, StubError> {
        let store = Arc::new(RouteStore::from_config(&config).await?);
        info!(routes = config.routes.len(), "Stub server initialized");
        let dispatcher = Arc::new(Dispatcher::new(store, config.settings.clone()));
        Ok(Self { config, dispatcher })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &StubServerConfig {
        &self.config
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        build_router(&self.config.internal_prefix, self.dispatcher.clone())
    }

    /// Serve on `listener` until ctrl-c, then drop all routes.
    pub async fn run(self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(address = %addr, prefix = %self.config.internal_prefix, "HTTP server starting");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.dispatcher.store().clear().await;
        info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Management routes under `prefix`, everything else dispatched as traffic.
pub fn build_router(prefix: &str, dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState { dispatcher };

    Router::new()
        .route(
            &format!("{}/routes", prefix),
            get(list_routes).post(create_route).delete(clear_routes),
        )
        .route(
            &format!("{}/routes/{{id}}", prefix),
            get(get_route).put(replace_route).delete(delete_route),
        )
        .route(&format!("{}/match", prefix), post(match_route))
        .route(&format!("{}/health", prefix), get(health))
        .route(&format!("{}/stats", prefix), get(stats))
        .fallback(serve_stub)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Error returned by management endpoints.
#[derive(Debug)]
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
}

impl From<StubError> for ApiError {
    fn from(error: StubError) -> Self {
        let status = match &error {
            e if e.is_config_error() => StatusCode::BAD_REQUEST,
            StubError::RouteNotFound(_) | StubError::NoMatch => StatusCode::NOT_FOUND,
            StubError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.status.canonical_reason().unwrap_or("Error"),
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid request payload: {}", e)))
}

async fn list_routes(State(state): State<AppState>) -> Json<Vec<RouteView>> {
    let mut views = Vec::new();
    for route in state.dispatcher.store().list().await {
        views.push(route.view().await);
    }
    Json(views)
}

async fn create_route(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<RouteView>), ApiError> {
    let definition: RouteDefinition = parse_json(&body)?;
    let route = state.dispatcher.store().create_or_replace(definition).await?;
    Ok((StatusCode::CREATED, Json(route.view().await)))
}

async fn clear_routes(State(state): State<AppState>) -> StatusCode {
    state.dispatcher.store().clear().await;
    StatusCode::NO_CONTENT
}

async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RouteView>, ApiError> {
    let route = state.dispatcher.store().get(&id).await?;
    Ok(Json(route.view().await))
}

async fn replace_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<RouteView>, ApiError> {
    let definition: RouteDefinition = parse_json(&body)?;
    let route = state.dispatcher.store().replace(&id, definition).await?;
    Ok(Json(route.view().await))
}

async fn delete_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.dispatcher.store().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Payload of the match check.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MatchQuery {
    path: String,
    #[serde(default = "default_match_method")]
    method: String,
    #[serde(default)]
    body: String,
}

fn default_match_method() -> String {
    "GET".to_string()
}

/// Report which route would serve a request, without selecting a response.
async fn match_route(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query: MatchQuery = parse_json(&body)?;
    let method = query.method.to_uppercase();
    let found = state
        .dispatcher
        .store()
        .find_match(&query.path, &method, &query.body)
        .await;

    let route = match found {
        Ok(route) => Some(route.view().await),
        Err(StubError::NoMatch) => None,
        Err(e) => return Err(e.into()),
    };
    Ok(Json(serde_json::json!({ "route": route })))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let routes = state.dispatcher.store().len().await;
    let stats = state.dispatcher.stats();
    Json(serde_json::json!({
        "routes": routes,
        "requests": stats,
    }))
}

/// Traffic handler for every non-management path.
async fn serve_stub(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return into_http(StubResponse::error(
                413,
                "Payload Too Large",
                "Request body could not be read",
            ));
        }
    };

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let incoming = IncomingRequest {
        method: parts.method.as_str().to_uppercase(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers,
        body: body.to_vec(),
    };

    into_http(state.dispatcher.dispatch(&incoming).await.into_stub_response())
}

/// Convert a rendered stub response into an HTTP response.
fn into_http(stub: StubResponse) -> Response {
    let status = StatusCode::from_u16(stub.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(stub.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in stub.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid response header"),
        }
    }
    response
}
