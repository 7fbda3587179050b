//! HTTP host wiring the cache controller into a static-site server.
//!
//! Every GET is offered to the controller first; declined requests fall
//! through to the authoritative asset source, mirroring how the host
//! runtime hands uninterested requests back to the network.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::controller::{CacheController, Phase};
use crate::error::Result;
use crate::fetch::AssetFetcher;
use crate::stats::StatsSnapshot;
use crate::store::CachedResponse;

#[derive(Clone)]
struct AppState {
    controller: Arc<CacheController>,
    fallback: Arc<dyn AssetFetcher>,
    origin: String,
}

#[derive(Serialize)]
struct WorkerStatus {
    phase: Phase,
    skip_waiting: bool,
    stats: StatsSnapshot,
}

#[derive(Serialize)]
struct MessageResponse {
    status: String,
}

fn to_http_response(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = &cached.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn worker_status(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(WorkerStatus {
        phase: state.controller.phase(),
        skip_waiting: state.controller.skip_waiting_requested(),
        stats: state.controller.stats(),
    })
}

async fn worker_message(State(state): State<AppState>, body: String) -> Response {
    match state.controller.handle_message(body.trim()).await {
        Ok(()) => axum::Json(MessageResponse {
            status: "ok".to_string(),
        })
        .into_response(),
        Err(e) => {
            log::error!("message {body:?} failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn serve_asset(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());
    let url = format!("{}{path_and_query}", state.origin);

    match state.controller.handle_fetch(&method, &url).await {
        Ok(Some(response)) => to_http_response(response),
        Ok(None) => {
            // Declined by the controller: default handling.
            if method != Method::GET {
                return StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
            let key = uri.path().trim_start_matches('/');
            let key = if key.is_empty() { "/" } else { key };
            match state.fallback.fetch(key).await {
                Ok(response) => to_http_response(response),
                Err(e) => {
                    log::debug!("no asset for {key:?}: {e}");
                    StatusCode::NOT_FOUND.into_response()
                }
            }
        }
        Err(e) => {
            log::error!("failed serving {url}: {e}");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Builds the router serving assets through the controller.
#[must_use]
pub fn router(
    controller: Arc<CacheController>,
    fallback: Arc<dyn AssetFetcher>,
    origin: impl Into<String>,
) -> Router {
    let state = AppState {
        controller,
        fallback,
        origin: origin.into().trim_end_matches('/').to_string(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/worker/status", get(worker_status))
        .route("/worker/message", post(worker_message))
        .fallback(serve_asset)
        .layer(cors)
        .with_state(state)
}

/// Runs the hosting server until shutdown.
///
/// # Errors
///
/// Returns an error if the server cannot bind or serving fails.
pub async fn run_server(
    config: &ServerConfig,
    controller: Arc<CacheController>,
    fallback: Arc<dyn AssetFetcher>,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bind address: {e}"),
            ))
        })?;

    let app = router(controller, fallback, config.origin());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("serving on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
