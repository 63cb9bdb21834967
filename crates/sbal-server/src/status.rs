//! Read-only status endpoint with small admin hooks.
//!
//! - `GET /state` returns the pool snapshot as JSON.
//! - `GET /op?force_index=i` moves the selection cursor.
//! - `GET /op?disable=i` / `GET /op?enable=i` flip a server's manual-disable
//!   flag.
//!
//! Only accessible from loopback addresses.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use sbal_pool::UpstreamPool;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ServerError;

#[derive(Clone)]
struct StatusState {
    pool: Arc<UpstreamPool>,
}

/// Query parameters for the admin op endpoint.
#[derive(Deserialize)]
struct OpQuery {
    /// Set the selection cursor to this slot.
    force_index: Option<usize>,
    /// Manually disable this slot.
    disable: Option<usize>,
    /// Re-enable this slot.
    enable: Option<usize>,
}

pub(crate) fn status_routes(pool: Arc<UpstreamPool>) -> Router {
    let state = StatusState { pool };
    Router::new()
        .route("/state", get(handle_state))
        .route("/op", get(handle_op))
        .with_state(state)
}

/// Serve the status API until the shutdown token fires.
pub(crate) async fn serve_status(
    listen: String,
    pool: Arc<UpstreamPool>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(listen = %listen, "status endpoint listening");

    let app = status_routes(pool);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    Ok(())
}

fn forbidden_unless_loopback(peer: SocketAddr) -> Option<(StatusCode, Json<serde_json::Value>)> {
    if peer.ip().is_loopback() {
        None
    } else {
        Some((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "status endpoint is only accessible from localhost"
            })),
        ))
    }
}

async fn handle_state(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<StatusState>,
) -> impl IntoResponse {
    if let Some(forbidden) = forbidden_unless_loopback(peer) {
        return forbidden;
    }

    let snapshot = state.pool.snapshot();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "version": sbal_core::VERSION,
            "rule": snapshot.rule,
            "last_use_index": snapshot.last_use_index,
            "upstreams": snapshot.servers,
        })),
    )
}

async fn handle_op(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<StatusState>,
    Query(q): Query<OpQuery>,
) -> impl IntoResponse {
    if let Some(forbidden) = forbidden_unless_loopback(peer) {
        return forbidden;
    }

    if q.force_index.is_none() && q.disable.is_none() && q.enable.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "one of 'force_index', 'disable', 'enable' must be provided"
            })),
        );
    }

    let mut applied = Vec::new();
    if let Some(i) = q.force_index {
        if !state.pool.force_set_index(i) {
            return bad_index(i);
        }
        info!(index = i, "selection cursor forced");
        applied.push(format!("force_index={i}"));
    }
    if let Some(i) = q.disable {
        if !state.pool.set_manual_disable(i, true) {
            return bad_index(i);
        }
        info!(index = i, "upstream manually disabled");
        applied.push(format!("disable={i}"));
    }
    if let Some(i) = q.enable {
        if !state.pool.set_manual_disable(i, false) {
            return bad_index(i);
        }
        info!(index = i, "upstream re-enabled");
        applied.push(format!("enable={i}"));
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({ "applied": applied })),
    )
}

fn bad_index(index: usize) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": format!("index {index} is out of range")
        })),
    )
}
