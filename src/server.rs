//! # HTTP Server
//!
//! Status and probe surface over the controller core.
//!
//! Endpoints:
//! - `GET /ready` - readiness probe (200/503)
//! - `GET /healthz` - liveness probe (always 200)
//! - `GET /status` - JSON metrics snapshot plus build info
//! - `GET /preflight` - environment check (200 or 412 with issue text)
//! - `POST /reload` - schedule an early reconcile (202)
//! - `GET /validate` - configuration validation report
//! - `GET /metrics` - prometheus exposition, when enabled

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::validate;
use crate::controller::Controller;

pub async fn start_server(
    port: u16,
    controller: Arc<Controller>,
    cancel: CancellationToken,
) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/ready", get(ready_handler))
        .route("/healthz", get(healthz_handler))
        .route("/status", get(status_handler))
        .route("/preflight", get(preflight_handler))
        .route("/reload", post(reload_handler))
        .route("/validate", get(validate_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(controller);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

async fn ready_handler(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    match controller.ready().await {
        Ok(()) => (StatusCode::OK, "ok".to_owned()),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, format!("{err:#}")),
    }
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn status_handler(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "host": controller.host(),
        "build": {
            "datetime": env!("BUILD_DATETIME"),
            "git_hash": env!("BUILD_GIT_HASH"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "metrics": controller.snapshot(),
    }))
}

async fn preflight_handler(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    let issues = controller.preflight().await;
    if issues.is_empty() {
        (StatusCode::OK, "ok".to_owned())
    } else {
        (StatusCode::PRECONDITION_FAILED, issues.join("\n"))
    }
}

async fn reload_handler(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    controller.nudge();
    StatusCode::ACCEPTED
}

async fn validate_handler(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    Json(validate(&controller.cfg))
}

async fn metrics_handler(State(controller): State<Arc<Controller>>) -> impl IntoResponse {
    if !controller.cfg.enable_metrics {
        return (
            StatusCode::NOT_FOUND,
            [("content-type", "text/plain")],
            b"metrics disabled".to_vec(),
        );
    }
    let encoder = TextEncoder::new();
    let families = controller.metrics().registry().gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        error!("failed to encode metrics: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("failed to encode metrics: {err}").into_bytes(),
        );
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}
