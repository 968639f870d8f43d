use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::engine::ScanEngine;
use crate::error::{ErrorKind, ScanError};
use crate::types::{ScanId, ScanStatus};

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct AppState {
    engine: ScanEngine,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub scan_type: Option<String>,
    #[serde(default)]
    pub targets: Option<String>,
}

pub fn router(engine: ScanEngine) -> Router {
    let api = Router::new()
        .route("/scan/start", post(start_scan))
        .route("/scan/status/{id}", get(scan_status))
        .route("/scan/results/{id}", get(scan_results))
        .route("/scan/cancel/{id}", post(cancel_scan))
        .with_state(AppState { engine });

    Router::new().nest("/api", api).layer(TraceLayer::new_for_http())
}

/// Serve the API until Ctrl+C, sweeping expired scans once an hour.
pub async fn serve(bind: &str, engine: ScanEngine) -> Result<()> {
    let retention = engine.config().retention_hours;
    let sweeper = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            sweeper.cleanup_old_scans(retention).await;
        }
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("serving scan API on http://{}", listener.local_addr()?);
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn error_body(status: StatusCode, error: &str, details: impl Into<String>) -> Response {
    (status, Json(json!({ "error": error, "details": details.into() }))).into_response()
}

fn scan_not_found() -> Response {
    error_body(
        StatusCode::NOT_FOUND,
        "Scan not found",
        "The requested scan ID does not exist or has expired",
    )
}

async fn start_scan(State(app): State<AppState>, Json(req): Json<StartRequest>) -> Response {
    let Some(scan_type) = req.scan_type.filter(|s| !s.trim().is_empty()) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            "Missing required parameter: scanType",
            "Valid scan types are: quick, standard, deep",
        );
    };
    let Some(targets) = req.targets.filter(|s| !s.trim().is_empty()) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            "Missing required parameter: targets",
            "Please provide an IP address, hostname, or CIDR notation",
        );
    };

    match app.engine.start_scan(&scan_type, &targets).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(json!({
                "id": id,
                "message": "Scan started successfully",
                "status": ScanStatus::Running
            })),
        )
            .into_response(),
        Err(e @ ScanError::AtCapacity(_)) => {
            error_body(StatusCode::SERVICE_UNAVAILABLE, "Scan capacity reached", e.to_string())
        }
        Err(e) if e.kind() == ErrorKind::InvalidInput => {
            error_body(StatusCode::BAD_REQUEST, "Invalid scan configuration", e.to_string())
        }
        Err(e) => {
            tracing::error!("scan start error: {e:#}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", e.to_string())
        }
    }
}

async fn scan_status(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<ScanId>() else {
        return scan_not_found();
    };
    match app.engine.get_scan_status(&id).await {
        Some(view) => Json(view).into_response(),
        None => scan_not_found(),
    }
}

async fn scan_results(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<ScanId>() else {
        return scan_not_found();
    };
    if let Some(results) = app.engine.get_scan_results(&id).await {
        return Json((*results).clone()).into_response();
    }
    let Some(view) = app.engine.get_scan_status(&id).await else {
        return scan_not_found();
    };
    match view.status {
        ScanStatus::Running => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Scan in progress",
                "details": "Results are not available until the scan completes",
                "progress": view.progress,
                "currentStage": view.stage,
            })),
        )
            .into_response(),
        ScanStatus::Cancelled => error_body(
            StatusCode::GONE,
            "Scan was cancelled",
            "Results are not available for cancelled scans",
        ),
        ScanStatus::Failed => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Scan failed to complete",
            view.error.unwrap_or_else(|| "The scan encountered an error".to_string()),
        ),
        ScanStatus::Completed => error_body(
            StatusCode::NOT_FOUND,
            "Results not found",
            "Results are not available for this scan",
        ),
    }
}

async fn cancel_scan(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<ScanId>() else {
        return scan_not_found();
    };
    if app.engine.cancel_scan(&id).await {
        return Json(json!({
            "id": id,
            "message": "Scan cancelled successfully",
            "status": ScanStatus::Cancelled
        }))
        .into_response();
    }
    match app.engine.get_scan_status(&id).await {
        None => scan_not_found(),
        Some(view) => error_body(
            StatusCode::CONFLICT,
            "Cannot cancel scan",
            format!("Scan is not running (current status: {})", view.status),
        ),
    }
}
