// dlbus-bridge - DL-bus telemetry bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP service.
//!
//! Three read-only endpoints, each individually switchable in the
//! configuration:
//!
//! - `GET /version` - version information
//! - `GET /health`  - uptime and pipeline counters
//! - `GET /data`    - latest parsed frame, or `null` before the first one
//!
//! The data handler only borrows the snapshot slot, so it can never hold
//! the parser up for more than a watch-channel read.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use dlbus::device::DeviceFrame;
use dlbus::pipeline::{PipelineStats, StatsSnapshot};

use crate::config::ServicesConfig;

/// Module description reported by `/version`.
pub const DESCRIPTION: &str = "DL-bus telemetry bridge";

/// Human-readable version string.
pub fn about() -> String {
    format!("{} v{}", DESCRIPTION, env!("CARGO_PKG_VERSION"))
}

/// Shared state of the web handlers.
pub struct AppState {
    /// Latest parsed frame from the pipeline.
    pub snapshot: watch::Receiver<Option<DeviceFrame>>,
    /// Pipeline counters.
    pub stats: Arc<PipelineStats>,
    /// Process start, for uptime reporting.
    pub started: Instant,
}

/// Build the router with the enabled routes.
pub fn router(services: &ServicesConfig, state: Arc<AppState>) -> Router {
    let mut router = Router::new();
    if services.version {
        router = router.route("/version", get(version_handler));
    }
    if services.health {
        router = router.route("/health", get(health_handler));
    }
    if services.data {
        router = router.route("/data", get(data_handler));
    }
    router.with_state(state)
}

/// Version response body.
#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    description: &'static str,
    about: String,
}

async fn version_handler() -> Json<VersionResponse> {
    debug!("web request version");
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        description: DESCRIPTION,
        about: about(),
    })
}

/// Health response body.
#[derive(Serialize)]
struct HealthResponse {
    version: &'static str,
    time: String,
    uptime_secs: u64,
    pipeline: StatsSnapshot,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("web request health");
    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION"),
        time: Utc::now().to_rfc3339(),
        uptime_secs: state.started.elapsed().as_secs(),
        pipeline: state.stats.snapshot(),
    })
}

/// Latest frame, or JSON `null` until the first frame parsed.
async fn data_handler(State(state): State<Arc<AppState>>) -> Json<Option<DeviceFrame>> {
    debug!("web request data");
    Json(state.snapshot.borrow().clone())
}
