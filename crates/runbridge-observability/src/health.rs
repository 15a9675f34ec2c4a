//! Health and metrics endpoints served next to the invocation route
//!
//! - `/healthz` answers as long as the process is up and reports how many
//!   invocations completed or failed so far
//! - `/metrics` renders the Prometheus registry in text format

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::TextEncoder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics::Metrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub invocations: InvocationCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationCounts {
    pub completed: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct HealthState {
    pub metrics: Arc<Metrics>,
}

impl HealthState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }

    fn counts(&self) -> InvocationCounts {
        let outcome = |label: &str| {
            self.metrics
                .invocations_total
                .with_label_values(&[label])
                .get() as u64
        };

        InvocationCounts {
            completed: outcome("completed"),
            failed: outcome("failed"),
        }
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

async fn healthz(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        invocations: state.counts(),
    })
}

async fn render_metrics(State(state): State<HealthState>) -> Response {
    let families = state.metrics.registry().gather();

    match TextEncoder::new().encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", err),
        )
            .into_response(),
    }
}
