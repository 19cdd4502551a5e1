//! Prometheus metrics endpoint and HTTP request tracking middleware.
//!
//! This module provides:
//! - A `/metrics` endpoint (admin only) that returns Prometheus-formatted metrics
//! - Middleware for tracking HTTP request counts and durations
//! - Helpers to record sign-ins and marketplace activity

use anyhow::Context;
use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::db::Role;
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const SIGN_INS_TOTAL: &str = "sign_ins_total";
pub const WORK_REQUESTS_CREATED_TOTAL: &str = "work_requests_created_total";
pub const QUOTES_CREATED_TOTAL: &str = "quotes_created_total";
pub const USERS_TOTAL: &str = "users_total";
pub const WORK_REQUESTS_BY_STATUS: &str = "work_requests_by_status";

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Call once during startup; the recorder is process-global.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(SIGN_INS_TOTAL, "Sign-in attempts by result (success/failed)");
    describe_counter!(WORK_REQUESTS_CREATED_TOTAL, "Work requests posted by clients");
    describe_counter!(QUOTES_CREATED_TOTAL, "Quotes drafted by professionals");
    describe_gauge!(USERS_TOTAL, "Registered accounts by role");
    describe_gauge!(WORK_REQUESTS_BY_STATUS, "Work requests by lifecycle status");

    Ok(handle)
}

/// GET /metrics - Prometheus text format
pub async fn metrics_endpoint(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<String, ApiError> {
    user.require(Some(Role::Admin))?;
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(handle) => Ok(handle.render()),
        None => Err(ApiError::internal("Metrics not initialized")),
    }
}

/// Refresh gauges from the database before rendering
async fn update_gauge_metrics(state: &AppState) {
    if let Ok(rows) = sqlx::query_as::<_, (String, i64)>(
        "SELECT role, COUNT(*) FROM profiles GROUP BY role",
    )
    .fetch_all(&state.db)
    .await
    {
        for (role, count) in rows {
            gauge!(USERS_TOTAL, "role" => role).set(count as f64);
        }
    }

    if let Ok(rows) = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM work_requests GROUP BY status",
    )
    .fetch_all(&state.db)
    .await
    {
        for (status, count) in rows {
            gauge!(WORK_REQUESTS_BY_STATUS, "status" => status).set(count as f64);
        }
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records `http_requests_total` with method, path and status labels, and
/// `http_request_duration_seconds` with method and path labels.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Matched route template keeps label cardinality bounded (/api/quotes/:id)
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_sign_in(success: bool) {
    let result = if success { "success" } else { "failed" };
    counter!(SIGN_INS_TOTAL, "result" => result).increment(1);
}

/// Unlabelled: categories are client free text.
pub fn record_work_request_created() {
    counter!(WORK_REQUESTS_CREATED_TOTAL).increment(1);
}

pub fn record_quote_created() {
    counter!(QUOTES_CREATED_TOTAL).increment(1);
}
