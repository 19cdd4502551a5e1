//! Audit log API endpoints and helpers.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::db::{list_audit_logs, log_audit, AuditLog, AuditLogQuery, Page, Role};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

/// Extract the client IP address.
/// Checks X-Forwarded-For first (the first entry is the client), then X-Real-IP,
/// then the peer address of the connection.
pub fn extract_client_ip(headers: &HeaderMap, conn_info: Option<&SocketAddr>) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first_ip) = forwarded.split(',').next() {
            let ip = first_ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        let ip = real_ip.trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }

    conn_info.map(|addr| addr.ip().to_string())
}

/// Peer address recorded by `into_make_service_with_connect_info`
pub fn connect_info(extensions: &axum::http::Extensions) -> Option<&SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr)
}

/// Client IP as an address, for per-client bookkeeping such as rate limiting.
/// Only requests with neither a usable header nor a peer address fall back to
/// loopback.
pub fn client_ip_addr(headers: &HeaderMap, conn_info: Option<&SocketAddr>) -> IpAddr {
    extract_client_ip(headers, None)
        .and_then(|ip| ip.parse().ok())
        .or_else(|| conn_info.map(SocketAddr::ip))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Client IP for audit entries
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(extract_client_ip(
            &parts.headers,
            connect_info(&parts.extensions),
        )))
    }
}

/// Record an audit event. Failures are logged and never fail the request.
pub async fn audit_log(
    state: &AppState,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    user_id: Option<&str>,
    ip_address: Option<&str>,
    details: Option<serde_json::Value>,
) {
    if let Err(e) = log_audit(
        &state.db,
        action,
        resource_type,
        resource_id,
        user_id,
        ip_address,
        details,
    )
    .await
    {
        tracing::warn!(
            action = action,
            resource_type = resource_type,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}

/// List audit logs with filtering and pagination (admin)
///
/// Query parameters:
/// - action: e.g. "user.toggle_active"
/// - resource_type: "user" or "work_request"
/// - resource_id, user_id
/// - start_date / end_date: RFC 3339 bounds on `created_at`
/// - page, per_page
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Page<AuditLog>>, ApiError> {
    user.require(Some(Role::Admin))?;
    let result = list_audit_logs(&state.db, &query).await?;
    Ok(Json(result))
}

/// Distinct action names, for filter dropdowns (admin)
pub async fn list_action_types(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<String>>, ApiError> {
    user.require(Some(Role::Admin))?;
    let actions: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT action FROM audit_logs ORDER BY action")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(actions.into_iter().map(|(a,)| a).collect()))
}
