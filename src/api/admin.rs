//! Admin endpoints: account management, status overrides and statistics.
//!
//! Every handler requires the admin role. Actions that change another
//! account are written to the audit log.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{
    self, actions, get_profile, resource_types, AdminWorkRequestQuery, Page, Pagination,
    ProfileResponse, ProfileWithEmail, Role, TransitionActor, UpdateRoleRequest,
    UpdateStatusRequest, UserListQuery, WorkRequest, WorkRequestStatus,
};
use crate::AppState;

use super::audit::{audit_log, ClientIp};
use super::auth::CurrentUser;
use super::error::ApiError;
use super::work_requests;

/// GET /api/admin/users?role=&search=
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Page<ProfileResponse>>, ApiError> {
    user.require(Some(Role::Admin))?;

    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };

    let mut conditions: Vec<&str> = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    if let Some(role) = query.role.as_deref().filter(|r| !r.is_empty()) {
        let role: Role = role.parse()?;
        conditions.push("p.role = ?");
        bindings.push(role.as_str().to_string());
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(LOWER(u.email) LIKE ? OR LOWER(p.first_name) LIKE ? OR LOWER(p.last_name) LIKE ? OR LOWER(COALESCE(p.company_name, '')) LIKE ?)",
        );
        let pattern = format!("%{}%", search.to_lowercase());
        for _ in 0..4 {
            bindings.push(pattern.clone());
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!(
        "SELECT COUNT(*) FROM profiles p JOIN users u ON u.id = p.user_id{}",
        where_clause
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for value in &bindings {
        count_query = count_query.bind(value);
    }
    let total = count_query.fetch_one(&state.db).await?;

    let sql = format!(
        "SELECT p.*, u.email FROM profiles p JOIN users u ON u.id = p.user_id{} ORDER BY p.created_at DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut q = sqlx::query_as::<_, ProfileWithEmail>(&sql);
    for value in &bindings {
        q = q.bind(value);
    }
    let rows = q
        .bind(pagination.per_page())
        .bind(pagination.offset())
        .fetch_all(&state.db)
        .await?;

    let items = rows
        .into_iter()
        .map(|row| row.profile.to_response(Some(row.email)))
        .collect();

    Ok(Json(Page::new(items, total, &pagination)))
}

async fn load_user(state: &AppState, user_id: &str) -> Result<ProfileResponse, ApiError> {
    let row: ProfileWithEmail = sqlx::query_as(
        "SELECT p.*, u.email FROM profiles p JOIN users u ON u.id = p.user_id WHERE p.user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(row.profile.to_response(Some(row.email)))
}

/// PUT /api/admin/users/:id/role
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.require(Some(Role::Admin))?;
    let role: Role = req.role.parse()?;

    if id == user.id() && role != Role::Admin {
        return Err(ApiError::bad_request("You cannot remove your own admin role"));
    }

    let previous = get_profile(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    sqlx::query("UPDATE profiles SET role = ?, updated_at = ? WHERE user_id = ?")
        .bind(role.as_str())
        .bind(db::now())
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %id, from = %previous.role, to = %role, admin_id = %user.id(), "Role changed");

    audit_log(
        &state,
        actions::USER_ROLE_CHANGE,
        resource_types::USER,
        Some(&id),
        Some(user.id()),
        ip.as_deref(),
        Some(serde_json::json!({ "from": previous.role, "to": role.as_str() })),
    )
    .await;

    Ok(Json(load_user(&state, &id).await?))
}

/// POST /api/admin/users/:id/toggle-active
///
/// Flips the active flag. Deactivation also ends every session of the account.
pub async fn toggle_active(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.require(Some(Role::Admin))?;

    if id == user.id() {
        return Err(ApiError::bad_request("You cannot deactivate your own account"));
    }

    let mut tx = state.db.begin().await?;
    let result = sqlx::query(
        "UPDATE profiles SET is_active = CASE WHEN is_active = 1 THEN 0 ELSE 1 END, updated_at = ? WHERE user_id = ?",
    )
    .bind(db::now())
    .bind(&id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    let is_active: bool = sqlx::query_scalar("SELECT is_active FROM profiles WHERE user_id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;
    if !is_active {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(user_id = %id, is_active, admin_id = %user.id(), "Account active flag toggled");

    audit_log(
        &state,
        actions::USER_TOGGLE_ACTIVE,
        resource_types::USER,
        Some(&id),
        Some(user.id()),
        ip.as_deref(),
        Some(serde_json::json!({ "is_active": is_active })),
    )
    .await;

    Ok(Json(load_user(&state, &id).await?))
}

/// DELETE /api/admin/users/:id
///
/// Removes the account with its profile, sessions, work requests and quotes.
/// Requests the user was working on go back to pending.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    user.require(Some(Role::Admin))?;

    if id == user.id() {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let target = load_user(&state, &id).await?;
    let avatar_key = get_profile(&state.db, &id)
        .await?
        .and_then(|p| p.avatar_path);

    let mut tx = state.db.begin().await?;
    let released = sqlx::query(
        r#"
        UPDATE work_requests
        SET status = 'pending', assigned_professional_id = NULL, updated_at = ?
        WHERE assigned_professional_id = ? AND status IN ('assigned', 'in_progress')
        "#,
    )
    .bind(db::now())
    .bind(&id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    if let Some(key) = avatar_key {
        if let Err(e) = state.storage.delete(&key).await {
            tracing::warn!(key = %key, error = %e, "Failed to remove avatar of deleted user");
        }
    }

    tracing::info!(user_id = %id, released_work_requests = released, admin_id = %user.id(), "User deleted");

    audit_log(
        &state,
        actions::USER_DELETE,
        resource_types::USER,
        Some(&id),
        Some(user.id()),
        ip.as_deref(),
        Some(serde_json::json!({ "email": target.email, "role": target.role })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/admin/work-requests?status=
pub async fn list_work_requests(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<AdminWorkRequestQuery>,
) -> Result<Json<Page<WorkRequest>>, ApiError> {
    user.require(Some(Role::Admin))?;

    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<WorkRequestStatus>)
        .transpose()?;

    let (total, items) = match status {
        Some(status) => {
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_requests WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&state.db)
                .await?;
            let items = sqlx::query_as::<_, WorkRequest>(
                "SELECT * FROM work_requests WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(status.as_str())
            .bind(pagination.per_page())
            .bind(pagination.offset())
            .fetch_all(&state.db)
            .await?;
            (total, items)
        }
        None => {
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM work_requests")
                .fetch_one(&state.db)
                .await?;
            let items = sqlx::query_as::<_, WorkRequest>(
                "SELECT * FROM work_requests ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(pagination.per_page())
            .bind(pagination.offset())
            .fetch_all(&state.db)
            .await?;
            (total, items)
        }
    };

    Ok(Json(Page::new(items, total, &pagination)))
}

/// PUT /api/admin/work-requests/:id/status - override to any status
pub async fn override_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<WorkRequest>, ApiError> {
    user.require(Some(Role::Admin))?;
    let target: WorkRequestStatus = req.status.parse()?;

    let work_request = work_requests::load(&state.db, &id).await?;
    let previous = work_request.status.clone();
    let updated =
        work_requests::transition(&state.db, &work_request, target, TransitionActor::Admin).await?;

    audit_log(
        &state,
        actions::WORK_REQUEST_STATUS_OVERRIDE,
        resource_types::WORK_REQUEST,
        Some(&id),
        Some(user.id()),
        ip.as_deref(),
        Some(serde_json::json!({ "from": previous, "to": target.as_str() })),
    )
    .await;

    Ok(Json(updated))
}

#[derive(Debug, Serialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub users_by_role: BTreeMap<String, i64>,
    pub active_users: i64,
    pub total_work_requests: i64,
    pub work_requests_by_status: BTreeMap<String, i64>,
    pub total_quotes: i64,
    pub quotes_by_status: BTreeMap<String, i64>,
    /// Sum of accepted quote totals, tax included
    pub accepted_quotes_value: f64,
}

async fn grouped_counts(state: &AppState, sql: &str) -> Result<BTreeMap<String, i64>, sqlx::Error> {
    let rows: Vec<(String, i64)> = sqlx::query_as(sql).fetch_all(&state.db).await?;
    Ok(rows.into_iter().collect())
}

/// GET /api/admin/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<AdminStats>, ApiError> {
    user.require(Some(Role::Admin))?;

    let users_by_role =
        grouped_counts(&state, "SELECT role, COUNT(*) FROM profiles GROUP BY role").await?;
    let work_requests_by_status =
        grouped_counts(&state, "SELECT status, COUNT(*) FROM work_requests GROUP BY status").await?;
    let quotes_by_status =
        grouped_counts(&state, "SELECT status, COUNT(*) FROM quotes GROUP BY status").await?;

    let active_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE is_active = 1")
        .fetch_one(&state.db)
        .await?;
    let accepted_quotes_value: f64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(total), 0.0) FROM quotes WHERE status = 'accepted'")
            .fetch_one(&state.db)
            .await?;

    Ok(Json(AdminStats {
        total_users: users_by_role.values().sum(),
        users_by_role,
        active_users,
        total_work_requests: work_requests_by_status.values().sum(),
        work_requests_by_status,
        total_quotes: quotes_by_status.values().sum(),
        quotes_by_status,
        accepted_quotes_value: db::round_cents(accepted_quotes_value),
    }))
}
