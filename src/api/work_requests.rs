//! Work request endpoints: posting, role-filtered listings, the professional
//! tabs, accept/refuse and status transitions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{
    self, get_work_request, CreateWorkRequest, RefuseWorkRequest, Role, TransitionActor,
    UpdateStatusRequest, WorkRequest, WorkRequestQuery, WorkRequestStatus, WorkRequestTab,
};
use crate::{AppState, DbPool};

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::metrics;
use super::validation::{
    validate_budget, validate_date, validate_optional_text, validate_postal_code,
    validate_required_text,
};

/// Whether the caller may read a work request.
///
/// Owners, assignees and admins always can. Professionals can also see open
/// requests so they can decide whether to take them.
pub(crate) fn can_view(user: &CurrentUser, work_request: &WorkRequest) -> bool {
    match user.role() {
        Role::Admin => true,
        Role::Client => work_request.client_id == user.id(),
        Role::Professional => {
            work_request.is_assigned_to(user.id())
                || (work_request.status_enum() == WorkRequestStatus::Pending
                    && work_request.assigned_professional_id.is_none())
        }
    }
}

pub(crate) async fn load(db: &DbPool, id: &str) -> Result<WorkRequest, ApiError> {
    get_work_request(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Work request not found"))
}

fn validate_create(req: &CreateWorkRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("title", validate_required_text(&req.title, "Title", 200));
    errors.check("description", validate_required_text(&req.description, "Description", 5000));
    if req.category.chars().count() > 100 {
        errors.add("category", "Category is too long (max 100 characters)");
    }
    errors.check("budget", validate_budget(req.budget_min, req.budget_max));
    errors.check("address", validate_optional_text(&req.address, "Address", 255));
    errors.check("city", validate_optional_text(&req.city, "City", 100));
    errors.check("postal_code", validate_postal_code(&req.postal_code));
    errors.check("desired_date", validate_date(&req.desired_date));
    errors.finish()
}

/// POST /api/work-requests
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateWorkRequest>,
) -> Result<(StatusCode, Json<WorkRequest>), ApiError> {
    user.require(Some(Role::Client))?;
    validate_create(&req)?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now();
    let category = req.category.trim().to_lowercase();

    sqlx::query(
        r#"
        INSERT INTO work_requests (
            id, client_id, title, description, category, budget_min, budget_max,
            address, city, postal_code, desired_date, status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(user.id())
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(&category)
    .bind(req.budget_min)
    .bind(req.budget_max)
    .bind(&req.address)
    .bind(&req.city)
    .bind(&req.postal_code)
    .bind(req.desired_date.as_deref().filter(|d| !d.is_empty()))
    .bind(WorkRequestStatus::Pending.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    metrics::record_work_request_created();
    tracing::info!(work_request_id = %id, client_id = %user.id(), "Work request created");

    let work_request = load(&state.db, &id).await?;
    Ok((StatusCode::CREATED, Json(work_request)))
}

/// GET /api/work-requests/my
///
/// Clients get their own requests, professionals the ones assigned to them,
/// admins everything.
pub async fn my(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<WorkRequest>>, ApiError> {
    user.require(None)?;

    let work_requests = match user.role() {
        Role::Client => {
            sqlx::query_as::<_, WorkRequest>(
                "SELECT * FROM work_requests WHERE client_id = ? ORDER BY created_at DESC",
            )
            .bind(user.id())
            .fetch_all(&state.db)
            .await?
        }
        Role::Professional => {
            sqlx::query_as::<_, WorkRequest>(
                "SELECT * FROM work_requests WHERE assigned_professional_id = ? ORDER BY created_at DESC",
            )
            .bind(user.id())
            .fetch_all(&state.db)
            .await?
        }
        Role::Admin => {
            sqlx::query_as::<_, WorkRequest>("SELECT * FROM work_requests ORDER BY created_at DESC")
                .fetch_all(&state.db)
                .await?
        }
    };

    Ok(Json(work_requests))
}

#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub message: String,
    pub user_id: String,
    pub role: Role,
}

/// GET /api/work-requests/test - authenticated echo
pub async fn test(user: CurrentUser) -> Result<Json<TestResponse>, ApiError> {
    user.require(None)?;
    Ok(Json(TestResponse {
        message: "Work requests API is reachable".to_string(),
        user_id: user.id().to_string(),
        role: user.role(),
    }))
}

/// GET /api/work-requests?tab=available|accepted|completed&category=
pub async fn list(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<WorkRequestQuery>,
) -> Result<Json<Vec<WorkRequest>>, ApiError> {
    user.require(Some(Role::Professional))?;

    let mut sql = match query.tab {
        WorkRequestTab::Available => String::from(
            r#"SELECT * FROM work_requests wr
            WHERE wr.status = 'pending'
              AND wr.assigned_professional_id IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM work_request_refusals r
                  WHERE r.work_request_id = wr.id AND r.professional_id = ?
              )"#,
        ),
        WorkRequestTab::Accepted => String::from(
            "SELECT * FROM work_requests wr WHERE wr.assigned_professional_id = ? AND wr.status IN ('assigned', 'in_progress')",
        ),
        WorkRequestTab::Completed => String::from(
            "SELECT * FROM work_requests wr WHERE wr.assigned_professional_id = ? AND wr.status = 'completed'",
        ),
    };

    let category = query
        .category
        .as_deref()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty());
    if category.is_some() {
        sql.push_str(" AND wr.category = ?");
    }
    sql.push_str(" ORDER BY wr.created_at DESC");

    let mut q = sqlx::query_as::<_, WorkRequest>(&sql).bind(user.id());
    if let Some(category) = &category {
        q = q.bind(category);
    }

    Ok(Json(q.fetch_all(&state.db).await?))
}

/// GET /api/work-requests/:id
pub async fn get(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<WorkRequest>, ApiError> {
    user.require(None)?;
    let work_request = load(&state.db, &id).await?;
    if !can_view(&user, &work_request) {
        return Err(ApiError::not_found("Work request not found"));
    }
    Ok(Json(work_request))
}

/// POST /api/work-requests/:id/accept
///
/// Conditional update: only one professional can move a pending request to
/// assigned, the others get 409.
pub async fn accept(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<WorkRequest>, ApiError> {
    user.require(Some(Role::Professional))?;

    let result = sqlx::query(
        r#"
        UPDATE work_requests
        SET status = 'assigned', assigned_professional_id = ?, updated_at = ?
        WHERE id = ? AND status = 'pending' AND assigned_professional_id IS NULL
        "#,
    )
    .bind(user.id())
    .bind(db::now())
    .bind(&id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        load(&state.db, &id).await?;
        return Err(ApiError::conflict("This work request is no longer available"));
    }

    tracing::info!(work_request_id = %id, professional_id = %user.id(), "Work request accepted");
    Ok(Json(load(&state.db, &id).await?))
}

/// POST /api/work-requests/:id/refuse - hide an open request from the caller's available tab
pub async fn refuse(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    body: Option<Json<RefuseWorkRequest>>,
) -> Result<StatusCode, ApiError> {
    user.require(Some(Role::Professional))?;

    let work_request = load(&state.db, &id).await?;
    if work_request.status_enum() != WorkRequestStatus::Pending {
        return Err(ApiError::conflict("Only pending work requests can be refused"));
    }

    let reason = body
        .and_then(|Json(b)| b.reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if reason.as_ref().is_some_and(|r| r.chars().count() > 500) {
        return Err(ApiError::validation_field("reason", "Reason is too long (max 500 characters)"));
    }

    sqlx::query(
        r#"
        INSERT INTO work_request_refusals (work_request_id, professional_id, reason, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (work_request_id, professional_id) DO UPDATE SET reason = excluded.reason
        "#,
    )
    .bind(&id)
    .bind(user.id())
    .bind(&reason)
    .bind(db::now())
    .execute(&state.db)
    .await?;

    tracing::info!(work_request_id = %id, professional_id = %user.id(), "Work request refused");
    Ok(StatusCode::NO_CONTENT)
}

/// Apply a status change if `actor` is allowed to make it.
///
/// The update is conditional on the status read beforehand, so a concurrent
/// change makes this call fail with 409 instead of overwriting it.
pub(crate) async fn transition(
    db: &DbPool,
    work_request: &WorkRequest,
    target: WorkRequestStatus,
    actor: TransitionActor,
) -> Result<WorkRequest, ApiError> {
    let current = work_request.status_enum();
    if !current.can_transition(target, actor) {
        return Err(ApiError::conflict(format!(
            "Cannot change status from {} to {}",
            current, target
        )));
    }

    let needs_assignee = matches!(
        target,
        WorkRequestStatus::Assigned | WorkRequestStatus::InProgress | WorkRequestStatus::Completed
    );
    if needs_assignee && work_request.assigned_professional_id.is_none() {
        return Err(ApiError::conflict("No professional is assigned to this work request"));
    }

    // Reopening a request releases the professional
    let assignee = if target == WorkRequestStatus::Pending {
        None
    } else {
        work_request.assigned_professional_id.clone()
    };

    let result = sqlx::query(
        "UPDATE work_requests SET status = ?, assigned_professional_id = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(target.as_str())
    .bind(&assignee)
    .bind(db::now())
    .bind(&work_request.id)
    .bind(&work_request.status)
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("The work request was modified concurrently"));
    }

    tracing::info!(
        work_request_id = %work_request.id,
        from = %current,
        to = %target,
        actor = ?actor,
        "Work request status changed"
    );
    load(db, &work_request.id).await
}

/// PUT /api/work-requests/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<WorkRequest>, ApiError> {
    user.require(None)?;
    let target: WorkRequestStatus = req.status.parse()?;

    let work_request = load(&state.db, &id).await?;
    let actor = if user.is_admin() {
        TransitionActor::Admin
    } else if work_request.client_id == user.id() {
        TransitionActor::Owner
    } else if work_request.is_assigned_to(user.id()) {
        TransitionActor::Assignee
    } else if can_view(&user, &work_request) {
        return Err(ApiError::forbidden("Only the client or the assigned professional can change the status"));
    } else {
        return Err(ApiError::not_found("Work request not found"));
    };

    Ok(Json(transition(&state.db, &work_request, target, actor).await?))
}

/// DELETE /api/work-requests/:id - the owner, while nobody has taken it
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    user.require(None)?;

    let work_request = load(&state.db, &id).await?;
    if work_request.client_id != user.id() && !user.is_admin() {
        return Err(ApiError::not_found("Work request not found"));
    }

    let result = sqlx::query("DELETE FROM work_requests WHERE id = ? AND status = 'pending'")
        .bind(&id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Only pending work requests can be deleted"));
    }

    tracing::info!(work_request_id = %id, user_id = %user.id(), "Work request deleted");
    Ok(StatusCode::NO_CONTENT)
}
