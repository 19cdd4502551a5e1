//! Audit log models for tracking account and admin actions.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::common::{Page, Pagination};

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

/// Query parameters for filtering audit logs
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    /// Filter by action (e.g., "user.toggle_active")
    pub action: Option<String>,
    /// Filter by resource type (e.g., "user", "work_request")
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    /// Start date for filtering (ISO 8601)
    pub start_date: Option<String>,
    /// End date for filtering (ISO 8601)
    pub end_date: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Audit action names
pub mod actions {
    pub const AUTH_SIGN_UP: &str = "auth.sign_up";
    pub const AUTH_SIGN_IN: &str = "auth.sign_in";
    pub const AUTH_SIGN_OUT: &str = "auth.sign_out";
    pub const AUTH_EMAIL_CONFIRMED: &str = "auth.email_confirmed";
    pub const AUTH_PASSWORD_RESET: &str = "auth.password_reset";

    pub const USER_ROLE_CHANGE: &str = "user.role_change";
    pub const USER_TOGGLE_ACTIVE: &str = "user.toggle_active";
    pub const USER_DELETE: &str = "user.delete";

    pub const WORK_REQUEST_STATUS_OVERRIDE: &str = "work_request.status_override";
}

/// Resource type names
pub mod resource_types {
    pub const USER: &str = "user";
    pub const WORK_REQUEST: &str = "work_request";
}

/// Log an audit event to the database
pub async fn log_audit(
    db: &SqlitePool,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    user_id: Option<&str>,
    ip_address: Option<&str>,
    details: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now();
    let details_json = details.map(|d| d.to_string());

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, action, resource_type, resource_id, user_id, ip_address, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(user_id)
    .bind(ip_address)
    .bind(&details_json)
    .bind(&now)
    .execute(db)
    .await?;

    tracing::debug!(
        action = action,
        resource_type = resource_type,
        resource_id = resource_id,
        user_id = user_id,
        "Audit log recorded"
    );

    Ok(())
}

/// List audit logs with filtering and pagination
pub async fn list_audit_logs(
    db: &SqlitePool,
    query: &AuditLogQuery,
) -> Result<Page<AuditLog>, sqlx::Error> {
    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };

    let mut conditions = Vec::new();
    let mut bindings: Vec<&str> = Vec::new();

    let filters = [
        ("action = ?", &query.action),
        ("resource_type = ?", &query.resource_type),
        ("resource_id = ?", &query.resource_id),
        ("user_id = ?", &query.user_id),
        ("created_at >= ?", &query.start_date),
        ("created_at <= ?", &query.end_date),
    ];
    for (condition, value) in filters {
        if let Some(value) = value {
            conditions.push(condition);
            bindings.push(value.as_str());
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &bindings {
        count_query = count_query.bind(*binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT * FROM audit_logs {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut query_builder = sqlx::query_as::<_, AuditLog>(&sql);
    for binding in &bindings {
        query_builder = query_builder.bind(*binding);
    }
    let items = query_builder
        .bind(pagination.per_page())
        .bind(pagination.offset())
        .fetch_all(db)
        .await?;

    Ok(Page::new(items, total, &pagination))
}
