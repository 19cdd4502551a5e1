use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    self, generate_quote_number, CreateQuoteRequest, Quote, QuoteDetail, QuoteItem, QuoteQuery,
    QuoteStatus, QuoteTotals, Role, WorkRequestStatus,
};
use crate::{AppState, DbPool};

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::metrics;
use super::validation::{
    validate_date, validate_optional_text, validate_percentage, validate_required_text,
};
use super::work_requests;

async fn load_detail(db: &DbPool, id: &str) -> Result<QuoteDetail, ApiError> {
    let quote: Quote = sqlx::query_as("SELECT * FROM quotes WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Quote not found"))?;

    let items: Vec<QuoteItem> =
        sqlx::query_as("SELECT * FROM quote_items WHERE quote_id = ? ORDER BY position")
            .bind(id)
            .fetch_all(db)
            .await?;

    Ok(QuoteDetail { quote, items })
}

/// Clients never see drafts; professionals only their own quotes
fn can_view(user: &CurrentUser, quote: &Quote) -> bool {
    match user.role() {
        Role::Admin => true,
        Role::Professional => quote.professional_id == user.id(),
        Role::Client => quote.client_id == user.id() && quote.status_enum() != QuoteStatus::Draft,
    }
}

async fn load_visible(state: &AppState, user: &CurrentUser, id: &str) -> Result<QuoteDetail, ApiError> {
    let detail = load_detail(&state.db, id).await?;
    if !can_view(user, &detail.quote) {
        return Err(ApiError::not_found("Quote not found"));
    }
    Ok(detail)
}

fn validate_create(req: &CreateQuoteRequest, tax_rate: f64) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("title", validate_required_text(&req.title, "Title", 200));
    errors.check("description", validate_optional_text(&req.description, "Description", 5000));
    errors.check("tax_rate", validate_percentage(tax_rate, "Tax rate"));
    errors.check("valid_until", validate_date(&req.valid_until));

    if req.items.is_empty() {
        errors.add("items", "A quote needs at least one line item");
    }
    for (index, item) in req.items.iter().enumerate() {
        let field = format!("items[{}]", index);
        if let Err(message) = validate_required_text(&item.description, "Description", 500) {
            errors.add(field.clone(), message);
        }
        if !item.quantity.is_finite() || item.quantity <= 0.0 {
            errors.add(field.clone(), "Quantity must be greater than zero");
        }
        if !item.unit_price.is_finite() || item.unit_price < 0.0 {
            errors.add(field, "Unit price cannot be negative");
        }
    }
    errors.finish()
}

/// POST /api/quotes - draft a quote against an open or assigned work request
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<QuoteDetail>), ApiError> {
    user.require(Some(Role::Professional))?;

    let tax_rate = req.tax_rate.unwrap_or(state.config.quotes.default_tax_rate);
    validate_create(&req, tax_rate)?;

    let work_request = work_requests::load(&state.db, &req.work_request_id).await?;
    let refused: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM work_request_refusals WHERE work_request_id = ? AND professional_id = ?",
    )
    .bind(&work_request.id)
    .bind(user.id())
    .fetch_optional(&state.db)
    .await?;

    let status = work_request.status_enum();
    let open = status == WorkRequestStatus::Pending
        && work_request.assigned_professional_id.is_none()
        && refused.is_none();
    let mine = work_request.is_assigned_to(user.id()) && !status.is_terminal();
    if !open && !mine {
        return Err(ApiError::conflict("This work request is not open for quotes"));
    }

    let totals = QuoteTotals::compute(&req.items, tax_rate);
    let uuid = uuid::Uuid::new_v4();
    let id = uuid.to_string();
    let now = db::now();
    let valid_until = req
        .valid_until
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| {
            let days = state.config.quotes.validity_days;
            (chrono::Utc::now() + chrono::Duration::days(days))
                .format("%Y-%m-%d")
                .to_string()
        });

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO quotes (
            id, quote_number, work_request_id, professional_id, client_id, title, description,
            status, tax_rate, subtotal, tax_amount, total, valid_until, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(generate_quote_number(&uuid))
    .bind(&work_request.id)
    .bind(user.id())
    .bind(&work_request.client_id)
    .bind(req.title.trim())
    .bind(&req.description)
    .bind(QuoteStatus::Draft.as_str())
    .bind(tax_rate)
    .bind(totals.subtotal)
    .bind(totals.tax_amount)
    .bind(totals.total)
    .bind(&valid_until)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    for (position, item) in req.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO quote_items (id, quote_id, position, description, quantity, unit_price, total) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&id)
        .bind(position as i64)
        .bind(item.description.trim())
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.line_total())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    metrics::record_quote_created();
    tracing::info!(
        quote_id = %id,
        work_request_id = %work_request.id,
        professional_id = %user.id(),
        total = totals.total,
        "Quote created"
    );

    Ok((StatusCode::CREATED, Json(load_detail(&state.db, &id).await?)))
}

/// GET /api/quotes?status=&work_request_id=
pub async fn list(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<Vec<Quote>>, ApiError> {
    user.require(None)?;

    let mut conditions: Vec<&str> = Vec::new();
    let mut bindings: Vec<String> = Vec::new();

    match user.role() {
        Role::Professional => {
            conditions.push("professional_id = ?");
            bindings.push(user.id().to_string());
        }
        Role::Client => {
            conditions.push("client_id = ?");
            bindings.push(user.id().to_string());
            conditions.push("status != 'draft'");
        }
        Role::Admin => {}
    }

    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: QuoteStatus = status.parse()?;
        conditions.push("status = ?");
        bindings.push(status.as_str().to_string());
    }
    if let Some(work_request_id) = query.work_request_id.as_deref().filter(|s| !s.is_empty()) {
        conditions.push("work_request_id = ?");
        bindings.push(work_request_id.to_string());
    }

    let mut sql = String::from("SELECT * FROM quotes");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut q = sqlx::query_as::<_, Quote>(&sql);
    for value in &bindings {
        q = q.bind(value);
    }

    Ok(Json(q.fetch_all(&state.db).await?))
}

/// GET /api/quotes/:id
pub async fn get(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<QuoteDetail>, ApiError> {
    user.require(None)?;
    Ok(Json(load_visible(&state, &user, &id).await?))
}

/// Move a quote between statuses, conditional on the expected current status
async fn set_status(
    db: &DbPool,
    id: &str,
    from: QuoteStatus,
    to: QuoteStatus,
) -> Result<(), ApiError> {
    let result = sqlx::query("UPDATE quotes SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(db::now())
        .bind(id)
        .bind(from.as_str())
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::conflict(format!("Only {} quotes can be {}", from, to)));
    }
    Ok(())
}

/// POST /api/quotes/:id/send
pub async fn send(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<QuoteDetail>, ApiError> {
    user.require(Some(Role::Professional))?;
    load_visible(&state, &user, &id).await?;

    set_status(&state.db, &id, QuoteStatus::Draft, QuoteStatus::Sent).await?;
    tracing::info!(quote_id = %id, "Quote sent");

    Ok(Json(load_detail(&state.db, &id).await?))
}

/// POST /api/quotes/:id/accept
///
/// A request gets at most one accepted quote. Accepting assigns a request
/// nobody has taken yet to the quote's professional, and the other quotes
/// still waiting on that request are rejected in the same transaction.
pub async fn accept(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<QuoteDetail>, ApiError> {
    user.require(Some(Role::Client))?;
    let detail = load_visible(&state, &user, &id).await?;
    let quote = &detail.quote;

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    if quote.valid_until.as_deref().is_some_and(|until| until < today.as_str()) {
        return Err(ApiError::conflict("This quote has expired"));
    }

    let now = db::now();
    let mut tx = state.db.begin().await?;

    let already_accepted: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quotes WHERE work_request_id = ? AND status = 'accepted' AND id != ?",
    )
    .bind(&quote.work_request_id)
    .bind(&id)
    .fetch_one(&mut *tx)
    .await?;
    if already_accepted > 0 {
        return Err(ApiError::conflict(
            "Another quote has already been accepted for this work request",
        ));
    }

    let request: (String, Option<String>) = sqlx::query_as(
        "SELECT status, assigned_professional_id FROM work_requests WHERE id = ?",
    )
    .bind(&quote.work_request_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Work request not found"))?;

    let status: WorkRequestStatus = request.0.parse()?;
    match request.1.as_deref() {
        None if status == WorkRequestStatus::Pending => {
            sqlx::query(
                r#"
                UPDATE work_requests
                SET status = 'assigned', assigned_professional_id = ?, updated_at = ?
                WHERE id = ? AND status = 'pending' AND assigned_professional_id IS NULL
                "#,
            )
            .bind(&quote.professional_id)
            .bind(&now)
            .bind(&quote.work_request_id)
            .execute(&mut *tx)
            .await?;
        }
        Some(assignee) if assignee == quote.professional_id && !status.is_terminal() => {}
        _ => {
            return Err(ApiError::conflict(
                "This work request is no longer open to this professional",
            ));
        }
    }

    let result = sqlx::query(
        "UPDATE quotes SET status = 'accepted', updated_at = ? WHERE id = ? AND status = 'sent'",
    )
    .bind(&now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Only sent quotes can be accepted"));
    }

    let superseded = sqlx::query(
        "UPDATE quotes SET status = 'rejected', updated_at = ? WHERE work_request_id = ? AND id != ? AND status = 'sent'",
    )
    .bind(&now)
    .bind(&quote.work_request_id)
    .bind(&id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    tracing::info!(
        quote_id = %id,
        work_request_id = %quote.work_request_id,
        professional_id = %quote.professional_id,
        superseded,
        "Quote accepted"
    );

    Ok(Json(load_detail(&state.db, &id).await?))
}

/// POST /api/quotes/:id/reject
pub async fn reject(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<QuoteDetail>, ApiError> {
    user.require(Some(Role::Client))?;
    load_visible(&state, &user, &id).await?;

    set_status(&state.db, &id, QuoteStatus::Sent, QuoteStatus::Rejected).await?;
    tracing::info!(quote_id = %id, "Quote rejected");

    Ok(Json(load_detail(&state.db, &id).await?))
}

/// DELETE /api/quotes/:id - drafts only
pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    user.require(Some(Role::Professional))?;
    load_visible(&state, &user, &id).await?;

    let result = sqlx::query("DELETE FROM quotes WHERE id = ? AND status = 'draft'")
        .bind(&id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Only draft quotes can be deleted"));
    }

    Ok(StatusCode::NO_CONTENT)
}
