use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    self, get_profile, serialize_string_list, Profile, ProfessionalQuery, ProfileResponse, Role,
    UpdateProfileRequest,
};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_specialties, validate_amount, validate_optional_text, validate_phone,
    validate_postal_code, validate_required_text, validate_specialties,
};

const AVATAR_PREFIX: &str = "avatars";

fn own_response(user: &CurrentUser, profile: &Profile) -> Json<ProfileResponse> {
    Json(profile.to_response(Some(user.user.email.clone())))
}

async fn reload(state: &AppState, user_id: &str) -> Result<Profile, ApiError> {
    get_profile(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))
}

/// GET /api/profile
pub async fn get_own_profile(user: CurrentUser) -> Result<Json<ProfileResponse>, ApiError> {
    user.require(None)?;
    Ok(own_response(&user, &user.profile))
}

fn validate_update(req: &UpdateProfileRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(first_name) = &req.first_name {
        errors.check("first_name", validate_required_text(first_name, "First name", 100));
    }
    if let Some(last_name) = &req.last_name {
        errors.check("last_name", validate_required_text(last_name, "Last name", 100));
    }
    errors.check("phone", validate_phone(&req.phone));
    errors.check("postal_code", validate_postal_code(&req.postal_code));
    errors.check("address", validate_optional_text(&req.address, "Address", 255));
    errors.check("city", validate_optional_text(&req.city, "City", 100));
    errors.check("company_name", validate_optional_text(&req.company_name, "Company name", 150));
    errors.check("hourly_rate", validate_amount(req.hourly_rate, "Hourly rate"));
    errors.check("bio", validate_optional_text(&req.bio, "Bio", 2000));
    if let Some(specialties) = &req.specialties {
        errors.check("specialties", validate_specialties(specialties));
    }
    errors.finish()
}

/// Empty strings clear optional fields
fn merge(current: &Option<String>, update: &Option<String>) -> Option<String> {
    match update {
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(value.trim().to_string()),
        None => current.clone(),
    }
}

/// PUT /api/profile - partial update; role and activation are not writable here
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.require(None)?;
    validate_update(&req)?;

    let current = reload(&state, user.id()).await?;
    let specialties = match &req.specialties {
        Some(list) => serialize_string_list(&normalize_specialties(list)),
        None => current.specialties.clone(),
    };

    sqlx::query(
        r#"
        UPDATE profiles SET
            first_name = ?, last_name = ?, phone = ?, address = ?, city = ?, postal_code = ?,
            company_name = ?, specialties = ?, hourly_rate = ?, bio = ?, updated_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(req.first_name.as_deref().map(str::trim).unwrap_or(&current.first_name))
    .bind(req.last_name.as_deref().map(str::trim).unwrap_or(&current.last_name))
    .bind(merge(&current.phone, &req.phone))
    .bind(merge(&current.address, &req.address))
    .bind(merge(&current.city, &req.city))
    .bind(merge(&current.postal_code, &req.postal_code))
    .bind(merge(&current.company_name, &req.company_name))
    .bind(&specialties)
    .bind(req.hourly_rate.or(current.hourly_rate))
    .bind(merge(&current.bio, &req.bio))
    .bind(db::now())
    .bind(user.id())
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.id(), "Profile updated");

    let profile = reload(&state, user.id()).await?;
    Ok(own_response(&user, &profile))
}

/// POST /api/profile/avatar - multipart upload, field `file`
pub async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.require(None)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((content_type, file_name, data));
        break;
    }

    let (content_type, file_name, data) =
        upload.ok_or_else(|| ApiError::validation_field("file", "An image file is required"))?;
    if data.is_empty() {
        return Err(ApiError::validation_field("file", "The uploaded file is empty"));
    }

    let key = state
        .storage
        .put_image(
            AVATAR_PREFIX,
            user.id(),
            content_type.as_deref(),
            file_name.as_deref(),
            data,
        )
        .await?;

    let previous = user.profile.avatar_path.clone();
    sqlx::query("UPDATE profiles SET avatar_path = ?, updated_at = ? WHERE user_id = ?")
        .bind(&key)
        .bind(db::now())
        .bind(user.id())
        .execute(&state.db)
        .await?;

    if let Some(old_key) = previous {
        if let Err(e) = state.storage.delete(&old_key).await {
            tracing::warn!(key = %old_key, error = %e, "Failed to remove previous avatar");
        }
    }

    tracing::info!(user_id = %user.id(), key = %key, "Avatar uploaded");

    let profile = reload(&state, user.id()).await?;
    Ok(own_response(&user, &profile))
}

/// DELETE /api/profile/avatar
pub async fn delete_avatar(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    user.require(None)?;

    let Some(key) = user.profile.avatar_path.clone() else {
        return Ok(StatusCode::NO_CONTENT);
    };

    sqlx::query("UPDATE profiles SET avatar_path = NULL, updated_at = ? WHERE user_id = ?")
        .bind(db::now())
        .bind(user.id())
        .execute(&state.db)
        .await?;
    state.storage.delete(&key).await?;

    Ok(StatusCode::NO_CONTENT)
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("Uploaded file is too large")
    } else {
        ApiError::bad_request(err.body_text())
    }
}

/// GET /api/professionals?specialty=&city= - directory of active professionals
pub async fn list_professionals(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ProfessionalQuery>,
) -> Result<Json<Vec<ProfileResponse>>, ApiError> {
    user.require(None)?;

    let mut sql = String::from("SELECT * FROM profiles WHERE role = ? AND is_active = 1");
    let mut bindings = vec![Role::Professional.as_str().to_string()];

    if let Some(specialty) = query.specialty.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        // Stored lists are normalized JSON arrays; match one whole encoded element
        let needle = serde_json::to_string(&specialty.to_lowercase())
            .map_err(|e| ApiError::internal(format!("Failed to encode specialty: {}", e)))?;
        sql.push_str(" AND instr(specialties, ?) > 0");
        bindings.push(needle);
    }
    sql.push_str(" ORDER BY COALESCE(company_name, last_name), first_name");

    let mut q = sqlx::query_as::<_, Profile>(&sql);
    for value in &bindings {
        q = q.bind(value);
    }
    let mut profiles = q.fetch_all(&state.db).await?;

    // SQLite LOWER() only folds ASCII, so cities are compared here
    if let Some(city) = query.city.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let city = city.to_lowercase();
        profiles.retain(|p| {
            p.city
                .as_deref()
                .is_some_and(|c| c.trim().to_lowercase() == city)
        });
    }

    Ok(Json(profiles.iter().map(|p| p.to_response(None)).collect()))
}
