//! Accounts and sessions: sign-up, sign-in, session restore, email
//! confirmation and password reset, plus the `CurrentUser` extractor that
//! every protected handler receives.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{
    self, actions, get_profile, resource_types, serialize_string_list, ConfirmEmailRequest,
    PasswordResetConfirmRequest, PasswordResetRequest, Profile, Role, Session, SessionResponse,
    SignInRequest, SignUpRequest, TokenPurpose, User,
};
use crate::guard::{self, GuardDecision, GuardState, SessionOutcome};
use crate::{AppState, DbPool};

use super::audit::{audit_log, ClientIp};
use super::error::{ApiError, ValidationErrorBuilder};
use super::metrics;
use super::validation::{
    normalize_email, normalize_specialties, validate_amount, validate_email,
    validate_optional_text, validate_password, validate_password_confirmation, validate_phone,
    validate_postal_code, validate_required_text, validate_specialties,
};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random 32-byte token, hex encoded
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the bearer token from the Authorization header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("Authorization").and_then(|h| h.to_str().ok())?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// A freshly created session and its plaintext token
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub token: String,
    pub expires_at: String,
}

pub async fn create_session(
    pool: &DbPool,
    user_id: &str,
    ttl_hours: i64,
) -> Result<NewSession, sqlx::Error> {
    let token = generate_token();
    let id = uuid::Uuid::new_v4().to_string();
    let expires_at = db::timestamp(chrono::Utc::now() + chrono::Duration::hours(ttl_hours));

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(db::now())
    .execute(pool)
    .await?;

    Ok(NewSession {
        id,
        token,
        expires_at,
    })
}

/// Issue a single-use token and return its plaintext.
/// Earlier unused tokens of the same purpose for the user are discarded.
pub async fn issue_token(
    pool: &DbPool,
    user_id: &str,
    purpose: TokenPurpose,
    ttl: chrono::Duration,
) -> Result<String, sqlx::Error> {
    let token = generate_token();
    let expires_at = db::timestamp(chrono::Utc::now() + ttl);

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM auth_tokens WHERE user_id = ? AND purpose = ? AND used_at IS NULL")
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "INSERT INTO auth_tokens (id, user_id, purpose, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(purpose.as_str())
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(db::now())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(token)
}

/// Mark a token as used and return its owner. Unknown, expired, already used
/// or wrong-purpose tokens yield `None`.
pub async fn consume_token(
    conn: &mut SqliteConnection,
    token: &str,
    purpose: TokenPurpose,
) -> Result<Option<String>, sqlx::Error> {
    let now = db::now();
    let token_hash = hash_token(token);

    let user_id: Option<(String,)> = sqlx::query_as(
        "SELECT user_id FROM auth_tokens WHERE token_hash = ? AND purpose = ? AND used_at IS NULL AND expires_at > ?",
    )
    .bind(&token_hash)
    .bind(purpose.as_str())
    .bind(&now)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((user_id,)) = user_id else {
        return Ok(None);
    };

    let result = sqlx::query(
        "UPDATE auth_tokens SET used_at = ? WHERE token_hash = ? AND used_at IS NULL",
    )
    .bind(&now)
    .bind(&token_hash)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(user_id))
}

/// The authenticated caller: identity, profile and the session in use.
///
/// Inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub profile: Profile,
    pub session: Session,
    require_confirmation: bool,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn role(&self) -> Role {
        self.profile.role_enum()
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Role::Admin
    }

    pub fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            role: self.role(),
            email_confirmed: self.user.is_confirmed(),
            active: self.profile.is_active,
        }
    }

    /// Run the route guard for this caller and map refusals to API errors
    pub fn require(&self, required_role: Option<Role>) -> Result<(), ApiError> {
        let decision = guard::evaluate(required_role, self.require_confirmation, Some(self.outcome()));
        match decision.state {
            GuardState::Authorized => Ok(()),
            GuardState::Unconfirmed => Err(ApiError::email_not_confirmed()),
            GuardState::WrongRole => Err(ApiError::forbidden(format!(
                "This action requires the {} role",
                required_role.map(|r| r.as_str()).unwrap_or("required")
            ))),
            GuardState::Unauthenticated | GuardState::Loading => {
                Err(ApiError::unauthorized("Authentication required"))
            }
        }
    }

    /// Like [`require`](Self::require) but accepts any of several roles
    pub fn require_any(&self, roles: &[Role]) -> Result<(), ApiError> {
        self.require(None)?;
        if roles.contains(&self.role()) {
            Ok(())
        } else {
            Err(ApiError::forbidden("You do not have access to this resource"))
        }
    }
}

/// Resolve a bearer token to its live session, user and profile
pub async fn resolve_session(
    pool: &DbPool,
    config: &Config,
    token: &str,
) -> Result<Option<CurrentUser>, sqlx::Error> {
    let session: Option<Session> =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(hash_token(token))
            .bind(db::now())
            .fetch_optional(pool)
            .await?;
    let Some(session) = session else {
        return Ok(None);
    };

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&session.user_id)
        .fetch_optional(pool)
        .await?;
    let Some(user) = user else {
        return Ok(None);
    };

    let Some(profile) = get_profile(pool, &user.id).await? else {
        tracing::warn!(user_id = %user.id, "Session for an account without profile");
        return Ok(None);
    };

    Ok(Some(CurrentUser {
        user,
        profile,
        session,
        require_confirmation: config.auth.require_email_confirmation,
    }))
}

/// Auth middleware: resolves the bearer token once per request and stores the
/// caller in request extensions. Deactivated accounts are treated as signed out.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let current = resolve_session(&state.db, &state.config, &token)
        .await?
        .filter(|current| current.profile.is_active)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(current);
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

fn session_response(
    user: &User,
    profile: &Profile,
    access_token: Option<String>,
    expires_at: String,
) -> SessionResponse {
    SessionResponse {
        access_token,
        user_id: user.id.clone(),
        email: user.email.clone(),
        email_confirmed_at: user.email_confirmed_at.clone(),
        expires_at,
        profile: profile.to_response(Some(user.email.clone())),
    }
}

/// Account and profile fields written together at sign-up
struct NewAccount<'a> {
    email: &'a str,
    password_hash: &'a str,
    confirmed: bool,
    role: Role,
    first_name: &'a str,
    last_name: &'a str,
    request: Option<&'a SignUpRequest>,
}

/// Insert the user and its profile. Callers run this inside a transaction.
async fn insert_account(conn: &mut SqliteConnection, account: &NewAccount<'_>) -> Result<String, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now();
    let confirmed_at = account.confirmed.then(|| now.clone());

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, email_confirmed_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(account.email)
    .bind(account.password_hash)
    .bind(&confirmed_at)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let req = account.request;
    sqlx::query(
        r#"
        INSERT INTO profiles (
            user_id, role, first_name, last_name, phone, address, city, postal_code,
            company_name, specialties, hourly_rate, bio, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(account.role.as_str())
    .bind(account.first_name.trim())
    .bind(account.last_name.trim())
    .bind(req.and_then(|r| trimmed(&r.phone)))
    .bind(req.and_then(|r| trimmed(&r.address)))
    .bind(req.and_then(|r| trimmed(&r.city)))
    .bind(req.and_then(|r| trimmed(&r.postal_code)))
    .bind(req.and_then(|r| trimmed(&r.company_name)))
    .bind(req.and_then(|r| serialize_string_list(&normalize_specialties(&r.specialties))))
    .bind(req.and_then(|r| r.hourly_rate))
    .bind(req.and_then(|r| trimmed(&r.bio)))
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn validate_sign_up(request: &SignUpRequest) -> Result<Role, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    errors.check(
        "password_confirmation",
        validate_password_confirmation(&request.password, &request.password_confirmation),
    );
    errors.check("email", validate_email(request.email.trim()));
    errors.check("password", validate_password(&request.password));
    errors.check("first_name", validate_required_text(&request.first_name, "First name", 100));
    errors.check("last_name", validate_required_text(&request.last_name, "Last name", 100));
    errors.check("phone", validate_phone(&request.phone));
    errors.check("postal_code", validate_postal_code(&request.postal_code));
    errors.check("hourly_rate", validate_amount(request.hourly_rate, "Hourly rate"));
    errors.check("specialties", validate_specialties(&request.specialties));
    errors.check("bio", validate_optional_text(&request.bio, "Bio", 2000));

    let role = match request.role.parse::<Role>() {
        Ok(role) if role.is_self_service() => Some(role),
        Ok(_) => {
            errors.add("role", "Only client and professional accounts can be created");
            None
        }
        Err(e) => {
            errors.add("role", e.to_string());
            None
        }
    };

    errors.finish()?;
    role.ok_or_else(|| ApiError::validation_field("role", "Invalid role"))
}

/// Email the confirmation link in the background
fn send_confirmation(state: &AppState, email: String, first_name: String, token: String) {
    let mailer = state.mailer.clone();
    let ttl_hours = state.config.auth.confirmation_token_ttl_hours;
    tokio::spawn(async move {
        if let Err(e) = mailer
            .send_confirmation_email(&email, &first_name, &token, ttl_hours)
            .await
        {
            tracing::error!(to = %email, error = %e, "Failed to send confirmation email");
        }
    });
}

/// POST /api/auth/sign-up
pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let role = validate_sign_up(&request)?;
    let email = normalize_email(&request.email);

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let confirmed = !state.config.auth.require_email_confirmation;
    let mut tx = state.db.begin().await?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let user_id = insert_account(
        &mut *tx,
        &NewAccount {
            email: &email,
            password_hash: &password_hash,
            confirmed,
            role,
            first_name: &request.first_name,
            last_name: &request.last_name,
            request: Some(&request),
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user_id, role = %role, "Account created");

    if !confirmed {
        let ttl = chrono::Duration::hours(state.config.auth.confirmation_token_ttl_hours);
        let token = issue_token(&state.db, &user_id, TokenPurpose::ConfirmEmail, ttl).await?;
        send_confirmation(&state, email.clone(), request.first_name.clone(), token);
    }

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user_id)
        .fetch_one(&state.db)
        .await?;
    let profile = get_profile(&state.db, &user_id)
        .await?
        .ok_or_else(|| ApiError::internal("Profile missing after sign-up"))?;

    let session = create_session(&state.db, &user_id, state.config.auth.session_ttl_hours).await?;

    audit_log(
        &state,
        actions::AUTH_SIGN_UP,
        resource_types::USER,
        Some(&user_id),
        Some(&user_id),
        ip.as_deref(),
        Some(serde_json::json!({ "role": role.as_str() })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(session_response(&user, &profile, Some(session.token), session.expires_at)),
    ))
}

/// POST /api/auth/sign-in
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(request): Json<SignInRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let email = normalize_email(&request.email);

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let user = match user {
        Some(user) if verify_password(&request.password, &user.password_hash) => user,
        _ => {
            metrics::record_sign_in(false);
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
    };

    let profile = get_profile(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::internal("Account has no profile"))?;
    if !profile.is_active {
        metrics::record_sign_in(false);
        return Err(ApiError::forbidden("This account has been deactivated"));
    }

    let session = create_session(&state.db, &user.id, state.config.auth.session_ttl_hours).await?;
    metrics::record_sign_in(true);
    tracing::info!(user_id = %user.id, "User signed in");

    audit_log(
        &state,
        actions::AUTH_SIGN_IN,
        resource_types::USER,
        Some(&user.id),
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    Ok(Json(session_response(&user, &profile, Some(session.token), session.expires_at)))
}

/// POST /api/auth/sign-out
pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ClientIp(ip): ClientIp,
) -> Result<StatusCode, ApiError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(&user.session.id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        actions::AUTH_SIGN_OUT,
        resource_types::USER,
        Some(user.id()),
        Some(user.id()),
        ip.as_deref(),
        None,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/session - restore the session behind the bearer token
pub async fn session(user: CurrentUser) -> Json<SessionResponse> {
    Json(session_response(
        &user.user,
        &user.profile,
        None,
        user.session.expires_at.clone(),
    ))
}

/// POST /api/auth/confirm-email
pub async fn confirm_email(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(request): Json<ConfirmEmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.db.begin().await?;
    let user_id = consume_token(&mut *tx, request.token.trim(), TokenPurpose::ConfirmEmail)
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired confirmation link"))?;

    let now = db::now();
    sqlx::query(
        "UPDATE users SET email_confirmed_at = COALESCE(email_confirmed_at, ?), updated_at = ? WHERE id = ?",
    )
    .bind(&now)
    .bind(&now)
    .bind(&user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user_id, "Email confirmed");

    audit_log(
        &state,
        actions::AUTH_EMAIL_CONFIRMED,
        resource_types::USER,
        Some(&user_id),
        Some(&user_id),
        ip.as_deref(),
        None,
    )
    .await;

    Ok(Json(serde_json::json!({ "confirmed": true })))
}

/// POST /api/auth/resend-confirmation
pub async fn resend_confirmation(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    if user.user.is_confirmed() {
        return Err(ApiError::conflict("Email address is already confirmed"));
    }

    let ttl = chrono::Duration::hours(state.config.auth.confirmation_token_ttl_hours);
    let token = issue_token(&state.db, user.id(), TokenPurpose::ConfirmEmail, ttl).await?;
    send_confirmation(
        &state,
        user.user.email.clone(),
        user.profile.first_name.clone(),
        token,
    );

    Ok(StatusCode::ACCEPTED)
}

/// POST /api/auth/reset-password
///
/// Always answers 202 so the response does not reveal whether the email exists.
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<StatusCode, ApiError> {
    let email = normalize_email(&request.email);
    if validate_email(&email).is_err() {
        return Ok(StatusCode::ACCEPTED);
    }

    let user: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    if let Some((user_id,)) = user {
        let ttl_minutes = state.config.auth.reset_token_ttl_minutes;
        let token = issue_token(
            &state.db,
            &user_id,
            TokenPurpose::PasswordReset,
            chrono::Duration::minutes(ttl_minutes),
        )
        .await?;

        let mailer = state.mailer.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer
                .send_password_reset_email(&email, &token, ttl_minutes)
                .await
            {
                tracing::error!(to = %email, error = %e, "Failed to send password reset email");
            }
        });
    }

    Ok(StatusCode::ACCEPTED)
}

/// POST /api/auth/reset-password/confirm
///
/// Sets the new password and signs the account out everywhere.
pub async fn confirm_password_reset(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Json(request): Json<PasswordResetConfirmRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check(
        "password_confirmation",
        validate_password_confirmation(&request.password, &request.password_confirmation),
    );
    errors.check("password", validate_password(&request.password));
    errors.finish()?;

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let mut tx = state.db.begin().await?;
    let user_id = consume_token(&mut *tx, request.token.trim(), TokenPurpose::PasswordReset)
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired reset link"))?;

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(db::now())
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;
    let revoked = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(&user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;

    tracing::info!(user_id = %user_id, revoked_sessions = revoked, "Password reset");

    audit_log(
        &state,
        actions::AUTH_PASSWORD_RESET,
        resource_types::USER,
        Some(&user_id),
        Some(&user_id),
        ip.as_deref(),
        Some(serde_json::json!({ "revoked_sessions": revoked })),
    )
    .await;

    Ok(Json(serde_json::json!({ "reset": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct GuardQuery {
    pub required_role: Option<String>,
}

/// GET /api/auth/guard?required_role=
///
/// Evaluates the route guard for the caller. A missing or stale token is a
/// normal outcome here, not an error.
pub async fn guard_state(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<GuardQuery>,
) -> Result<Json<GuardDecision>, ApiError> {
    let required_role = query
        .required_role
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(str::parse::<Role>)
        .transpose()?;

    let outcome = match extract_token(&headers) {
        Some(token) => resolve_session(&state.db, &state.config, &token)
            .await?
            .map(|current| current.outcome()),
        None => None,
    };

    Ok(Json(guard::evaluate(
        required_role,
        state.config.auth.require_email_confirmation,
        outcome,
    )))
}

/// Create or promote the bootstrap admin account from `auth.admin_email` /
/// `auth.admin_password`. Does nothing when either is unset.
pub async fn ensure_admin_user(pool: &DbPool, config: &Config) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password) else {
        return Ok(());
    };
    let email = normalize_email(email);

    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    if let Some(user) = existing {
        let stored = get_profile(pool, &user.id).await?;
        let is_admin = stored
            .as_ref()
            .map(|p| p.role_enum() == Role::Admin)
            .unwrap_or(false);
        if !is_admin {
            sqlx::query("UPDATE profiles SET role = ?, updated_at = ? WHERE user_id = ?")
                .bind(Role::Admin.as_str())
                .bind(db::now())
                .bind(&user.id)
                .execute(pool)
                .await?;
            tracing::info!(user_id = %user.id, "Promoted bootstrap account to admin");
        }
        return Ok(());
    }

    if let Err(message) = validate_password(password) {
        anyhow::bail!("Bootstrap admin password rejected: {}", message);
    }
    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    let mut tx = pool.begin().await?;
    let user_id = insert_account(
        &mut *tx,
        &NewAccount {
            email: &email,
            password_hash: &password_hash,
            confirmed: true,
            role: Role::Admin,
            first_name: "Admin",
            last_name: "Pinsart",
            request: None,
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %user_id, email = %email, "Created bootstrap admin account");
    Ok(())
}
