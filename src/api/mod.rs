mod admin;
pub mod audit;
pub mod auth;
pub mod error;
pub mod metrics;
mod profiles;
mod quotes;
pub mod rate_limit;
pub mod validation;
mod work_requests;

#[cfg(test)]
mod tests;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Multipart framing on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Account routes reachable without a session, on the stricter rate limit
    let public_auth_routes = Router::new()
        .route("/auth/sign-up", post(auth::sign_up))
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/confirm-email", post(auth::confirm_email))
        .route("/auth/reset-password", post(auth::request_password_reset))
        .route("/auth/reset-password/confirm", post(auth::confirm_password_reset))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Checked on every guarded navigation; works with or without a session
    let guard_routes = Router::new()
        .route("/auth/guard", get(auth::guard_state))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let avatar_limit = state.storage.max_bytes() + MULTIPART_OVERHEAD_BYTES;

    // Protected API routes
    let api_routes = Router::new()
        // Session
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/auth/session", get(auth::session))
        .route("/auth/resend-confirmation", post(auth::resend_confirmation))
        // Profiles
        .route("/profile", get(profiles::get_own_profile).put(profiles::update_profile))
        .route(
            "/profile/avatar",
            post(profiles::upload_avatar)
                .delete(profiles::delete_avatar)
                .layer(DefaultBodyLimit::max(avatar_limit)),
        )
        .route("/professionals", get(profiles::list_professionals))
        // Work requests
        .route("/work-requests", get(work_requests::list).post(work_requests::create))
        .route("/work-requests/my", get(work_requests::my))
        .route("/work-requests/test", get(work_requests::test))
        .route(
            "/work-requests/:id",
            get(work_requests::get).delete(work_requests::delete),
        )
        .route("/work-requests/:id/accept", post(work_requests::accept))
        .route("/work-requests/:id/refuse", post(work_requests::refuse))
        .route("/work-requests/:id/status", put(work_requests::update_status))
        // Quotes
        .route("/quotes", get(quotes::list).post(quotes::create))
        .route("/quotes/:id", get(quotes::get).delete(quotes::delete))
        .route("/quotes/:id/send", post(quotes::send))
        .route("/quotes/:id/accept", post(quotes::accept))
        .route("/quotes/:id/reject", post(quotes::reject))
        // Admin
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id", axum::routing::delete(admin::delete_user))
        .route("/admin/users/:id/role", put(admin::update_role))
        .route("/admin/users/:id/toggle-active", post(admin::toggle_active))
        .route("/admin/work-requests", get(admin::list_work_requests))
        .route("/admin/work-requests/:id/status", put(admin::override_status))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/audit-logs", get(audit::list_logs))
        .route("/admin/audit-logs/actions", get(audit::list_action_types))
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics::metrics_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let uploads = ServeDir::new(state.storage.root());

    Router::new()
        .route("/health", get(health_check))
        .merge(metrics_routes)
        .nest(
            "/api",
            public_auth_routes.merge(guard_routes).merge(api_routes),
        )
        .nest_service("/uploads", uploads)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.server.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(allowed)
}

async fn health_check() -> &'static str {
    "OK"
}
