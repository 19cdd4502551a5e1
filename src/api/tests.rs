use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use super::auth::{ensure_admin_user, issue_token};
use super::create_router;
use crate::config::Config;
use crate::db::{self, TokenPurpose};
use crate::AppState;

const PASSWORD: &str = "chantier2026";

struct TestApp {
    state: Arc<AppState>,
    router: Router,
    _uploads: TempDir,
}

async fn test_app(require_confirmation: bool) -> TestApp {
    test_app_with(|config| {
        config.auth.require_email_confirmation = require_confirmation;
        config.rate_limit.enabled = false;
    })
    .await
}

async fn test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let pool = db::init_memory().await.unwrap();
    let uploads = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    configure(&mut config);
    config.storage.uploads_dir = Some(uploads.path().to_path_buf());

    let state = Arc::new(AppState::new(config, pool));
    TestApp {
        router: create_router(state.clone()),
        state,
        _uploads: uploads,
    }
}

fn sign_up_body(email: &str, role: &str) -> Value {
    json!({
        "email": email,
        "password": PASSWORD,
        "password_confirmation": PASSWORD,
        "role": role,
        "first_name": "Camille",
        "last_name": "Martin",
        "city": "Lyon",
    })
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    /// Sign up and return (access token, user id)
    async fn sign_up(&self, email: &str, role: &str) -> (String, String) {
        let (status, body) = self
            .call(Method::POST, "/api/auth/sign-up", None, Some(sign_up_body(email, role)))
            .await;
        assert_eq!(status, StatusCode::CREATED, "sign-up failed: {}", body);
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["user_id"].as_str().unwrap().to_string(),
        )
    }

    async fn sign_in(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/auth/sign-in",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    async fn admin(&self) -> (String, String) {
        let mut config = self.state.config.clone();
        config.auth.admin_email = Some("admin@pinsart.fr".to_string());
        config.auth.admin_password = Some(PASSWORD.to_string());
        ensure_admin_user(&self.state.db, &config).await.unwrap();

        let (status, body) = self.sign_in("admin@pinsart.fr", PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["user_id"].as_str().unwrap().to_string(),
        )
    }

    async fn post_work_request(&self, token: &str, title: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/work-requests",
                Some(token),
                Some(json!({
                    "title": title,
                    "description": "Peinture complète, murs et plafond",
                    "category": "Peinture",
                    "budget_min": 800.0,
                    "budget_max": 1500.0,
                    "postal_code": "69003",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    /// Draft and send a one-line quote, returning its id
    async fn send_quote(&self, token: &str, work_request_id: &str, unit_price: f64) -> String {
        let (status, quote) = self
            .call(
                Method::POST,
                "/api/quotes",
                Some(token),
                Some(json!({
                    "work_request_id": work_request_id,
                    "title": "Devis travaux",
                    "items": [{ "description": "Forfait", "quantity": 1.0, "unit_price": unit_price }],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", quote);
        let id = quote["id"].as_str().unwrap().to_string();

        let (status, _) = self
            .call(Method::POST, &format!("/api/quotes/{}/send", id), Some(token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        id
    }

    async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&self.state.db).await.unwrap()
    }
}

fn ids(body: &Value) -> Vec<String> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app(false).await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn test_mismatched_confirmation_writes_nothing() {
    let app = test_app(false).await;
    let mut body = sign_up_body("lea@example.com", "client");
    body["password_confirmation"] = json!("chantier2027");

    let (status, response) = app.call(Method::POST, "/api/auth/sign-up", None, Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "validation_error");
    assert!(response["error"]["details"]["password_confirmation"].is_array());

    assert_eq!(app.count("SELECT COUNT(*) FROM users").await, 0);
    assert_eq!(app.count("SELECT COUNT(*) FROM profiles").await, 0);
}

#[tokio::test]
async fn test_sign_up_rejects_admin_role() {
    let app = test_app(false).await;
    let (status, response) = app
        .call(
            Method::POST,
            "/api/auth/sign-up",
            None,
            Some(sign_up_body("lea@example.com", "admin")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"]["details"]["role"].is_array());
    assert_eq!(app.count("SELECT COUNT(*) FROM users").await, 0);
}

#[tokio::test]
async fn test_sign_up_creates_profile_and_session() {
    let app = test_app(false).await;
    let (token, user_id) = app.sign_up("Lea@Example.com", "professional").await;

    let (status, session) = app.call(Method::GET, "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["user_id"], user_id.as_str());
    assert_eq!(session["email"], "lea@example.com");
    assert_eq!(session["profile"]["role"], "professional");
    assert!(session["email_confirmed_at"].is_string());
    assert!(session.get("access_token").is_none());

    let (status, response) = app
        .call(
            Method::POST,
            "/api/auth/sign-up",
            None,
            Some(sign_up_body("lea@example.com", "client")),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(response["error"]["code"], "conflict");
    assert_eq!(app.count("SELECT COUNT(*) FROM profiles").await, 1);
}

#[tokio::test]
async fn test_sign_in_and_sign_out() {
    let app = test_app(false).await;
    app.sign_up("lea@example.com", "client").await;

    let (status, _) = app.sign_in("lea@example.com", "wrong-password1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.sign_in("nobody@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.sign_in("lea@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["access_token"].as_str().unwrap().to_string();

    let (status, _) = app.call(Method::POST, "/api/auth/sign-out", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call(Method::GET, "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_guard_redirects_client_from_admin_route() {
    let app = test_app(false).await;
    let (token, _) = app.sign_up("lea@example.com", "client").await;

    let (status, decision) = app
        .call(Method::GET, "/api/auth/guard?required_role=admin", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["state"], "wrong_role");
    assert_eq!(decision["redirect"], "/unauthorized");

    let (_, decision) = app
        .call(Method::GET, "/api/auth/guard?required_role=client", Some(&token), None)
        .await;
    assert_eq!(decision["state"], "authorized");
    assert!(decision["redirect"].is_null());

    let (status, decision) = app
        .call(Method::GET, "/api/auth/guard?required_role=admin", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["state"], "unauthenticated");
    assert_eq!(decision["redirect"], "/login");

    let (status, _) = app.call(Method::GET, "/api/admin/stats", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unconfirmed_account_until_email_confirmed() {
    let app = test_app(true).await;
    let (token, user_id) = app.sign_up("lea@example.com", "client").await;

    let (_, decision) = app.call(Method::GET, "/api/auth/guard", Some(&token), None).await;
    assert_eq!(decision["state"], "unconfirmed");
    assert_eq!(decision["redirect"], "/verify-email");

    let (status, body) = app.call(Method::GET, "/api/work-requests/my", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "email_not_confirmed");

    let confirmation = issue_token(
        &app.state.db,
        &user_id,
        TokenPurpose::ConfirmEmail,
        chrono::Duration::hours(1),
    )
    .await
    .unwrap();
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/confirm-email",
            None,
            Some(json!({ "token": confirmation })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Tokens are single use
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/confirm-email",
            None,
            Some(json!({ "token": confirmation })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, decision) = app.call(Method::GET, "/api/auth/guard", Some(&token), None).await;
    assert_eq!(decision["state"], "authorized");
}

#[tokio::test]
async fn test_password_reset_revokes_sessions() {
    let app = test_app(false).await;
    let (token, user_id) = app.sign_up("lea@example.com", "client").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/reset-password",
            None,
            Some(json!({ "email": "unknown@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let reset = issue_token(
        &app.state.db,
        &user_id,
        TokenPurpose::PasswordReset,
        chrono::Duration::minutes(30),
    )
    .await
    .unwrap();
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/reset-password/confirm",
            None,
            Some(json!({
                "token": reset,
                "password": "nouveau2026",
                "password_confirmation": "nouveau2026",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(Method::GET, "/api/auth/session", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.sign_in("lea@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.sign_in("lea@example.com", "nouveau2026").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_empty_title_or_description_rejected() {
    let app = test_app(false).await;
    let (token, _) = app.sign_up("client@example.com", "client").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/work-requests",
            Some(&token),
            Some(json!({ "title": "", "description": "Salle de bain" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(body["error"]["details"]["title"].is_array());

    let (status, body) = app
        .call(
            Method::POST,
            "/api/work-requests",
            Some(&token),
            Some(json!({ "title": "Salle de bain", "description": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["description"].is_array());

    assert_eq!(app.count("SELECT COUNT(*) FROM work_requests").await, 0);
}

#[tokio::test]
async fn test_only_clients_post_work_requests() {
    let app = test_app(false).await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/work-requests",
            Some(&pro),
            Some(json!({ "title": "Cuisine", "description": "Pose de meubles" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::POST, "/api/work-requests", None, Some(json!({ "title": "x" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_my_and_test_endpoints_follow_role() {
    let app = test_app(false).await;
    let (client, client_id) = app.sign_up("client@example.com", "client").await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let first = app.post_work_request(&client, "Peinture salon").await;
    let second = app.post_work_request(&client, "Peinture chambre").await;

    let (_, mine) = app.call(Method::GET, "/api/work-requests/my", Some(&client), None).await;
    assert_eq!(mine.as_array().unwrap().len(), 2);

    let (_, mine) = app.call(Method::GET, "/api/work-requests/my", Some(&pro), None).await;
    assert!(mine.as_array().unwrap().is_empty());

    app.call(Method::POST, &format!("/api/work-requests/{}/accept", first), Some(&pro), None)
        .await;
    let (_, mine) = app.call(Method::GET, "/api/work-requests/my", Some(&pro), None).await;
    assert_eq!(ids(&mine), vec![first]);
    assert!(!ids(&mine).contains(&second));

    let (status, echo) = app.call(Method::GET, "/api/work-requests/test", Some(&client), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(echo["user_id"], client_id.as_str());
    assert_eq!(echo["role"], "client");
}

#[tokio::test]
async fn test_professional_tabs_are_isolated() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro_a, _) = app.sign_up("a@example.com", "professional").await;
    let (pro_b, _) = app.sign_up("b@example.com", "professional").await;

    let taken = app.post_work_request(&client, "Carrelage cuisine").await;
    let open = app.post_work_request(&client, "Parquet chambre").await;

    let (status, _) = app
        .call(Method::POST, &format!("/api/work-requests/{}/accept", taken), Some(&pro_a), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, accepted_a) = app
        .call(Method::GET, "/api/work-requests?tab=accepted", Some(&pro_a), None)
        .await;
    assert_eq!(ids(&accepted_a), vec![taken.clone()]);

    let (_, accepted_b) = app
        .call(Method::GET, "/api/work-requests?tab=accepted", Some(&pro_b), None)
        .await;
    assert!(accepted_b.as_array().unwrap().is_empty());

    let (_, available_b) = app
        .call(Method::GET, "/api/work-requests?tab=available", Some(&pro_b), None)
        .await;
    assert_eq!(ids(&available_b), vec![open]);

    let (status, _) = app
        .call(Method::GET, &format!("/api/work-requests/{}", taken), Some(&pro_b), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(Method::GET, "/api/work-requests?tab=available", Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_category_filter_and_refusal() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;

    let painting = app.post_work_request(&client, "Peinture couloir").await;
    let (_, plumbing) = app
        .call(
            Method::POST,
            "/api/work-requests",
            Some(&client),
            Some(json!({
                "title": "Fuite sous évier",
                "description": "Remplacer le siphon",
                "category": "Plomberie",
            })),
        )
        .await;
    let plumbing = plumbing["id"].as_str().unwrap().to_string();

    let (_, filtered) = app
        .call(Method::GET, "/api/work-requests?category=plomberie", Some(&pro), None)
        .await;
    assert_eq!(ids(&filtered), vec![plumbing]);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/work-requests/{}/refuse", painting),
            Some(&pro),
            Some(json!({ "reason": "Trop loin" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, available) = app
        .call(Method::GET, "/api/work-requests?tab=available", Some(&pro), None)
        .await;
    assert!(!ids(&available).contains(&painting));
}

#[tokio::test]
async fn test_second_accept_conflicts() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro_a, pro_a_id) = app.sign_up("a@example.com", "professional").await;
    let (pro_b, _) = app.sign_up("b@example.com", "professional").await;
    let id = app.post_work_request(&client, "Isolation combles").await;

    let (status, body) = app
        .call(Method::POST, &format!("/api/work-requests/{}/accept", id), Some(&pro_a), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "assigned");
    assert_eq!(body["assigned_professional_id"], pro_a_id.as_str());

    let (status, body) = app
        .call(Method::POST, &format!("/api/work-requests/{}/accept", id), Some(&pro_b), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, _) = app
        .call(Method::POST, "/api/work-requests/missing/accept", Some(&pro_b), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_transitions() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let (admin, _) = app.admin().await;
    let id = app.post_work_request(&client, "Ravalement façade").await;
    let status_uri = format!("/api/work-requests/{}/status", id);

    app.call(Method::POST, &format!("/api/work-requests/{}/accept", id), Some(&pro), None)
        .await;

    // Skipping in_progress is not allowed
    let (status, _) = app
        .call(Method::PUT, &status_uri, Some(&pro), Some(json!({ "status": "completed" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .call(Method::PUT, &status_uri, Some(&pro), Some(json!({ "status": "in_progress" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");

    // Too late for the client to cancel
    let (status, _) = app
        .call(Method::PUT, &status_uri, Some(&client), Some(json!({ "status": "cancelled" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(Method::PUT, &status_uri, Some(&pro), Some(json!({ "status": "finished" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/admin/work-requests/{}/status", id),
            Some(&admin),
            Some(json!({ "status": "pending" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert!(body["assigned_professional_id"].is_null());

    assert_eq!(
        app.count("SELECT COUNT(*) FROM audit_logs WHERE action = 'work_request.status_override'")
            .await,
        1
    );
}

#[tokio::test]
async fn test_owner_can_cancel_and_delete_pending() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (other, _) = app.sign_up("other@example.com", "client").await;
    let cancelled = app.post_work_request(&client, "Cloison").await;
    let removed = app.post_work_request(&client, "Velux").await;

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/work-requests/{}/status", cancelled),
            Some(&client),
            Some(json!({ "status": "cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/work-requests/{}", removed), Some(&other), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/work-requests/{}", removed), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/work-requests/{}", cancelled), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_quote_lifecycle_assigns_work_request() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro, pro_id) = app.sign_up("pro@example.com", "professional").await;
    let work_request = app.post_work_request(&client, "Peinture salon").await;

    let (status, quote) = app
        .call(
            Method::POST,
            "/api/quotes",
            Some(&pro),
            Some(json!({
                "work_request_id": work_request,
                "title": "Peinture salon 25m²",
                "items": [
                    { "description": "Peinture murs (m²)", "quantity": 2.0, "unit_price": 40.0 },
                    { "description": "Protection et nettoyage", "quantity": 1.0, "unit_price": 150.0 },
                ],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", quote);
    assert_eq!(quote["status"], "draft");
    assert_eq!(quote["subtotal"], 230.0);
    assert_eq!(quote["tax_amount"], 46.0);
    assert_eq!(quote["total"], 276.0);
    assert_eq!(quote["items"].as_array().unwrap().len(), 2);
    assert!(quote["quote_number"].as_str().unwrap().starts_with("DEV-"));
    let quote_id = quote["id"].as_str().unwrap().to_string();

    // Drafts are invisible to the client
    let (status, _) = app
        .call(Method::GET, &format!("/api/quotes/{}", quote_id), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = app.call(Method::GET, "/api/quotes", Some(&client), None).await;
    assert!(listed.as_array().unwrap().is_empty());

    let (status, _) = app
        .call(Method::POST, &format!("/api/quotes/{}/accept", quote_id), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, sent) = app
        .call(Method::POST, &format!("/api/quotes/{}/send", quote_id), Some(&pro), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["status"], "sent");

    let (status, accepted) = app
        .call(Method::POST, &format!("/api/quotes/{}/accept", quote_id), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");

    let (_, request) = app
        .call(Method::GET, &format!("/api/work-requests/{}", work_request), Some(&client), None)
        .await;
    assert_eq!(request["status"], "assigned");
    assert_eq!(request["assigned_professional_id"], pro_id.as_str());

    let (status, _) = app
        .call(Method::POST, &format!("/api/quotes/{}/reject", quote_id), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_quote_validation() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let work_request = app.post_work_request(&client, "Peinture salon").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/quotes",
            Some(&pro),
            Some(json!({ "work_request_id": work_request, "title": "Devis", "items": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["items"].is_array());

    let (status, body) = app
        .call(
            Method::POST,
            "/api/quotes",
            Some(&pro),
            Some(json!({
                "work_request_id": work_request,
                "title": "Devis",
                "tax_rate": 120.0,
                "items": [{ "description": "Main d'œuvre", "quantity": 0.0, "unit_price": 10.0 }],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["tax_rate"].is_array());
    assert!(body["error"]["details"]["items[0]"].is_array());

    let (status, _) = app
        .call(
            Method::POST,
            "/api/quotes",
            Some(&client),
            Some(json!({
                "work_request_id": work_request,
                "title": "Devis",
                "items": [{ "description": "x", "quantity": 1.0, "unit_price": 1.0 }],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.count("SELECT COUNT(*) FROM quotes").await, 0);
}

#[tokio::test]
async fn test_toggle_active_twice_restores_flag() {
    let app = test_app(false).await;
    let (admin, admin_id) = app.admin().await;
    let (client, client_id) = app.sign_up("client@example.com", "client").await;
    let uri = format!("/api/admin/users/{}/toggle-active", client_id);

    let (status, body) = app.call(Method::POST, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], false);

    // Deactivation ends the user's sessions and blocks sign-in
    let (status, _) = app.call(Method::GET, "/api/auth/session", Some(&client), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.sign_in("client@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call(Method::POST, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);
    let (status, _) = app.sign_in("client@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/admin/users/{}/toggle-active", admin_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(
        app.count("SELECT COUNT(*) FROM audit_logs WHERE action = 'user.toggle_active'").await,
        2
    );
}

#[tokio::test]
async fn test_admin_role_change_and_listing() {
    let app = test_app(false).await;
    let (admin, admin_id) = app.admin().await;
    let (_, client_id) = app.sign_up("lea@example.com", "client").await;
    app.sign_up("pro@example.com", "professional").await;

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/admin/users/{}/role", client_id),
            Some(&admin),
            Some(json!({ "role": "professional" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "professional");

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/admin/users/{}/role", admin_id),
            Some(&admin),
            Some(json!({ "role": "client" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, page) = app
        .call(Method::GET, "/api/admin/users?role=professional", Some(&admin), None)
        .await;
    assert_eq!(page["total"], 2);

    let (_, page) = app
        .call(Method::GET, "/api/admin/users?search=lea", Some(&admin), None)
        .await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["email"], "lea@example.com");

    let (_, stats) = app.call(Method::GET, "/api/admin/stats", Some(&admin), None).await;
    assert_eq!(stats["total_users"], 3);
    assert_eq!(stats["users_by_role"]["professional"], 2);
    assert_eq!(stats["users_by_role"]["admin"], 1);

    let (status, logs) = app
        .call(Method::GET, "/api/admin/audit-logs?action=user.role_change", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
}

#[tokio::test]
async fn test_delete_user_cascades() {
    let app = test_app(false).await;
    let (admin, _) = app.admin().await;
    let (client, client_id) = app.sign_up("client@example.com", "client").await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let work_request = app.post_work_request(&client, "Terrasse bois").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/quotes",
            Some(&pro),
            Some(json!({
                "work_request_id": work_request,
                "title": "Terrasse 20m²",
                "items": [{ "description": "Lames pin", "quantity": 20.0, "unit_price": 55.0 }],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/admin/users/{}", client_id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(app.count("SELECT COUNT(*) FROM work_requests").await, 0);
    assert_eq!(app.count("SELECT COUNT(*) FROM quotes").await, 0);
    assert_eq!(app.count("SELECT COUNT(*) FROM quote_items").await, 0);
    assert_eq!(app.count("SELECT COUNT(*) FROM profiles WHERE role = 'client'").await, 0);
    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = ?")
        .bind(&client_id)
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(sessions, 0);

    let (status, _) = app.call(Method::GET, "/api/auth/session", Some(&client), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_profile_update_and_directory() {
    let app = test_app(false).await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let (client, _) = app.sign_up("client@example.com", "client").await;

    let (status, profile) = app
        .call(
            Method::PUT,
            "/api/profile",
            Some(&pro),
            Some(json!({
                "company_name": "Martin Rénovation",
                "specialties": ["peinture", "plâtrerie"],
                "hourly_rate": 45.0,
                "phone": "06 12 34 56 78",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", profile);
    assert_eq!(profile["display_name"], "Martin Rénovation");
    assert_eq!(profile["specialties"], json!(["peinture", "plâtrerie"]));
    assert_eq!(profile["role"], "professional");

    let (status, _) = app
        .call(Method::PUT, "/api/profile", Some(&pro), Some(json!({ "postal_code": "123" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, directory) = app
        .call(Method::GET, "/api/professionals?specialty=Peinture&city=lyon", Some(&client), None)
        .await;
    assert_eq!(directory.as_array().unwrap().len(), 1);
    assert!(directory[0].get("email").is_none());

    let (_, directory) = app
        .call(Method::GET, "/api/professionals?specialty=plomberie", Some(&client), None)
        .await;
    assert!(directory.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_avatar_upload_and_delete() {
    let app = test_app(false).await;
    let (token, _) = app.sign_up("lea@example.com", "client").await;

    let boundary = "pinsart-boundary";
    let payload = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"avatar.png\"\r\nContent-Type: image/png\r\n\r\nnot-really-a-png\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/profile/avatar")
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(payload))
        .unwrap();
    let (status, profile) = app.send(request).await;
    assert_eq!(status, StatusCode::OK, "{}", profile);

    let avatar_url = profile["avatar_url"].as_str().unwrap().to_string();
    assert!(avatar_url.starts_with("/uploads/avatars/"));

    let (status, body) = app.call(Method::GET, &avatar_url, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("not-really-a-png".to_string()));

    let (status, _) = app.call(Method::DELETE, "/api/profile/avatar", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call(Method::GET, &avatar_url, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, profile) = app.call(Method::GET, "/api/profile", Some(&token), None).await;
    assert!(profile["avatar_url"].is_null());
}

#[tokio::test]
async fn test_only_one_quote_accepted_per_request() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro_a, pro_a_id) = app.sign_up("a@example.com", "professional").await;
    let (pro_b, _) = app.sign_up("b@example.com", "professional").await;
    let work_request = app.post_work_request(&client, "Rénovation cuisine").await;

    let quote_a = app.send_quote(&pro_a, &work_request, 4200.0).await;
    let quote_b = app.send_quote(&pro_b, &work_request, 3900.0).await;

    let (status, _) = app
        .call(Method::POST, &format!("/api/quotes/{}/accept", quote_a), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    // The competing quote is closed out with the acceptance
    let (_, other) = app
        .call(Method::GET, &format!("/api/quotes/{}", quote_b), Some(&client), None)
        .await;
    assert_eq!(other["status"], "rejected");

    let (status, _) = app
        .call(Method::POST, &format!("/api/quotes/{}/accept", quote_b), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert_eq!(
        app.count("SELECT COUNT(*) FROM quotes WHERE status = 'accepted'").await,
        1
    );
    let (_, request) = app
        .call(Method::GET, &format!("/api/work-requests/{}", work_request), Some(&client), None)
        .await;
    assert_eq!(request["assigned_professional_id"], pro_a_id.as_str());
}

#[tokio::test]
async fn test_quote_for_request_taken_by_another_professional_cannot_be_accepted() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro_a, pro_a_id) = app.sign_up("a@example.com", "professional").await;
    let (pro_b, _) = app.sign_up("b@example.com", "professional").await;
    let work_request = app.post_work_request(&client, "Salle d'eau").await;

    let quote_b = app.send_quote(&pro_b, &work_request, 2500.0).await;
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/work-requests/{}/accept", work_request),
            Some(&pro_a),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(Method::POST, &format!("/api/quotes/{}/accept", quote_b), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, quote) = app
        .call(Method::GET, &format!("/api/quotes/{}", quote_b), Some(&client), None)
        .await;
    assert_eq!(quote["status"], "sent");
    let (_, request) = app
        .call(Method::GET, &format!("/api/work-requests/{}", work_request), Some(&client), None)
        .await;
    assert_eq!(request["assigned_professional_id"], pro_a_id.as_str());
}

#[tokio::test]
async fn test_assignee_quote_can_be_accepted_after_taking_request() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let work_request = app.post_work_request(&client, "Parquet séjour").await;

    app.call(
        Method::POST,
        &format!("/api/work-requests/{}/accept", work_request),
        Some(&pro),
        None,
    )
    .await;
    let quote = app.send_quote(&pro, &work_request, 1800.0).await;

    let (status, body) = app
        .call(Method::POST, &format!("/api/quotes/{}/accept", quote), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
}

#[tokio::test]
async fn test_expired_quote_cannot_be_accepted() {
    let app = test_app(false).await;
    let (client, _) = app.sign_up("client@example.com", "client").await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let work_request = app.post_work_request(&client, "Volets roulants").await;
    let quote = app.send_quote(&pro, &work_request, 900.0).await;

    sqlx::query("UPDATE quotes SET valid_until = '2020-01-31' WHERE id = ?")
        .bind(&quote)
        .execute(&app.state.db)
        .await
        .unwrap();

    let (status, body) = app
        .call(Method::POST, &format!("/api/quotes/{}/accept", quote), Some(&client), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["message"].as_str().unwrap().contains("expired"));

    let (_, request) = app
        .call(Method::GET, &format!("/api/work-requests/{}", work_request), Some(&client), None)
        .await;
    assert_eq!(request["status"], "pending");
}

#[tokio::test]
async fn test_directory_matches_accented_values() {
    let app = test_app(false).await;
    let (pro, _) = app.sign_up("pro@example.com", "professional").await;
    let (client, _) = app.sign_up("client@example.com", "client").await;

    let (status, profile) = app
        .call(
            Method::PUT,
            "/api/profile",
            Some(&pro),
            Some(json!({
                "specialties": ["Électricité", " Peinture"],
                "city": "Évry",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["specialties"], json!(["électricité", "peinture"]));

    for uri in [
        "/api/professionals?specialty=%C3%89lectricit%C3%A9",
        "/api/professionals?specialty=%C3%A9lectricit%C3%A9",
        "/api/professionals?specialty=peinture",
        "/api/professionals?city=%C3%89vry",
        "/api/professionals?city=%C3%A9VRY",
    ] {
        let (status, directory) = app.call(Method::GET, uri, Some(&client), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(directory.as_array().unwrap().len(), 1, "no match for {}", uri);
    }

    let (_, directory) = app
        .call(Method::GET, "/api/professionals?specialty=%C3%A9lec", Some(&client), None)
        .await;
    assert!(directory.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_guard_checks_do_not_use_sign_in_budget() {
    let app = test_app_with(|config| {
        config.auth.require_email_confirmation = false;
        config.rate_limit.enabled = true;
        config.rate_limit.auth_requests_per_window = 2;
        config.rate_limit.window_seconds = 3600;
    })
    .await;

    for _ in 0..5 {
        let (status, decision) = app.call(Method::GET, "/api/auth/guard", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decision["state"], "unauthenticated");
    }

    let sign_in = |peer: &str| {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/sign-in")
            .header("Content-Type", "application/json")
            .body(Body::from(
                json!({ "email": "nobody@example.com", "password": PASSWORD }).to_string(),
            ))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        request
    };

    for _ in 0..2 {
        let (status, _) = app.send(sign_in("192.0.2.7:50000")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = app.send(sign_in("192.0.2.7:50001")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // A different peer keeps its own budget
    let (status, _) = app.send(sign_in("198.51.100.20:40000")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
