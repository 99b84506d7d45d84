//! Axum-based HTTP gateway exposing the identity operations.
//!
//! Routes:
//! - `GET  /health`   : liveness, always public
//! - `POST /register` : create a principal
//! - `POST /login`    : exchange username/password for a bearer token
//! - `GET  /users/me` : principal for the presented token
//! - `GET  /users`    : every principal, token required
//!
//! Every route gets a body size limit (64KB) and a request timeout (30s).

use crate::auth::{AuthError, AuthService, Registration};
use crate::config::{Config, GatewayConfig};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB), prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s), covers a password hash with room to spare
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

pub const SERVICE_NAME: &str = "authkeeper";

const MSG_CONFLICT: &str = "User already exists";
const MSG_BAD_LOGIN: &str = "Incorrect username or password";
const MSG_BAD_TOKEN: &str = "Could not validate credentials";
const MSG_NOT_FOUND: &str = "User not found";
const MSG_INTERNAL: &str = "Internal server error";

/// Concrete return type for handlers (avoids `impl IntoResponse` inference issues).
type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
}

/// Whether binding `host` would expose the gateway beyond the local machine.
pub fn is_public_bind(host: &str) -> bool {
    !matches!(host, "127.0.0.1" | "localhost" | "::1" | "[::1]")
}

/// Bind the configured address. Host names are resolved and bare IPv6
/// literals are accepted.
pub async fn bind_listener(gateway: &GatewayConfig) -> Result<TcpListener> {
    let host = gateway.host.as_str();
    let port = gateway.port;

    if is_public_bind(host) && !gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the gateway would be reachable from other machines.\n\
             Use --host 127.0.0.1 (default) or set [gateway] allow_public_bind = true."
        );
    }

    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))
}

/// Bind and serve until ctrl-c.
pub async fn run_gateway(config: &Config, auth: Arc<AuthService>) -> Result<()> {
    let host = config.gateway.host.as_str();
    let listener = bind_listener(&config.gateway).await?;
    let actual_port = listener.local_addr()?.port();

    let app = router(AppState { auth }, &config.gateway.cors_allowed_origins)?;

    tracing::info!(host, port = actual_port, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Gateway stopped");

    Ok(())
}

/// Build the router with its middleware stack.
pub fn router(state: AppState, cors_allowed_origins: &[String]) -> Result<Router> {
    let cors = cors_layer(cors_allowed_origins)?;

    Ok(Router::new()
        .route("/health", get(handle_health))
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .route("/users/me", get(handle_current_user))
        .route("/users", get(handle_list_users))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        )))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let parsed = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).map_err(|e| anyhow::anyhow!("bad CORS origin {o}: {e}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(parsed)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// Request body for registration.
#[derive(Deserialize)]
struct RegisterBody {
    email: String,
    username: String,
    password: String,
    full_name: String,
}

/// Request body for login.
#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

fn error_response(status: StatusCode, message: &str) -> ApiResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

/// Map a core outcome to a status code. `unauthorized` is the route-specific
/// 401 message.
fn auth_error_response(err: AuthError, unauthorized: &str) -> ApiResponse {
    match err {
        AuthError::Conflict => error_response(StatusCode::CONFLICT, MSG_CONFLICT),
        AuthError::Unauthorized => error_response(StatusCode::UNAUTHORIZED, unauthorized),
        AuthError::NotFound => error_response(StatusCode::NOT_FOUND, MSG_NOT_FOUND),
        AuthError::Internal(e) => {
            tracing::error!("Auth operation failed: {e:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, MSG_INTERNAL)
        }
    }
}

fn json_ok<T: serde::Serialize>(status: StatusCode, value: &T) -> ApiResponse {
    match serde_json::to_value(value) {
        Ok(body) => (status, Json(body)),
        Err(e) => {
            tracing::error!("Failed to serialize response: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, MSG_INTERNAL)
        }
    }
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Minimal `local@domain.tld` shape check.
fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(name, tld)| !name.is_empty() && !tld.is_empty())
}

fn validate_registration(body: &RegisterBody) -> Result<(), &'static str> {
    if !looks_like_email(&body.email) {
        return Err("email must be a valid email address");
    }
    if body.username.trim().is_empty() {
        return Err("username must not be empty");
    }
    if body.password.is_empty() {
        return Err("password must not be empty");
    }
    Ok(())
}

/// Run CPU-heavy auth work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("auth worker failed: {e}")))?
}

/// GET /health, always public (no secrets leaked)
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /register: create a new principal.
async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}"));
        }
    };
    if let Err(msg) = validate_registration(&body) {
        return error_response(StatusCode::BAD_REQUEST, msg);
    }

    let registration = Registration {
        email: body.email,
        username: body.username,
        password: body.password,
        full_name: body.full_name,
    };
    let auth = Arc::clone(&state.auth);
    match blocking(move || auth.register(registration)).await {
        Ok(principal) => json_ok(StatusCode::CREATED, &principal),
        Err(e) => auth_error_response(e, MSG_BAD_TOKEN),
    }
}

/// POST /login: authenticate and get a bearer token.
async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> ApiResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request: {e}"));
        }
    };

    let auth = Arc::clone(&state.auth);
    match blocking(move || auth.login(&body.username, &body.password)).await {
        Ok(token) => json_ok(StatusCode::OK, &token),
        Err(e) => auth_error_response(e, MSG_BAD_LOGIN),
    }
}

/// GET /users/me: the principal the bearer token was issued for.
async fn handle_current_user(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, MSG_BAD_TOKEN);
    };
    let token = token.to_owned();
    let auth = Arc::clone(&state.auth);
    match blocking(move || auth.resolve(&token)).await {
        Ok(principal) => json_ok(StatusCode::OK, &principal),
        Err(e) => auth_error_response(e, MSG_BAD_TOKEN),
    }
}

/// GET /users: every registered principal.
async fn handle_list_users(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, MSG_BAD_TOKEN);
    };
    let token = token.to_owned();
    let auth = Arc::clone(&state.auth);
    match blocking(move || auth.list_all(&token)).await {
        Ok(principals) => json_ok(StatusCode::OK, &principals),
        Err(e) => auth_error_response(e, MSG_BAD_TOKEN),
    }
}
