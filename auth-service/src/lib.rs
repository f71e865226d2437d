pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::AuthConfig;
use crate::services::{
    AttemptCounter, AuthService, AuthStore, EmailProvider, GeoIpProvider, IpBlockRegistry,
    JwtService, RateLimitService, RiskAssessor, SecurityAlertPublisher, SessionManager,
    SmsProvider, TokenService, TwoFactorAuthenticator,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::login,
        handlers::auth::login_two_factor,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::introspect,
        handlers::password::request_password_reset,
        handlers::password::confirm_password_reset,
        handlers::password::change_password,
        handlers::two_factor::setup,
        handlers::two_factor::verify_setup,
        handlers::two_factor::disable,
        handlers::two_factor::send_otp,
        handlers::sessions::list_sessions,
        handlers::sessions::revoke_session,
        handlers::sessions::revoke_other_sessions,
        handlers::alerts::list_alerts,
        handlers::alerts::mark_alert_read,
        handlers::user::get_me,
        handlers::admin::list_blocked_ips,
        handlers::admin::block_ip,
        handlers::admin::unblock_ip,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::DeviceInfo,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::TwoFactorLoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutScope,
            dtos::auth::LogoutRequest,
            dtos::auth::IntrospectRequest,
            dtos::auth::IntrospectResponse,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::auth::VerifyTwoFactorSetupRequest,
            dtos::auth::RecoveryCodesResponse,
            dtos::auth::SendOtpRequest,
            dtos::admin::BlockIpRequest,
            dtos::admin::BlockedIpView,
            handlers::alerts::AlertView,
            models::SanitizedUser,
            models::SessionInfo,
            services::TokenResponse,
            services::TotpSetup,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, token rotation and logout"),
        (name = "Two-Factor", description = "TOTP, OTP and recovery codes"),
        (name = "Sessions", description = "Session visibility and revocation"),
        (name = "Alerts", description = "Account security alerts"),
        (name = "Account", description = "Profile and password management"),
        (name = "Admin", description = "IP block administration"),
        (name = "Observability", description = "Service health")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "admin_api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-admin-api-key"))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub store: Arc<dyn AuthStore>,
    pub counter: Arc<dyn AttemptCounter>,
    pub jwt: JwtService,
    pub auth: AuthService,
    pub tokens: TokenService,
    pub sessions: SessionManager,
    pub two_factor: TwoFactorAuthenticator,
    pub ip_blocks: IpBlockRegistry,
    pub alerts: SecurityAlertPublisher,
    pub ip_rate_limiter: IpRateLimiter,
}

/// Wire the component graph over pluggable store/counter/provider
/// boundaries. Shared by `main` (Postgres, Redis, SMTP, HTTP geo) and the
/// integration tests (in-memory doubles).
pub fn build_state(
    config: AuthConfig,
    store: Arc<dyn AuthStore>,
    counter: Arc<dyn AttemptCounter>,
    email: Arc<dyn EmailProvider>,
    sms: Arc<dyn SmsProvider>,
    geo: Arc<dyn GeoIpProvider>,
) -> Result<AppState, AppError> {
    let jwt = JwtService::new(&config.jwt).map_err(AppError::InternalError)?;
    let limiter = RateLimitService::new(counter.clone(), config.rate_limit.rules());
    let alerts = SecurityAlertPublisher::new(store.clone(), Some(email.clone()));
    let sessions = SessionManager::new(store.clone(), config.session.policy());
    let tokens = TokenService::new(
        store.clone(),
        jwt.clone(),
        sessions.clone(),
        alerts.clone(),
        config.refresh_token_expiry_days,
    );
    let ip_blocks = IpBlockRegistry::new(
        store.clone(),
        limiter.clone(),
        alerts.clone(),
        config.auto_block.policy(),
    );
    let risk = RiskAssessor::new(store.clone(), geo, limiter.clone());
    let two_factor = TwoFactorAuthenticator::new(
        store.clone(),
        email,
        sms,
        limiter.clone(),
        alerts.clone(),
        config.two_factor.config(),
    );
    let auth = AuthService::new(
        store.clone(),
        jwt.clone(),
        tokens.clone(),
        limiter,
        ip_blocks.clone(),
        risk,
        two_factor.clone(),
        alerts.clone(),
    );
    let ip_rate_limiter = service_core::middleware::rate_limit::create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    Ok(AppState {
        config,
        store,
        counter,
        jwt,
        auth,
        tokens,
        sessions,
        two_factor,
        ip_blocks,
        alerts,
        ip_rate_limiter,
    })
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // IP block management sits behind the admin key
    let admin_routes = Router::new()
        .route(
            "/auth/admin/ip-blocks",
            get(handlers::admin::list_blocked_ips).post(handlers::admin::block_ip),
        )
        .route(
            "/auth/admin/ip-blocks/:ip",
            delete(handlers::admin::unblock_ip),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    // Everything that needs a valid access token
    let authed_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/sessions", get(handlers::sessions::list_sessions))
        .route(
            "/auth/sessions/:session_id",
            delete(handlers::sessions::revoke_session),
        )
        .route(
            "/auth/sessions/revoke-others",
            post(handlers::sessions::revoke_other_sessions),
        )
        .route("/auth/2fa/setup", post(handlers::two_factor::setup))
        .route("/auth/2fa/verify", post(handlers::two_factor::verify_setup))
        .route("/auth/2fa/disable", post(handlers::two_factor::disable))
        .route("/auth/alerts", get(handlers::alerts::list_alerts))
        .route(
            "/auth/alerts/:alert_id/read",
            post(handlers::alerts::mark_alert_read),
        )
        .route("/users/me", get(handlers::user::get_me))
        .route(
            "/users/me/password",
            post(handlers::password::change_password),
        )
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let ip_limiter = state.ip_rate_limiter.clone();

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/login/2fa", post(handlers::auth::login_two_factor))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/introspect", post(handlers::auth::introspect))
        .route("/auth/otp/send", post(handlers::two_factor::send_otp))
        .route(
            "/auth/password-reset/request",
            post(handlers::password::request_password_reset),
        )
        .route(
            "/auth/password-reset/confirm",
            post(handlers::password::confirm_password_reset),
        )
        .merge(authed_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        // Coarse per-IP request ceiling in front of the fine-grained gates
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .map(|o| {
                            o.parse::<axum::http::HeaderValue>().unwrap_or_else(|e| {
                                tracing::error!(
                                    "Invalid CORS origin '{}': {}. Using fallback.",
                                    o,
                                    e
                                );
                                axum::http::HeaderValue::from_static("*")
                            })
                        })
                        .collect::<Vec<axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::HeaderName::from_static("x-admin-api-key"),
                    axum::http::header::HeaderName::from_static("x-request-id"),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "A dependency is down")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        e
    })?;

    state.counter.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Counter store health check failed");
        e
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up",
            "counters": "up"
        }
    })))
}
