use crate::api::handlers::{
    auth::{
        self, AppConfig, AuthState, MemoryRateLimiter, PgCredentialStore, PgRateLimiter,
        RateLimiter, RegistrationService, TokenManager,
    },
    health,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Json,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa::OpenApi;

pub mod email;
pub mod handlers;
mod openapi;

pub use crate::GIT_COMMIT_HASH;
pub use email::EmailWorkerConfig;

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    config: AppConfig,
    email_config: email::EmailWorkerConfig,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let limiter: Arc<dyn RateLimiter> = if config.shared_rate_limit() {
        Arc::new(PgRateLimiter::new(
            pool.clone(),
            config.rate_limit_points(),
            Duration::from_secs(config.rate_limit_window_seconds()),
        ))
    } else {
        Arc::new(MemoryRateLimiter::new(
            config.rate_limit_points(),
            Duration::from_secs(config.rate_limit_window_seconds()),
        ))
    };

    let dispatcher: Arc<dyn email::EmailDispatcher> = if config.email_outbox_enabled() {
        // Background worker polls email_outbox (DB-backed queue) for pending rows,
        // delivers/logs them, and retries failures with exponential backoff.
        email::spawn_outbox_worker(pool.clone(), Arc::new(email::LogEmailSender), email_config);
        Arc::new(email::OutboxDispatcher::new(pool.clone()))
    } else {
        Arc::new(email::NoopDispatcher)
    };

    let store = Arc::new(PgCredentialStore::new(pool.clone()));
    let tokens = TokenManager::new(store.clone(), config.token_ttl_seconds());
    let registration = RegistrationService::new(
        store,
        tokens.clone(),
        limiter,
        dispatcher,
        config.password_policy().clone(),
        config.base_url().to_string(),
    );
    let auth_state = Arc::new(AuthState::new(config, registration, tokens));

    let frontend_origin = frontend_origin(auth_state.config().base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = axum::Router::new()
        .route("/health", get(health::health))
        .route("/auth/register", post(auth::register::register))
        .route("/auth/verify", get(auth::verification::verify))
        .route(
            "/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Base URL must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path() {
        let origin = frontend_origin("https://id.example.com/app?x=1").unwrap();
        assert_eq!(origin, "https://id.example.com");
    }

    #[test]
    fn frontend_origin_keeps_port() {
        let origin = frontend_origin("http://localhost:8080").unwrap();
        assert_eq!(origin, "http://localhost:8080");
    }

    #[test]
    fn frontend_origin_rejects_garbage() {
        assert!(frontend_origin("not a url").is_err());
    }
}
