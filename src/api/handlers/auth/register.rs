//! `POST /auth/register` handler.

use axum::{
    Extension, Json,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, instrument};

use super::state::AuthState;
use super::types::{RegisterRequest, RegisterResponse};
use super::utils::extract_client_ip;
use super::workflow::RegisterError;

/// Register a new account.
///
/// The created account stays unverified until the emailed link is used.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification email queued", body = RegisterResponse),
        (status = 400, description = "Missing payload, invalid email, or password policy violation"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many registration attempts"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    Extension(state): Extension<Arc<AuthState>>,
    headers: HeaderMap,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing payload"})),
        )
            .into_response();
    };

    let client_ip = extract_client_ip(&headers);
    let result = state
        .registration()
        .register(
            &request.email,
            &request.password,
            request.name.as_deref(),
            client_ip.as_deref(),
        )
        .await;

    match result {
        Ok(registered) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                id: registered.id,
                requires_verification: registered.requires_verification,
            }),
        )
            .into_response(),
        Err(RegisterError::RateLimited {
            retry_after_seconds,
        }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too many registration attempts. Please try again later.",
                "retry_after_seconds": retry_after_seconds,
            })),
        )
            .into_response(),
        Err(RegisterError::PolicyViolation { violations }) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": violations.join("; ")})),
        )
            .into_response(),
        Err(RegisterError::InvalidEmail) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid email address"})),
        )
            .into_response(),
        Err(RegisterError::Conflict) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "User already exists for the provided email."})),
        )
            .into_response(),
        Err(RegisterError::Infrastructure(err)) => {
            error!("registration failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::NoopDispatcher;
    use crate::api::handlers::auth::policy::PasswordPolicy;
    use crate::api::handlers::auth::rate_limit::NoopRateLimiter;
    use crate::api::handlers::auth::state::AppConfig;
    use crate::api::handlers::auth::store::MemoryCredentialStore;
    use crate::api::handlers::auth::tokens::TokenManager;
    use crate::api::handlers::auth::workflow::RegistrationService;
    use axum::body::to_bytes;

    fn test_state() -> Arc<AuthState> {
        let store = Arc::new(MemoryCredentialStore::new());
        let tokens = TokenManager::new(store.clone(), 86_400);
        let registration = RegistrationService::new(
            store,
            tokens.clone(),
            Arc::new(NoopRateLimiter),
            Arc::new(NoopDispatcher),
            PasswordPolicy::default(),
            "http://localhost:8080".to_string(),
        );
        Arc::new(AuthState::new(
            AppConfig::new("http://localhost:8080".to_string()),
            registration,
            tokens,
        ))
    }

    #[tokio::test]
    async fn missing_payload_is_bad_request() {
        let response = register(Extension(test_state()), HeaderMap::new(), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Missing payload");
    }

    #[tokio::test]
    async fn valid_payload_is_created() {
        let response = register(
            Extension(test_state()),
            HeaderMap::new(),
            Some(Json(RegisterRequest {
                email: "alice@example.com".to_string(),
                password: "Str0ng-pass".to_string(),
                name: Some("Alice".to_string()),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["requires_verification"], true);
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let state = test_state();
        let request = || {
            Some(Json(RegisterRequest {
                email: "bob@example.com".to_string(),
                password: "Str0ng-pass".to_string(),
                name: None,
            }))
        };

        let first = register(Extension(state.clone()), HeaderMap::new(), request())
            .await
            .into_response();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = register(Extension(state), HeaderMap::new(), request())
            .await
            .into_response();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn weak_password_is_bad_request() {
        let response = register(
            Extension(test_state()),
            HeaderMap::new(),
            Some(Json(RegisterRequest {
                email: "carol@example.com".to_string(),
                password: "weak".to_string(),
                name: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(
            json["error"]
                .as_str()
                .unwrap()
                .contains("at least 8 characters")
        );
    }
}
