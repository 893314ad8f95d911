//! `GET /auth/verify` handler.
//!
//! The link in the verification email lands here in a browser, so every
//! outcome renders a small HTML page instead of JSON. A configured redirect
//! URL replaces the success page. Unknown tokens get a deliberately vague
//! message so the endpoint cannot be used to probe which emails exist.

use axum::{
    Extension,
    extract::Query,
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{error, instrument};

use super::state::AuthState;
use super::tokens::VerificationOutcome;
use super::types::VerifyParams;

/// Verify an email address with an emailed token.
#[utoipa::path(
    get,
    path = "/auth/verify",
    params(VerifyParams),
    responses(
        (status = 200, description = "Email verified, or already verified"),
        (status = 303, description = "Email verified, redirecting to the configured page"),
        (status = 400, description = "Missing token"),
        (status = 404, description = "Unknown token"),
        (status = 410, description = "Expired token"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn verify(
    Extension(state): Extension<Arc<AuthState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let token = params.token.unwrap_or_default();
    if token.trim().is_empty() {
        return html_response(
            StatusCode::BAD_REQUEST,
            "Invalid verification link",
            "Invalid verification link. The token is missing.",
        );
    }

    match state.tokens().verify(&token).await {
        Ok(VerificationOutcome::Success) => {
            if let Some(url) = state.config().verify_redirect_url() {
                return Redirect::to(url).into_response();
            }
            html_response(
                StatusCode::OK,
                "Email verified",
                "Your email address has been verified. You can now sign in.",
            )
        }
        Ok(VerificationOutcome::AlreadyVerified) => html_response(
            StatusCode::OK,
            "Email already verified",
            "This email address was already verified. You can sign in.",
        ),
        Ok(VerificationOutcome::Expired) => html_response(
            StatusCode::GONE,
            "Verification link expired",
            "This verification link has expired. Please register again or request a new link.",
        ),
        Ok(VerificationOutcome::NotFound) => html_response(
            StatusCode::NOT_FOUND,
            "Verification failed",
            "We could not verify this link. It may have been used already or never existed.",
        ),
        Err(err) => {
            error!("verification failed: {err}");
            html_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed",
                "Something went wrong while verifying your email. Please try again later.",
            )
        }
    }
}

fn html_response(status: StatusCode, title: &str, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html>\
         <html lang=\"en\">\
         <head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body>\
         </html>"
    );
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::NoopDispatcher;
    use crate::api::handlers::auth::policy::PasswordPolicy;
    use crate::api::handlers::auth::rate_limit::NoopRateLimiter;
    use crate::api::handlers::auth::state::AppConfig;
    use crate::api::handlers::auth::store::{
        CreateUserOutcome, CredentialStore, MemoryCredentialStore, NewUser, User,
    };
    use crate::api::handlers::auth::tokens::TokenManager;
    use crate::api::handlers::auth::workflow::RegistrationService;
    use axum::body::to_bytes;

    async fn state_with_user(redirect: Option<String>) -> (Arc<AuthState>, User, String) {
        let store = Arc::new(MemoryCredentialStore::new());
        let outcome = store
            .create_user(NewUser {
                email: "alice@example.com".to_string(),
                display_name: None,
                password_hash: "$argon2id$test".to_string(),
            })
            .await
            .unwrap();
        let user = match outcome {
            CreateUserOutcome::Created(user) => user,
            CreateUserOutcome::DuplicateEmail => panic!("unexpected duplicate"),
        };

        let tokens = TokenManager::new(store.clone(), 86_400);
        let issued = tokens.issue(user.id).await.unwrap();
        let registration = RegistrationService::new(
            store,
            tokens.clone(),
            Arc::new(NoopRateLimiter),
            Arc::new(NoopDispatcher),
            PasswordPolicy::default(),
            "http://localhost:8080".to_string(),
        );
        let config = AppConfig::new("http://localhost:8080".to_string())
            .with_verify_redirect_url(redirect);
        (
            Arc::new(AuthState::new(config, registration, tokens)),
            user,
            issued.token,
        )
    }

    #[tokio::test]
    async fn missing_token_is_bad_request() {
        let (state, _, _) = state_with_user(None).await;
        let response = verify(Extension(state), Query(VerifyParams { token: None })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_token_renders_success_page() {
        let (state, _, token) = state_with_user(None).await;
        let response = verify(
            Extension(state),
            Query(VerifyParams { token: Some(token) }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("has been verified"));
    }

    #[tokio::test]
    async fn valid_token_redirects_when_configured() {
        let (state, _, token) =
            state_with_user(Some("https://app.example.com/welcome".to_string())).await;
        let response = verify(
            Extension(state),
            Query(VerifyParams { token: Some(token) }),
        )
        .await;
        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://app.example.com/welcome"
        );
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let (state, _, _) = state_with_user(None).await;
        let response = verify(
            Extension(state),
            Query(VerifyParams {
                token: Some("bogus".to_string()),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reused_token_is_already_verified_then_not_found() {
        let (state, user, token) = state_with_user(None).await;

        let first = verify(
            Extension(state.clone()),
            Query(VerifyParams {
                token: Some(token.clone()),
            }),
        )
        .await;
        assert_eq!(first.status(), StatusCode::OK);

        // Token was consumed by the success path.
        let second = verify(
            Extension(state.clone()),
            Query(VerifyParams { token: Some(token) }),
        )
        .await;
        assert_eq!(second.status(), StatusCode::NOT_FOUND);

        // A fresh token for a verified user reports already verified.
        let reissued = state.tokens().issue(user.id).await.unwrap();
        let third = verify(
            Extension(state),
            Query(VerifyParams {
                token: Some(reissued.token),
            }),
        )
        .await;
        assert_eq!(third.status(), StatusCode::OK);
        let body = to_bytes(third.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("already verified"));
    }
}
