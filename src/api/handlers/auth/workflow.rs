//! Registration workflow: rate limit, validate, persist, and notify.
//!
//! The steps run in a fixed order so every rejection is cheap and observable:
//!
//! 1. consume one rate-limit point for the client key
//! 2. check the password against the policy
//! 3. validate and normalize the email
//! 4. reject duplicates, then create the user with a hashed password
//! 5. issue a verification token and enqueue the verification email
//!
//! Database uniqueness is the conflict authority: the pre-check in step 4 only
//! gives a friendlier fast path, and a concurrent insert still surfaces as
//! [`RegisterError::Conflict`] through the unique constraint. A failed email
//! enqueue is logged and tolerated; the account exists either way and a new
//! token can always be issued later.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::email::{EmailDispatcher, EmailJob};

use super::policy::PasswordPolicy;
use super::rate_limit::{RateLimitError, RateLimiter};
use super::store::{CreateUserOutcome, CredentialStore, NewUser};
use super::tokens::TokenManager;
use super::utils::{build_verify_url, hash_password, normalize_email, valid_email};

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("too many registration attempts, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("password policy violations: {}", violations.join("; "))]
    PolicyViolation { violations: Vec<String> },
    #[error("invalid email address")]
    InvalidEmail,
    #[error("user already exists for the provided email")]
    Conflict,
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

/// A completed registration.
#[derive(Clone, Debug)]
pub struct Registered {
    pub id: Uuid,
    pub requires_verification: bool,
}

#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenManager,
    limiter: Arc<dyn RateLimiter>,
    dispatcher: Arc<dyn EmailDispatcher>,
    policy: PasswordPolicy,
    base_url: String,
}

impl RegistrationService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: TokenManager,
        limiter: Arc<dyn RateLimiter>,
        dispatcher: Arc<dyn EmailDispatcher>,
        policy: PasswordPolicy,
        base_url: String,
    ) -> Self {
        Self {
            store,
            tokens,
            limiter,
            dispatcher,
            policy,
            base_url,
        }
    }

    /// Register a new account and send it a verification email.
    ///
    /// The rate-limit key is the client IP when known, otherwise the
    /// submitted email, so anonymous clients cannot dodge the budget.
    ///
    /// # Errors
    /// Returns [`RegisterError`] for each rejection class; infrastructure
    /// failures surface as [`RegisterError::Infrastructure`].
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<Registered, RegisterError> {
        let rate_key = client_ip.unwrap_or(email);
        match self.limiter.consume(rate_key).await {
            Ok(()) => {}
            Err(RateLimitError::Exceeded {
                retry_after_seconds,
            }) => {
                warn!(retry_after_seconds, "registration rate limit exceeded");
                return Err(RegisterError::RateLimited {
                    retry_after_seconds,
                });
            }
            Err(RateLimitError::Backend(err)) => {
                return Err(RegisterError::Infrastructure(err));
            }
        }

        let violations = self.policy.violations(password);
        if !violations.is_empty() {
            return Err(RegisterError::PolicyViolation { violations });
        }

        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(RegisterError::InvalidEmail);
        }

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(RegisterError::Conflict);
        }

        let password_hash = hash_password(password)?;
        let outcome = self
            .store
            .create_user(NewUser {
                email: email.clone(),
                display_name: name.map(str::to_string),
                password_hash,
            })
            .await?;
        let user = match outcome {
            CreateUserOutcome::Created(user) => user,
            CreateUserOutcome::DuplicateEmail => return Err(RegisterError::Conflict),
        };

        let issued = self.tokens.issue(user.id).await?;
        let job = verification_email(
            &email,
            name,
            &build_verify_url(&self.base_url, &issued.token),
            issued.expires_at,
        );
        if let Err(err) = self.dispatcher.enqueue(job).await {
            // The account exists; a fresh token can be issued later.
            warn!(user_id = %user.id, "failed to enqueue verification email: {err}");
        }

        info!(user_id = %user.id, "user registered, verification pending");
        Ok(Registered {
            id: user.id,
            requires_verification: true,
        })
    }
}

fn verification_email(
    to_email: &str,
    name: Option<&str>,
    verify_url: &str,
    expires_at: DateTime<Utc>,
) -> EmailJob {
    let greeting = name.filter(|n| !n.trim().is_empty()).unwrap_or("there");
    EmailJob {
        to_email: to_email.to_string(),
        subject: "Verify your email address".to_string(),
        body_html: format!(
            "<p>Hello {greeting},</p>\
             <p>Please verify your email address to activate your account.</p>\
             <p><a href=\"{verify_url}\">Verify email address</a></p>\
             <p>This link expires on {}.</p>",
            expires_at.to_rfc3339()
        ),
    }
}
