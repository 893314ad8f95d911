//! Verification token lifecycle: issue, verify, expire, invalidate.
//!
//! Tokens are single-use. Issuing replaces every prior token for the user,
//! verification consumes the token whether it succeeds or turns out to be
//! expired, and a stale token can never be replayed into a second success.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::store::{CredentialStore, TokenRecord};
use super::utils::{generate_verification_token, hash_verification_token};

/// Result of a verification attempt.
///
/// Cleanup deletions along the way (expired or orphaned tokens) are not
/// failures; they just guarantee the same token cannot be tried again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    Expired,
    NotFound,
    AlreadyVerified,
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    /// Raw token for the emailed link; only a hash is stored.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    ttl_seconds: i64,
}

impl TokenManager {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, ttl_seconds: i64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Issue a fresh token for `user_id`, invalidating all previous ones.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    pub async fn issue(&self, user_id: Uuid) -> Result<IssuedToken> {
        let token = generate_verification_token()?;
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.ttl_seconds);

        self.store
            .replace_tokens_for_user(TokenRecord {
                token_hash: hash_verification_token(&token),
                user_id,
                expires_at,
                created_at: now,
            })
            .await?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Consume `token` and report the outcome.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable; domain outcomes are
    /// always `Ok`.
    pub async fn verify(&self, token: &str) -> Result<VerificationOutcome> {
        let token_hash = hash_verification_token(token);

        let Some(record) = self.store.find_token(&token_hash).await? else {
            return Ok(VerificationOutcome::NotFound);
        };

        if record.expires_at < Utc::now() {
            self.store.delete_token(&token_hash).await?;
            return Ok(VerificationOutcome::Expired);
        }

        let Some(user) = self.store.find_user_by_id(record.user_id).await? else {
            // Orphaned tokens: the owning user is gone.
            self.store.delete_tokens_for_user(record.user_id).await?;
            return Ok(VerificationOutcome::NotFound);
        };

        if user.is_verified() {
            // Idempotent at the user level: tolerated, not an error.
            self.store.delete_tokens_for_user(user.id).await?;
            return Ok(VerificationOutcome::AlreadyVerified);
        }

        // The store reports whether this call won the commit, so two
        // concurrent verifies of the same token cannot both observe Success.
        if self
            .store
            .mark_verified_and_delete_tokens(user.id, Utc::now())
            .await?
        {
            Ok(VerificationOutcome::Success)
        } else {
            Ok(VerificationOutcome::AlreadyVerified)
        }
    }
}
