//! Credential store: users and their verification tokens.
//!
//! The store is a collaborator behind [`CredentialStore`], so the token and
//! registration logic never touch SQL directly. [`PgCredentialStore`] is the
//! production backend; [`MemoryCredentialStore`] backs tests and
//! single-process development.
//!
//! Every method is individually atomic. The two compound operations the
//! verification flow needs (`replace_tokens_for_user`,
//! `mark_verified_and_delete_tokens`) are trait methods so each backend can
//! apply them as one unit: a transaction in `PostgreSQL`, one mutex-guarded
//! mutation in memory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{is_unique_violation, normalize_email};

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A user is verified iff the verification timestamp is set.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
}

#[derive(Clone, Debug)]
pub struct TokenRecord {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome when attempting to create a new user record.
///
/// The unique constraint on email is the final authority against the
/// check-then-insert race, so duplicates surface as a distinct outcome
/// instead of an opaque database error.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    DuplicateEmail,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome>;
    async fn find_token(&self, token_hash: &[u8]) -> Result<Option<TokenRecord>>;
    /// Delete every token for the record's user, then store the new one, as
    /// one atomic unit.
    async fn replace_tokens_for_user(&self, record: TokenRecord) -> Result<()>;
    async fn delete_token(&self, token_hash: &[u8]) -> Result<()>;
    async fn delete_tokens_for_user(&self, user_id: Uuid) -> Result<()>;
    /// Set the verification timestamp (only if not already set) and delete
    /// every token for the user, as one atomic unit. Returns whether this
    /// call set the timestamp; among concurrent callers exactly one
    /// observes `true`.
    async fn mark_verified_and_delete_tokens(
        &self,
        user_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// `PostgreSQL` backend.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_hash: row.get("password_hash"),
        email_verified_at: row.get("email_verified_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const USER_COLUMNS: &str =
    "id, email, display_name, password_hash, email_verified_at, created_at, updated_at";

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome> {
        let query = format!(
            r"
            INSERT INTO users (email, display_name, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
        "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::DuplicateEmail),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn find_token(&self, token_hash: &[u8]) -> Result<Option<TokenRecord>> {
        let query = r"
            SELECT token_hash, user_id, expires_at, created_at
            FROM email_verification_tokens
            WHERE token_hash = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup verification token")?;

        Ok(row.map(|row| TokenRecord {
            token_hash: row.get("token_hash"),
            user_id: row.get("user_id"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        }))
    }

    async fn replace_tokens_for_user(&self, record: TokenRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin token replace transaction")?;

        let query = "DELETE FROM email_verification_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete superseded tokens")?;

        let query = r"
            INSERT INTO email_verification_tokens (token_hash, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(&record.token_hash)
            .bind(record.user_id)
            .bind(record.expires_at)
            .bind(record.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert verification token")?;

        tx.commit().await.context("commit token replace transaction")
    }

    async fn delete_token(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM email_verification_tokens WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete verification token")?;
        Ok(())
    }

    async fn delete_tokens_for_user(&self, user_id: Uuid) -> Result<()> {
        let query = "DELETE FROM email_verification_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete tokens for user")?;
        Ok(())
    }

    async fn mark_verified_and_delete_tokens(
        &self,
        user_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<bool> {
        // Both mutations commit together; a user marked verified with tokens
        // left behind (or the reverse) would violate the lifecycle invariant.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin verify transaction")?;

        // The guarded WHERE makes the first committer win; a concurrent
        // verify that lost the race touches zero rows and keeps the first
        // timestamp.
        let query = r"
            UPDATE users
            SET email_verified_at = $2,
                updated_at = NOW()
            WHERE id = $1
              AND email_verified_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let updated = sqlx::query(query)
            .bind(user_id)
            .bind(verified_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to mark user verified")?;

        let query = "DELETE FROM email_verification_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete consumed tokens")?;

        tx.commit().await.context("commit verify transaction")?;
        Ok(updated.rows_affected() > 0)
    }
}

#[derive(Default)]
struct MemoryInner {
    users: HashMap<Uuid, User>,
    tokens: HashMap<Vec<u8>, TokenRecord>,
}

/// In-memory backend for tests and single-process development.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let wanted = normalize_email(email);
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|user| normalize_email(&user.email) == wanted)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<CreateUserOutcome> {
        let wanted = normalize_email(&user.email);
        let mut inner = self.inner.lock().await;
        let duplicate = inner
            .users
            .values()
            .any(|existing| normalize_email(&existing.email) == wanted);
        if duplicate {
            return Ok(CreateUserOutcome::DuplicateEmail);
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
            email_verified_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(created.id, created.clone());
        Ok(CreateUserOutcome::Created(created))
    }

    async fn find_token(&self, token_hash: &[u8]) -> Result<Option<TokenRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.tokens.get(token_hash).cloned())
    }

    async fn replace_tokens_for_user(&self, record: TokenRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.retain(|_, token| token.user_id != record.user_id);
        inner.tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn delete_token(&self, token_hash: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.remove(token_hash);
        Ok(())
    }

    async fn delete_tokens_for_user(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.retain(|_, token| token.user_id != user_id);
        Ok(())
    }

    async fn mark_verified_and_delete_tokens(
        &self,
        user_id: Uuid,
        verified_at: DateTime<Utc>,
    ) -> Result<bool> {
        // Check-and-set under the single lock hold so racing callers cannot
        // both see an unset timestamp.
        let mut inner = self.inner.lock().await;
        let newly_set = match inner.users.get_mut(&user_id) {
            Some(user) if user.email_verified_at.is_none() => {
                user.email_verified_at = Some(verified_at);
                user.updated_at = verified_at;
                true
            }
            _ => false,
        };
        inner.tokens.retain(|_, token| token.user_id != user_id);
        Ok(newly_set)
    }
}
