//! Fixed-window rate limiting for the registration flow.
//!
//! Two interchangeable backends implement [`RateLimiter`]:
//!
//! - [`MemoryRateLimiter`] counts in-process. Counters vanish on restart and
//!   are only valid for a single running instance.
//! - [`PgRateLimiter`] keeps counters in `rate_limit_counters` so every
//!   instance shares the same budget. The increment is a single upsert
//!   statement, so concurrent consumers never double-budget.
//!
//! Keys are lowercased before counting so case variation cannot bypass the
//! limit. A consume that lands over budget fails fast; the increment that was
//! already applied is kept.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::Instrument;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    Exceeded { retry_after_seconds: u64 },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one attempt against `key`, failing once the window budget is spent.
    async fn consume(&self, key: &str) -> Result<(), RateLimitError>;
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Limiter that allows everything. Used in tests.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn consume(&self, _key: &str) -> Result<(), RateLimitError> {
        Ok(())
    }
}

struct Window {
    count: u32,
    expires_at: Instant,
}

/// In-process fixed-window counter.
pub struct MemoryRateLimiter {
    points: u32,
    window: Duration,
    entries: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new(points: u32, window: Duration) -> Self {
        Self {
            points,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn consume_at(&self, key: &str, now: Instant) -> Result<(), RateLimitError> {
        let key = normalize_key(key);
        let mut entries = self.entries.lock().await;
        entries.retain(|_, window| window.expires_at > now);

        let window = entries.entry(key).or_insert_with(|| Window {
            count: 0,
            expires_at: now + self.window,
        });
        window.count = window.count.saturating_add(1);

        if window.count > self.points {
            let retry_after_seconds = window
                .expires_at
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(RateLimitError::Exceeded {
                retry_after_seconds,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn consume(&self, key: &str) -> Result<(), RateLimitError> {
        self.consume_at(key, Instant::now()).await
    }
}

/// Database-backed counter shared across instances.
pub struct PgRateLimiter {
    pool: PgPool,
    points: i64,
    window_seconds: i64,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, points: u32, window: Duration) -> Self {
        Self {
            pool,
            points: i64::from(points),
            window_seconds: i64::try_from(window.as_secs()).unwrap_or(i64::MAX),
        }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn consume(&self, key: &str) -> Result<(), RateLimitError> {
        let key = normalize_key(key);

        // One statement so the read-modify-write cannot race: start a fresh
        // window when the stored one has elapsed, otherwise increment it.
        let query = r"
            INSERT INTO rate_limit_counters (key, points, window_expires_at)
            VALUES ($1, 1, NOW() + ($2 * INTERVAL '1 second'))
            ON CONFLICT (key) DO UPDATE
            SET points = CASE
                    WHEN rate_limit_counters.window_expires_at <= NOW() THEN 1
                    ELSE rate_limit_counters.points + 1
                END,
                window_expires_at = CASE
                    WHEN rate_limit_counters.window_expires_at <= NOW()
                        THEN NOW() + ($2 * INTERVAL '1 second')
                    ELSE rate_limit_counters.window_expires_at
                END
            RETURNING points,
                GREATEST(CEIL(EXTRACT(EPOCH FROM (window_expires_at - NOW()))), 1)::BIGINT
                    AS retry_after
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&key)
            .bind(self.window_seconds)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume rate limit")?;

        let points: i64 = row.get("points");
        if points > self.points {
            let retry_after: i64 = row.get("retry_after");
            return Err(RateLimitError::Exceeded {
                retry_after_seconds: u64::try_from(retry_after).unwrap_or(1),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_then_reject_then_reset() {
        let limiter = MemoryRateLimiter::new(5, Duration::from_secs(600));
        let start = Instant::now();

        for _ in 0..5 {
            assert!(limiter.consume_at("1.2.3.4", start).await.is_ok());
        }

        let denied = limiter.consume_at("1.2.3.4", start).await;
        match denied {
            Err(RateLimitError::Exceeded {
                retry_after_seconds,
            }) => {
                assert!(retry_after_seconds >= 1);
                assert!(retry_after_seconds <= 600);
            }
            other => panic!("expected Exceeded, got {other:?}"),
        }

        // A fresh window after the old one elapses
        let later = start + Duration::from_secs(601);
        assert!(limiter.consume_at("1.2.3.4", later).await.is_ok());
    }

    #[tokio::test]
    async fn keys_are_case_normalized() {
        let limiter = MemoryRateLimiter::new(1, Duration::from_secs(600));
        let start = Instant::now();

        assert!(limiter.consume_at("User@Example.COM", start).await.is_ok());
        assert!(limiter.consume_at("user@example.com", start).await.is_err());
    }

    #[tokio::test]
    async fn independent_keys_do_not_share_budget() {
        let limiter = MemoryRateLimiter::new(1, Duration::from_secs(600));
        let start = Instant::now();

        assert!(limiter.consume_at("1.2.3.4", start).await.is_ok());
        assert!(limiter.consume_at("5.6.7.8", start).await.is_ok());
        assert!(limiter.consume_at("1.2.3.4", start).await.is_err());
    }

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert!(limiter.consume("user@example.com").await.is_ok());
    }
}
