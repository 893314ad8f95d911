//! # Enskribi (Registration & Email Verification)
//!
//! `enskribi` handles user sign-up, email verification, and the abuse
//! protections around them. The flow is: rate limit the caller, validate the
//! password against policy, create the (unverified) user, issue a single-use
//! verification token, and queue the verification email through a
//! transactional outbox.
//!
//! ## Tokens
//!
//! Verification tokens are 32 random bytes, URL-safe base64 encoded. The raw
//! value only appears in the emailed link; the database stores a SHA-256 hash.
//! Issuing a new token for a user invalidates all previous ones, and a token
//! is deleted on first successful (or expired) consumption.
//!
//! ## Rate limiting
//!
//! Registration is limited per client IP (falling back to the submitted
//! email) with a fixed window. A single instance can use the in-process
//! counter; multiple instances share counters through `PostgreSQL` so
//! concurrent consumers never double-budget.
//!
//! ## Email delivery
//!
//! The service never blocks a request on SMTP. Emails are enqueued as
//! `email_outbox` rows and a background worker delivers them with bounded
//! retries and exponential backoff. When the outbox is disabled, enqueueing
//! degrades to a logged no-op so registration still succeeds.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
