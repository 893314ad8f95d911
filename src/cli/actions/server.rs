use crate::api::{
    self,
    email::EmailWorkerConfig,
    handlers::auth::{AppConfig, PasswordPolicy},
};
use anyhow::Result;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub base_url: String,
    pub verify_redirect_url: Option<String>,
    pub token_ttl_seconds: i64,
    pub rate_limit_points: u32,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_shared: bool,
    pub password_min_length: usize,
    pub password_require_lowercase: bool,
    pub password_require_uppercase: bool,
    pub password_require_number: bool,
    pub password_require_symbol: bool,
    pub email_outbox_enabled: bool,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_max_attempts: u32,
    pub email_backoff_base_seconds: u64,
    pub email_backoff_max_seconds: u64,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let policy = PasswordPolicy::new(args.password_min_length)
        .with_require_lowercase(args.password_require_lowercase)
        .with_require_uppercase(args.password_require_uppercase)
        .with_require_number(args.password_require_number)
        .with_require_symbol(args.password_require_symbol);

    let config = AppConfig::new(args.base_url)
        .with_verify_redirect_url(args.verify_redirect_url)
        .with_token_ttl_seconds(args.token_ttl_seconds)
        .with_rate_limit_points(args.rate_limit_points)
        .with_rate_limit_window_seconds(args.rate_limit_window_seconds)
        .with_shared_rate_limit(args.rate_limit_shared)
        .with_email_outbox_enabled(args.email_outbox_enabled)
        .with_password_policy(policy);

    let worker_config = EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_max_attempts)
        .with_backoff_base_seconds(args.email_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_backoff_max_seconds);

    api::new(args.port, args.dsn, config, worker_config).await
}
