//! Runtime configuration and shared state for the registration endpoints.

use super::policy::PasswordPolicy;
use super::tokens::TokenManager;
use super::workflow::RegistrationService;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 86_400;
const DEFAULT_RATE_LIMIT_POINTS: u32 = 5;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 600;

/// Tunables for the registration and verification flow.
///
/// Built once at startup from CLI arguments and shared read-only through
/// [`AuthState`].
#[derive(Clone, Debug)]
pub struct AppConfig {
    base_url: String,
    verify_redirect_url: Option<String>,
    token_ttl_seconds: i64,
    rate_limit_points: u32,
    rate_limit_window_seconds: u64,
    shared_rate_limit: bool,
    email_outbox_enabled: bool,
    password_policy: PasswordPolicy,
}

impl AppConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            verify_redirect_url: None,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            rate_limit_points: DEFAULT_RATE_LIMIT_POINTS,
            rate_limit_window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            shared_rate_limit: false,
            email_outbox_enabled: true,
            password_policy: PasswordPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_verify_redirect_url(mut self, url: Option<String>) -> Self {
        self.verify_redirect_url = url;
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_rate_limit_points(mut self, points: u32) -> Self {
        self.rate_limit_points = points.max(1);
        self
    }

    #[must_use]
    pub fn with_rate_limit_window_seconds(mut self, seconds: u64) -> Self {
        self.rate_limit_window_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_shared_rate_limit(mut self, shared: bool) -> Self {
        self.shared_rate_limit = shared;
        self
    }

    #[must_use]
    pub fn with_email_outbox_enabled(mut self, enabled: bool) -> Self {
        self.email_outbox_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn verify_redirect_url(&self) -> Option<&str> {
        self.verify_redirect_url.as_deref()
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn rate_limit_points(&self) -> u32 {
        self.rate_limit_points
    }

    #[must_use]
    pub fn rate_limit_window_seconds(&self) -> u64 {
        self.rate_limit_window_seconds
    }

    #[must_use]
    pub fn shared_rate_limit(&self) -> bool {
        self.shared_rate_limit
    }

    #[must_use]
    pub fn email_outbox_enabled(&self) -> bool {
        self.email_outbox_enabled
    }

    #[must_use]
    pub fn password_policy(&self) -> &PasswordPolicy {
        &self.password_policy
    }
}

/// Shared state handed to handlers through an axum `Extension`.
#[derive(Clone)]
pub struct AuthState {
    config: AppConfig,
    registration: RegistrationService,
    tokens: TokenManager,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AppConfig, registration: RegistrationService, tokens: TokenManager) -> Self {
        Self {
            config,
            registration,
            tokens,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn registration(&self) -> &RegistrationService {
        &self.registration
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = AppConfig::new("http://localhost:8080".to_string());
        assert_eq!(config.base_url(), "http://localhost:8080");
        assert!(config.verify_redirect_url().is_none());
        assert_eq!(config.token_ttl_seconds(), 86_400);
        assert_eq!(config.rate_limit_points(), 5);
        assert_eq!(config.rate_limit_window_seconds(), 600);
        assert!(!config.shared_rate_limit());
        assert!(config.email_outbox_enabled());
    }

    #[test]
    fn config_builders_override_and_floor() {
        let config = AppConfig::new("https://id.example.com".to_string())
            .with_verify_redirect_url(Some("https://app.example.com/welcome".to_string()))
            .with_token_ttl_seconds(0)
            .with_rate_limit_points(0)
            .with_rate_limit_window_seconds(0)
            .with_shared_rate_limit(true)
            .with_email_outbox_enabled(false);
        assert_eq!(
            config.verify_redirect_url(),
            Some("https://app.example.com/welcome")
        );
        assert_eq!(config.token_ttl_seconds(), 1);
        assert_eq!(config.rate_limit_points(), 1);
        assert_eq!(config.rate_limit_window_seconds(), 1);
        assert!(config.shared_rate_limit());
        assert!(!config.email_outbox_enabled());
    }
}
