//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let base_url = matches
        .get_one::<String>("base-url")
        .cloned()
        .context("missing required argument: --base-url")?;

    Ok(Action::Server(Args {
        port,
        dsn,
        base_url,
        verify_redirect_url: matches.get_one::<String>("verify-redirect-url").cloned(),
        token_ttl_seconds: matches
            .get_one::<i64>("token-ttl-seconds")
            .copied()
            .unwrap_or(86400),
        rate_limit_points: matches
            .get_one::<u32>("rate-limit-points")
            .copied()
            .unwrap_or(5),
        rate_limit_window_seconds: matches
            .get_one::<u64>("rate-limit-window-seconds")
            .copied()
            .unwrap_or(600),
        rate_limit_shared: matches.get_flag("rate-limit-shared"),
        password_min_length: matches
            .get_one::<usize>("password-min-length")
            .copied()
            .unwrap_or(8),
        password_require_lowercase: matches
            .get_one::<bool>("password-require-lowercase")
            .copied()
            .unwrap_or(true),
        password_require_uppercase: matches
            .get_one::<bool>("password-require-uppercase")
            .copied()
            .unwrap_or(true),
        password_require_number: matches
            .get_one::<bool>("password-require-number")
            .copied()
            .unwrap_or(true),
        password_require_symbol: matches
            .get_one::<bool>("password-require-symbol")
            .copied()
            .unwrap_or(true),
        email_outbox_enabled: matches
            .get_one::<bool>("email-outbox-enabled")
            .copied()
            .unwrap_or(true),
        email_outbox_poll_seconds: matches
            .get_one::<u64>("email-outbox-poll-seconds")
            .copied()
            .unwrap_or(5),
        email_outbox_batch_size: matches
            .get_one::<usize>("email-outbox-batch-size")
            .copied()
            .unwrap_or(10),
        email_max_attempts: matches
            .get_one::<u32>("email-max-attempts")
            .copied()
            .unwrap_or(3),
        email_backoff_base_seconds: matches
            .get_one::<u64>("email-backoff-base-seconds")
            .copied()
            .unwrap_or(5),
        email_backoff_max_seconds: matches
            .get_one::<u64>("email-backoff-max-seconds")
            .copied()
            .unwrap_or(300),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn dispatch_builds_server_action() {
        temp_env::with_vars(
            [
                (
                    "ENSKRIBI_DSN",
                    Some("postgres://user@localhost:5432/enskribi"),
                ),
                ("ENSKRIBI_BASE_URL", Some("https://accounts.example.com")),
                ("ENSKRIBI_RATE_LIMIT_SHARED", Some("true")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["enskribi"]);
                let action = handler(&matches).expect("handler should succeed");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.base_url, "https://accounts.example.com");
                assert!(args.rate_limit_shared);
                assert_eq!(args.token_ttl_seconds, 86400);
                assert_eq!(args.email_max_attempts, 3);
                assert_eq!(args.email_backoff_base_seconds, 5);
                assert!(args.verify_redirect_url.is_none());
            },
        );
    }
}
