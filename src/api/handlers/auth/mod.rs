//! Registration and email-verification domain.
//!
//! The pieces compose behind two HTTP endpoints:
//!
//! - [`register::register`] handles `POST /auth/register` via
//!   [`workflow::RegistrationService`].
//! - [`verification::verify`] handles `GET /auth/verify` via
//!   [`tokens::TokenManager`].
//!
//! Storage, rate limiting, and email dispatch sit behind traits so the
//! workflow can be tested against in-memory backends.

pub mod policy;
pub mod rate_limit;
pub mod register;
pub mod state;
pub mod store;
pub mod tokens;
pub mod types;
pub mod utils;
pub mod verification;
pub mod workflow;

pub use policy::PasswordPolicy;
pub use rate_limit::{MemoryRateLimiter, NoopRateLimiter, PgRateLimiter, RateLimiter};
pub use state::{AppConfig, AuthState};
pub use store::{CredentialStore, MemoryCredentialStore, PgCredentialStore};
pub use tokens::{TokenManager, VerificationOutcome};
pub use workflow::{RegisterError, RegistrationService};
