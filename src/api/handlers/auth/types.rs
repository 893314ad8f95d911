//! Request and response payloads for the registration endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// Body of `POST /auth/register`.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct RegisterRequest {
    /// Email address to register; matched case-insensitively.
    #[schema(example = "alice@example.com")]
    pub email: String,
    /// Plaintext password, validated against the password policy.
    pub password: String,
    /// Optional display name used in the verification email greeting.
    #[schema(example = "Alice")]
    pub name: Option<String>,
}

/// Body returned by a successful registration.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub id: Uuid,
    /// Always true: the account stays unverified until the emailed link is used.
    pub requires_verification: bool,
}

/// Query parameters of `GET /auth/verify`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct VerifyParams {
    /// Raw verification token from the emailed link.
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_deserializes_without_name() {
        let request: RegisterRequest =
            serde_json::from_str(r#"{"email":"a@b.co","password":"pw"}"#).unwrap();
        assert_eq!(request.email, "a@b.co");
        assert!(request.name.is_none());
    }

    #[test]
    fn register_response_serializes() {
        let response = RegisterResponse {
            id: Uuid::nil(),
            requires_verification: true,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["requires_verification"], true);
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn verify_params_token_is_optional() {
        let params: VerifyParams = serde_json::from_str("{}").unwrap();
        assert!(params.token.is_none());
    }
}
