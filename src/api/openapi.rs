//! OpenAPI document served at `/openapi.json`.

use utoipa::OpenApi;

use crate::api::handlers::{auth, health};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "enskribi",
        description = "User registration and email verification service"
    ),
    paths(
        auth::register::register,
        auth::verification::verify,
        health::health,
    ),
    components(schemas(
        auth::types::RegisterRequest,
        auth::types::RegisterResponse,
        health::Health,
    )),
    tags(
        (name = "auth", description = "Registration and email verification"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;
