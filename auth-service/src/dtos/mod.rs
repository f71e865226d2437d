pub mod admin;
pub mod auth;

use serde::Serialize;
use utoipa::ToSchema;

/// Error body shape shared by all endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "Authentication failed")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
