mod admin;
mod auth;

pub use admin::admin_auth_middleware;
pub use auth::{auth_middleware, AuthUser};
