//! HTTP middleware

mod auth;
mod cors;

pub use auth::require_api_key;
pub use cors::cors_layer;
