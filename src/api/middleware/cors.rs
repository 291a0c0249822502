//! CORS configuration
//!
//! The gateway fronts an API consumed from browsers and local tools alike,
//! so the surface is deliberately open: any origin, no credentials.

use axum::http::header;
use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS layer for the OpenAI-compatible surface
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
