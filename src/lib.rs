//! Gondola - OpenAI-compatible inference gateway
//!
//! Re-exposes a third-party inference API behind an OpenAI-compatible surface,
//! routing every outbound call through a rotating pool of edge endpoints.
//!
//! ## Features
//!
//! - LRU-rotated proxy endpoint pool with atomic whole-set refresh
//! - Retry with reset-hint waits on rate limiting and exponential backoff on
//!   transport failure
//! - Streaming translation of the upstream newline-delimited event stream
//!   into OpenAI chat completion chunks
//! - Image generation with in-memory/on-disk storage and expiry sweeping

pub mod api;
pub mod config;
pub mod error;
pub mod openai;
pub mod outbound;
pub mod services;
pub mod storage;
pub mod upstream;

pub use config::Config;
pub use error::{GatewayError, Result};
