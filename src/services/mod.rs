//! Background services

pub mod image_cleanup;
pub mod pool_refresh;

pub use image_cleanup::{ImageCleanupConfig, ImageCleanupHandle, ImageCleanupService};
pub use pool_refresh::{PoolRefreshConfig, PoolRefreshHandle, PoolRefreshService};
