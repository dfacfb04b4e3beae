// Client for the marketplace backend's row API
pub mod client;
pub mod retry;

// Re-export common types
pub use client::{ApiError, BackendClient, Filter, Result};
pub use retry::RetryConfig;
