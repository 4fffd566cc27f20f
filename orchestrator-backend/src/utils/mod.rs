//! Utilities module for the orchestrator backend.

pub mod error_handling;

pub use error_handling::{RetryConfig, retry_async};
