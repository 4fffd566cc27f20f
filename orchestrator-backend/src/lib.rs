//! Library crate exposing modules for testing
//!
//! This exposes internal modules for integration tests

pub mod config;
pub mod control;
pub mod scenario;
pub mod utils;
