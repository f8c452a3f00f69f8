//! Fauna Core Library
//!
//! Shared building blocks for the Fauna REST client:
//! - Connection configuration and credential resolution
//! - Resource payload and response envelope types
//! - Server error body decoding

pub mod config;
pub mod errors;
pub mod models;

// Re-export commonly used types
pub use config::{Config, Credentials, Diagnostics};
pub use errors::{ErrorBody, ErrorData, Failure, PathSegment};
pub use models::*;
