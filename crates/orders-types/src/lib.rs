//! Common types module for the orders service.
//!
//! This module defines the core data types shared by every crate in the
//! workspace: the `Order` entity and its schema, API bodies and errors,
//! storage namespaces and configuration validation helpers.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// The Order entity and its record schema.
pub mod order;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Redacted wrapper for credentials.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Record and configuration validation.
pub mod validation;

// Re-export all types for convenient access
pub use api::*;
pub use order::*;
pub use registry::*;
pub use secret_string::SecretString;
pub use storage::*;
pub use validation::*;
