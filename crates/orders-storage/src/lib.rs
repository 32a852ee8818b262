//! Storage module for the orders service.
//!
//! This module provides abstractions for persisting order data, supporting
//! different backend implementations: in-memory, file-based and Redis.

use async_trait::async_trait;
use orders_types::{ConfigSchema, ConfigValidationError, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
	pub mod redis;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs when the backend cannot be reached.
	#[error("Backend unavailable: {0}")]
	Unavailable(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl From<ConfigValidationError> for StorageError {
	fn from(err: ConfigValidationError) -> Self {
		StorageError::Configuration(err.to_string())
	}
}

/// Trait defining the low-level interface for storage backends.
///
/// This trait must be implemented by any storage backend that wants to
/// integrate with the orders service. It provides basic key-value operations
/// plus the atomic counter used for id assignment.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes under the given key, overwriting any previous value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	/// Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists every key starting with `prefix`, in no particular order.
	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Atomically increments the integer stored at `key` and returns the new
	/// value. A missing key counts from 0, so the first call returns 1.
	///
	/// Concurrent callers must never observe the same value.
	async fn increment(&self, key: &str) -> Result<u64, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Verifies the backend is reachable.
	/// Backends without a remote side can return Ok(()).
	async fn health_check(&self) -> Result<(), StorageError> {
		Ok(())
	}
}

/// Type alias for storage factory functions.
///
/// This is the function signature that all storage implementations must provide
/// to create instances of their storage interface.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
///
/// This trait extends the base ImplementationRegistry to specify that
/// storage implementations must provide a StorageFactory.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
/// This is used by the factory registry to automatically register all implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory, redis};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
		(redis::Registry::NAME, redis::Registry::factory()),
	]
}

/// Parses a counter value written by [`StorageInterface::increment`].
pub(crate) fn parse_counter(key: &str, bytes: &[u8]) -> Result<u64, StorageError> {
	std::str::from_utf8(bytes)
		.ok()
		.and_then(|s| s.trim().parse::<u64>().ok())
		.ok_or_else(|| StorageError::Backend(format!("Value at '{}' is not a counter", key)))
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic serialization/deserialization.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Stores a serializable value, creating or overwriting it.
	///
	/// The namespace and id are combined to form a unique key.
	/// The data is serialized to JSON before storage.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Retrieves and deserializes a value from storage.
	///
	/// Returns `StorageError::NotFound` if nothing is stored under the key.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Lists the ids stored under a namespace.
	///
	/// Ids are returned without the namespace prefix and in no particular order.
	pub async fn ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let keys = self.backend.keys(&prefix).await?;
		Ok(keys
			.into_iter()
			.filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
			.collect())
	}

	/// Atomically increments the counter stored at `namespace:id`.
	pub async fn increment(&self, namespace: &str, id: &str) -> Result<u64, StorageError> {
		self.backend.increment(&Self::key(namespace, id)).await
	}

	/// Reads the counter stored at `namespace:id`, or 0 if it was never set.
	pub async fn counter(&self, namespace: &str, id: &str) -> Result<u64, StorageError> {
		let key = Self::key(namespace, id);
		match self.backend.get_bytes(&key).await {
			Ok(bytes) => parse_counter(&key, &bytes),
			Err(StorageError::NotFound) => Ok(0),
			Err(e) => Err(e),
		}
	}

	/// Deletes every key under a namespace, counters included.
	///
	/// Returns the number of keys removed.
	pub async fn clear_namespace(&self, namespace: &str) -> Result<usize, StorageError> {
		let keys = self.backend.keys(&format!("{}:", namespace)).await?;
		for key in &keys {
			self.backend.delete(key).await?;
		}
		Ok(keys.len())
	}

	/// Verifies the backend is reachable.
	pub async fn health_check(&self) -> Result<(), StorageError> {
		self.backend.health_check().await
	}
}
