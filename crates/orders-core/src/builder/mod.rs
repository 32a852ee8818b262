//! Builder for constructing an [`OrderStore`] from configuration.
//!
//! The builder picks the primary storage implementation named in the
//! configuration, creates it through its factory, verifies the backend is
//! reachable and loads any seed orders.

use crate::{OrderStore, OrderStoreError};
use orders_config::Config;
use orders_storage::{StorageError, StorageInterface, StorageService};
use orders_types::Order;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during order store construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
	#[error("Backing store unavailable: {0}")]
	BackingStoreUnavailable(String),
	#[error("Invalid seed order {index}: {source}")]
	Seed {
		index: usize,
		#[source]
		source: OrderStoreError,
	},
}

/// Builder for an [`OrderStore`] with a pluggable storage backend.
pub struct OrderStoreBuilder {
	config: Config,
}

impl OrderStoreBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the store using the factory registered under the primary
	/// storage name.
	///
	/// Fails if the backend cannot be created or does not pass its health
	/// check.
	pub async fn build<SF>(
		self,
		storage_factories: &HashMap<String, SF>,
	) -> Result<OrderStore, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let primary = &self.config.storage.primary;
		let section = self.config.storage.primary_config().ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' has no configuration section",
				primary
			))
		})?;
		let factory = storage_factories.get(primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!("storage implementation '{}'", primary))
		})?;

		for name in self.config.storage.implementations.keys() {
			if name != primary {
				tracing::debug!(component = "storage", implementation = %name, "Configured but not primary, skipping");
			}
		}

		let backend = factory(section).map_err(|e| {
			tracing::error!(
				component = "storage",
				implementation = %primary,
				error = %e,
				"Failed to create storage implementation"
			);
			BuilderError::Config(format!(
				"Failed to create storage implementation '{}': {}",
				primary, e
			))
		})?;
		tracing::info!(component = "storage", implementation = %primary, "Loaded");

		let store = OrderStore::new(Arc::new(StorageService::new(backend)));
		store.health_check().await.map_err(|e| {
			tracing::error!(component = "storage", implementation = %primary, error = %e, "Health check failed");
			BuilderError::BackingStoreUnavailable(e.to_string())
		})?;

		self.seed(&store).await?;
		Ok(store)
	}

	/// Saves every `[[seed]]` record as a new order, unless the store already
	/// holds orders.
	async fn seed(&self, store: &OrderStore) -> Result<(), BuilderError> {
		if self.config.seed.is_empty() {
			return Ok(());
		}
		let existing = store
			.all()
			.await
			.map_err(|e| BuilderError::Config(format!("Failed to read existing orders: {}", e)))?;
		if !existing.is_empty() {
			tracing::info!(existing = existing.len(), "Store already holds orders, skipping seed");
			return Ok(());
		}

		for (index, record) in self.config.seed.iter().enumerate() {
			let mut order = Order::from_record(record).map_err(|e| BuilderError::Seed {
				index,
				source: e.into(),
			})?;
			order.order_id = 0;
			store
				.save(&mut order)
				.await
				.map_err(|source| BuilderError::Seed { index, source })?;
		}
		tracing::info!(count = self.config.seed.len(), "Loaded seed orders");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orders_storage::{get_all_implementations, StorageFactory};
	use tempfile::TempDir;

	fn factories() -> HashMap<String, StorageFactory> {
		get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect()
	}

	fn config(storage: &str, extra: &str) -> Config {
		format!("[service]\nid = \"orders-test\"\n{}\n{}", storage, extra)
			.parse()
			.unwrap()
	}

	const MEMORY: &str = "[storage]\nprimary = \"memory\"\n[storage.implementations.memory]\n";

	#[tokio::test]
	async fn test_build_memory_store() {
		let store = OrderStoreBuilder::new(config(MEMORY, ""))
			.build(&factories())
			.await
			.unwrap();
		assert!(store.all().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_build_loads_seed_orders() {
		let seed = r#"
[[seed]]
customer_id = "01"
order_total = 10
order_time = "11:01"
order_status = 1

[[seed]]
order_id = 99
customer_id = "02"
order_total = 20
order_time = "11:02"
order_status = 1
"#;
		let store = OrderStoreBuilder::new(config(MEMORY, seed))
			.build(&factories())
			.await
			.unwrap();

		let orders = store.all().await.unwrap();
		assert_eq!(orders.len(), 2);
		assert_eq!(orders[0].order_id, 1);
		assert_eq!(orders[1].order_id, 2);
		assert_eq!(orders[1].customer_id, "02");
	}

	#[tokio::test]
	async fn test_invalid_seed_fails_build() {
		let seed = "[[seed]]\ncustomer_id = \"01\"\norder_total = \"ten\"\n";
		let result = OrderStoreBuilder::new(config(MEMORY, seed))
			.build(&factories())
			.await;
		assert!(matches!(result, Err(BuilderError::Seed { index: 0, .. })));
	}

	#[tokio::test]
	async fn test_unknown_primary_is_missing_component() {
		let storage = "[storage]\nprimary = \"tape\"\n[storage.implementations.tape]\n";
		let result = OrderStoreBuilder::new(config(storage, ""))
			.build(&factories())
			.await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}

	#[tokio::test]
	async fn test_invalid_backend_config_fails_build() {
		let storage = "[storage]\nprimary = \"file\"\n[storage.implementations.file]\nstorage_path = 5\n";
		let result = OrderStoreBuilder::new(config(storage, ""))
			.build(&factories())
			.await;
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}

	#[tokio::test]
	async fn test_unreachable_redis_is_unavailable() {
		let storage = "[storage]\nprimary = \"redis\"\n[storage.implementations.redis]\nhost = \"127.0.0.1\"\nport = 1\nconnect_timeout_ms = 500\n";
		let result = OrderStoreBuilder::new(config(storage, ""))
			.build(&factories())
			.await;
		assert!(matches!(
			result,
			Err(BuilderError::BackingStoreUnavailable(_))
		));
	}

	#[tokio::test]
	async fn test_file_store_persists_across_builds() {
		let dir = TempDir::new().unwrap();
		let storage = format!(
			"[storage]\nprimary = \"file\"\n[storage.implementations.file]\nstorage_path = {:?}\n",
			dir.path().to_string_lossy()
		);

		let store = OrderStoreBuilder::new(config(&storage, ""))
			.build(&factories())
			.await
			.unwrap();
		let mut order = Order::new("a", 5, "t", 1);
		store.save(&mut order).await.unwrap();
		drop(store);

		let reopened = OrderStoreBuilder::new(config(&storage, ""))
			.build(&factories())
			.await
			.unwrap();
		assert_eq!(reopened.find(order.order_id).await.unwrap(), Some(order));
		assert_eq!(reopened.last_assigned_id().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_seed_skipped_when_store_not_empty() {
		let dir = TempDir::new().unwrap();
		let storage = format!(
			"[storage]\nprimary = \"file\"\n[storage.implementations.file]\nstorage_path = {:?}\n",
			dir.path().to_string_lossy()
		);
		let seed = "[[seed]]\ncustomer_id = \"01\"\norder_total = 10\norder_time = \"11:01\"\norder_status = 1\n";

		for _ in 0..2 {
			OrderStoreBuilder::new(config(&storage, seed))
				.build(&factories())
				.await
				.unwrap();
		}

		let store = OrderStoreBuilder::new(config(&storage, ""))
			.build(&factories())
			.await
			.unwrap();
		assert_eq!(store.all().await.unwrap().len(), 1);
	}
}
