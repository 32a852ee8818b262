//! Factory registry for storage implementations.
//!
//! Every backend the storage crate exports is registered by name once; the
//! configuration's `storage.primary` selects among them at startup.

use orders_config::Config;
use orders_core::{BuilderError, OrderStore, OrderStoreBuilder};
use orders_storage::StorageFactory;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Registry of implementation factories, keyed by name.
pub struct FactoryRegistry {
	pub storage: HashMap<String, StorageFactory>,
}

impl FactoryRegistry {
	/// Create a new empty registry
	pub fn new() -> Self {
		Self {
			storage: HashMap::new(),
		}
	}

	/// Register a storage implementation
	pub fn register_storage(&mut self, name: impl Into<String>, factory: StorageFactory) {
		self.storage.insert(name.into(), factory);
	}
}

impl Default for FactoryRegistry {
	fn default() -> Self {
		Self::new()
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Initialize the global registry with all available implementations
pub fn initialize_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in orders_storage::get_all_implementations() {
			tracing::debug!("Registering storage implementation: {}", name);
			registry.register_storage(name, factory);
		}

		registry
	})
}

/// Builds the order store from configuration using the registered factories.
pub async fn build_order_store(config: Config) -> Result<OrderStore, BuilderError> {
	let registry = initialize_registry();
	OrderStoreBuilder::new(config).build(&registry.storage).await
}
