//! Core order store for the orders service.
//!
//! The [`OrderStore`] is the only component that writes order records or
//! advances the id counter. It validates every order before persisting it and
//! delegates the bytes to whichever storage backend it was built with.

use orders_storage::{StorageError, StorageService};
use orders_types::{Order, StorageKey, ValidationError, ORDER_STATUS_CANCELLED};
use std::sync::Arc;
use thiserror::Error;

pub mod builder;

pub use builder::{BuilderError, OrderStoreBuilder};

/// Errors that can occur during order store operations.
#[derive(Debug, Error)]
pub enum OrderStoreError {
	/// The addressed order does not exist.
	#[error("Order {0} not found")]
	NotFound(u64),
	/// The backing store did not answer its liveness probe.
	#[error("Backing store unavailable: {0}")]
	BackingStoreUnavailable(String),
	/// The order failed schema validation and was not persisted.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// The storage backend failed.
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Persistent home for orders.
///
/// Records live under `orders:<id>`; the id counter lives under
/// `orders:index`.
pub struct OrderStore {
	storage: Arc<StorageService>,
}

impl OrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	fn namespace() -> &'static str {
		StorageKey::Orders.as_str()
	}

	fn counter_id() -> &'static str {
		StorageKey::Orders.counter_id()
	}

	/// Validates and persists an order, returning its id.
	///
	/// A new order (`order_id == 0`) is assigned the next value of the id
	/// counter first. Any other id is written as given, replacing an existing
	/// record and leaving the counter alone.
	pub async fn save(&self, order: &mut Order) -> Result<u64, OrderStoreError> {
		order.validate()?;

		if order.is_new() {
			order.order_id = self
				.storage
				.increment(Self::namespace(), Self::counter_id())
				.await?;
			tracing::debug!(order_id = order.order_id, "Assigned order id");
		}

		self.storage
			.store(Self::namespace(), &order.order_id.to_string(), order)
			.await?;
		tracing::info!(
			order_id = order.order_id,
			customer_id = %order.customer_id,
			"Saved order"
		);
		Ok(order.order_id)
	}

	/// Looks up an order by id.
	pub async fn find(&self, order_id: u64) -> Result<Option<Order>, OrderStoreError> {
		match self
			.storage
			.retrieve::<Order>(Self::namespace(), &order_id.to_string())
			.await
		{
			Ok(order) => Ok(Some(order)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Returns every order placed by `customer_id` (exact, case-sensitive match).
	pub async fn find_by_customer_id(
		&self,
		customer_id: &str,
	) -> Result<Vec<Order>, OrderStoreError> {
		let mut orders = self.all().await?;
		orders.retain(|order| order.customer_id == customer_id);
		Ok(orders)
	}

	/// Returns every stored order, sorted by id.
	pub async fn all(&self) -> Result<Vec<Order>, OrderStoreError> {
		let mut ids: Vec<u64> = self
			.storage
			.ids(Self::namespace())
			.await?
			.iter()
			.filter_map(|id| id.parse().ok())
			.collect();
		ids.sort_unstable();

		let mut orders = Vec::with_capacity(ids.len());
		for id in ids {
			// Records removed since the listing are skipped.
			if let Some(order) = self.find(id).await? {
				orders.push(order);
			}
		}
		Ok(orders)
	}

	/// Removes the stored record for `order`.
	pub async fn remove(&self, order: &Order) -> Result<(), OrderStoreError> {
		self.delete(order.order_id).await
	}

	/// Removes an order by id. Removing an absent id is a no-op.
	pub async fn delete(&self, order_id: u64) -> Result<(), OrderStoreError> {
		self.storage
			.remove(Self::namespace(), &order_id.to_string())
			.await?;
		tracing::info!(order_id, "Deleted order");
		Ok(())
	}

	/// Removes every order and resets the id counter, so the next new
	/// order gets id 1.
	pub async fn remove_all(&self) -> Result<(), OrderStoreError> {
		let removed = self.storage.clear_namespace(Self::namespace()).await?;
		tracing::warn!(keys = removed, "Removed all orders");
		Ok(())
	}

	/// Loads an order, applies `updater` and saves it under the same id.
	pub async fn update_with<F>(&self, order_id: u64, updater: F) -> Result<Order, OrderStoreError>
	where
		F: FnOnce(&mut Order),
	{
		let mut order = self
			.find(order_id)
			.await?
			.ok_or(OrderStoreError::NotFound(order_id))?;

		updater(&mut order);
		order.order_id = order_id;

		self.save(&mut order).await?;
		Ok(order)
	}

	/// Marks an order as cancelled.
	pub async fn cancel(&self, order_id: u64) -> Result<Order, OrderStoreError> {
		self.update_with(order_id, |order| {
			order.order_status = ORDER_STATUS_CANCELLED;
		})
		.await
	}

	/// The most recently assigned id, or 0 if none has been assigned.
	pub async fn last_assigned_id(&self) -> Result<u64, OrderStoreError> {
		Ok(self
			.storage
			.counter(Self::namespace(), Self::counter_id())
			.await?)
	}

	/// Verifies the backing store is reachable.
	pub async fn health_check(&self) -> Result<(), OrderStoreError> {
		self.storage
			.health_check()
			.await
			.map_err(|e| OrderStoreError::BackingStoreUnavailable(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orders_storage::implementations::memory::MemoryStorage;
	use orders_types::ORDER_STATUS_ACTIVE;

	fn store() -> OrderStore {
		OrderStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn order(customer_id: &str, total: i64, time: &str) -> Order {
		Order::new(customer_id, total, time, ORDER_STATUS_ACTIVE)
	}

	#[tokio::test]
	async fn test_create_list_retrieve_delete_scenario() {
		let store = store();

		let mut first = order("2", 3, "4");
		let mut second = order("6", 7, "8");
		assert_eq!(store.save(&mut first).await.unwrap(), 1);
		assert_eq!(store.save(&mut second).await.unwrap(), 2);
		assert_eq!(first.order_id, 1);

		let all = store.all().await.unwrap();
		assert_eq!(all, vec![first.clone(), second.clone()]);

		assert_eq!(store.find(1).await.unwrap(), Some(first.clone()));

		store.delete(1).await.unwrap();
		assert_eq!(store.all().await.unwrap(), vec![second]);
		assert_eq!(store.find(1).await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_counter_tracks_creations() {
		let store = store();
		assert_eq!(store.last_assigned_id().await.unwrap(), 0);
		for _ in 0..5 {
			store.save(&mut order("c", 1, "t")).await.unwrap();
		}
		assert_eq!(store.last_assigned_id().await.unwrap(), 5);
	}

	#[tokio::test]
	async fn test_save_with_id_upserts_without_touching_counter() {
		let store = store();
		let mut created = order("a", 1, "t");
		store.save(&mut created).await.unwrap();

		let mut replacement = order("b", 2, "u");
		replacement.order_id = created.order_id;
		assert_eq!(store.save(&mut replacement).await.unwrap(), 1);
		assert_eq!(store.all().await.unwrap(), vec![replacement]);

		let mut explicit = order("c", 3, "v");
		explicit.order_id = 42;
		store.save(&mut explicit).await.unwrap();
		assert_eq!(store.last_assigned_id().await.unwrap(), 1);
		assert!(store.find(42).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_invalid_order_is_not_persisted() {
		let store = store();
		let mut bad = order("", 1, "t");
		let err = store.save(&mut bad).await.unwrap_err();
		assert!(matches!(err, OrderStoreError::Validation(_)));
		assert!(store.all().await.unwrap().is_empty());
		assert_eq!(store.last_assigned_id().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_find_by_customer_id_is_exact() {
		let store = store();
		store.save(&mut order("X", 1, "t")).await.unwrap();
		store.save(&mut order("x", 2, "t")).await.unwrap();
		store.save(&mut order("X", 3, "t")).await.unwrap();

		let found = store.find_by_customer_id("X").await.unwrap();
		assert_eq!(found.len(), 2);
		assert!(found.iter().all(|o| o.customer_id == "X"));
		assert!(store.find_by_customer_id("Y").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_remove_all_resets_counter() {
		let store = store();
		store.save(&mut order("a", 1, "t")).await.unwrap();
		store.save(&mut order("b", 1, "t")).await.unwrap();

		store.remove_all().await.unwrap();
		assert!(store.all().await.unwrap().is_empty());
		assert_eq!(store.last_assigned_id().await.unwrap(), 0);
		assert_eq!(store.save(&mut order("c", 1, "t")).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_remove_is_idempotent() {
		let store = store();
		let mut created = order("a", 1, "t");
		store.save(&mut created).await.unwrap();

		store.remove(&created).await.unwrap();
		store.remove(&created).await.unwrap();
		store.delete(999).await.unwrap();
		assert!(store.all().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_cancel() {
		let store = store();
		let mut created = order("a", 10, "t");
		store.save(&mut created).await.unwrap();

		let cancelled = store.cancel(created.order_id).await.unwrap();
		assert!(cancelled.is_cancelled());
		assert_eq!(
			cancelled,
			Order {
				order_status: ORDER_STATUS_CANCELLED,
				..created.clone()
			}
		);
		assert_eq!(store.find(created.order_id).await.unwrap(), Some(cancelled));

		let missing = store.cancel(77).await;
		assert!(matches!(missing, Err(OrderStoreError::NotFound(77))));
		assert_eq!(store.all().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_concurrent_creations_get_distinct_ids() {
		let store = Arc::new(store());

		let mut handles = Vec::new();
		for i in 0..32 {
			let store = Arc::clone(&store);
			handles.push(tokio::spawn(async move {
				store.save(&mut order(&i.to_string(), i, "t")).await
			}));
		}

		let mut ids = Vec::new();
		for handle in handles {
			ids.push(handle.await.unwrap().unwrap());
		}
		ids.sort_unstable();
		assert_eq!(ids, (1..=32).collect::<Vec<u64>>());
		assert_eq!(store.all().await.unwrap().len(), 32);
	}

	#[tokio::test]
	async fn test_all_skips_foreign_keys_in_namespace() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let store = OrderStore::new(Arc::clone(&storage));
		store.save(&mut order("a", 1, "t")).await.unwrap();
		storage.store("orders", "notes", &"x").await.unwrap();

		assert_eq!(store.all().await.unwrap().len(), 1);
	}
}
