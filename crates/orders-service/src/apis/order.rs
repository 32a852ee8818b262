//! Order API implementation.
//!
//! These functions sit between the HTTP handlers and the [`OrderStore`]. They
//! take ids exactly as they appeared in the request path and untyped JSON
//! payloads, and return typed orders or an [`OrderError`].

use orders_core::{OrderStore, OrderStoreError};
use orders_storage::StorageError;
use orders_types::{APIError, Order, ValidationError};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during order processing.
#[derive(Debug, Error)]
pub enum OrderError {
	/// No order exists under the id given in the path.
	#[error("Order with id '{0}' was not found.")]
	NotFound(String),
	/// The payload failed validation.
	#[error(transparent)]
	Invalid(#[from] ValidationError),
	/// The store failed.
	#[error(transparent)]
	Store(OrderStoreError),
}

impl From<OrderStoreError> for OrderError {
	fn from(err: OrderStoreError) -> Self {
		match err {
			OrderStoreError::NotFound(id) => OrderError::NotFound(id.to_string()),
			OrderStoreError::Validation(e) => OrderError::Invalid(e),
			other => OrderError::Store(other),
		}
	}
}

impl From<OrderError> for APIError {
	fn from(err: OrderError) -> Self {
		match err {
			OrderError::NotFound(id) => APIError::order_not_found(id),
			OrderError::Invalid(e) => APIError::from(e),
			OrderError::Store(e @ OrderStoreError::BackingStoreUnavailable(_))
			| OrderError::Store(e @ OrderStoreError::Storage(StorageError::Unavailable(_))) => {
				APIError::ServiceUnavailable {
					message: e.to_string(),
				}
			},
			OrderError::Store(e) => APIError::InternalServerError {
				message: e.to_string(),
			},
		}
	}
}

/// Parses a path id. Anything that is not a non-negative integer cannot name
/// an order.
fn parse_id(id: &str) -> Option<u64> {
	id.parse().ok()
}

async fn find_existing(store: &OrderStore, id: &str) -> Result<Order, OrderError> {
	let order_id = parse_id(id).ok_or_else(|| OrderError::NotFound(id.to_string()))?;
	store
		.find(order_id)
		.await?
		.ok_or_else(|| OrderError::NotFound(id.to_string()))
}

/// Creates a new order from `payload`. Any `order_id` in the payload is
/// ignored; the store assigns a fresh one.
pub async fn create(store: &OrderStore, payload: &Value) -> Result<Order, OrderError> {
	let mut order = Order::from_record(payload)?;
	order.order_id = 0;
	store.save(&mut order).await?;
	info!(order_id = order.order_id, "Created order");
	Ok(order)
}

/// Retrieves a single order.
pub async fn retrieve(store: &OrderStore, id: &str) -> Result<Order, OrderError> {
	find_existing(store, id).await
}

/// Lists all orders, or only those of `customer_id` when it is given and
/// non-empty.
pub async fn list(store: &OrderStore, customer_id: Option<&str>) -> Result<Vec<Order>, OrderError> {
	let orders = match customer_id.filter(|c| !c.is_empty()) {
		Some(customer_id) => store.find_by_customer_id(customer_id).await?,
		None => store.all().await?,
	};
	Ok(orders)
}

/// Replaces every field of an existing order with `payload`, keeping its id.
pub async fn update(store: &OrderStore, id: &str, payload: &Value) -> Result<Order, OrderError> {
	let existing = find_existing(store, id).await?;

	let mut order = Order::from_record(payload)?;
	order.order_id = existing.order_id;
	store.save(&mut order).await?;
	info!(order_id = order.order_id, "Updated order");
	Ok(order)
}

/// Deletes an order. Unknown or malformed ids are not an error.
pub async fn delete(store: &OrderStore, id: &str) -> Result<(), OrderError> {
	match parse_id(id) {
		Some(order_id) => Ok(store.delete(order_id).await?),
		None => {
			warn!("Ignoring delete of malformed order id '{}'", id);
			Ok(())
		},
	}
}

/// Sets an order's status to cancelled.
pub async fn cancel(store: &OrderStore, id: &str) -> Result<Order, OrderError> {
	let order_id = parse_id(id).ok_or_else(|| OrderError::NotFound(id.to_string()))?;
	let order = store.cancel(order_id).await?;
	info!(order_id, "Cancelled order");
	Ok(order)
}

/// Removes every order and resets id assignment.
pub async fn reset(store: &OrderStore) -> Result<(), OrderError> {
	store.remove_all().await?;
	Ok(())
}
