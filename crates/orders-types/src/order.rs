//! The Order entity and its record schema.
//!
//! An [`Order`] is the only domain object in the system. Incoming payloads are
//! untyped JSON records; they are checked against [`order_schema`] before an
//! `Order` is built from them, and an `Order` always renders back to a record
//! with exactly the five persisted fields.

use crate::validation::{Field, FieldType, Schema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Status code of an open order.
pub const ORDER_STATUS_ACTIVE: i64 = 1;
/// Status code of a cancelled order.
pub const ORDER_STATUS_CANCELLED: i64 = 0;

/// A purchase record.
///
/// `order_id == 0` marks an order that has not been persisted yet; the store
/// assigns a fresh id on first save. `order_status` is an opaque integer: only
/// [`ORDER_STATUS_ACTIVE`] and [`ORDER_STATUS_CANCELLED`] carry meaning, other
/// values pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	pub order_id: u64,
	pub customer_id: String,
	pub order_total: i64,
	pub order_time: String,
	pub order_status: i64,
}

impl Order {
	/// Creates a transient, not yet persisted order.
	pub fn new(
		customer_id: impl Into<String>,
		order_total: i64,
		order_time: impl Into<String>,
		order_status: i64,
	) -> Self {
		Self {
			order_id: 0,
			customer_id: customer_id.into(),
			order_total,
			order_time: order_time.into(),
			order_status,
		}
	}

	/// Builds an order from an untyped record.
	///
	/// The record is validated against [`order_schema`] first; on failure the
	/// error lists every violated field. `order_id` is optional and defaults
	/// to 0.
	pub fn from_record(record: &Value) -> Result<Self, ValidationError> {
		order_schema().validate(record)?;

		// Schema guarantees presence and types of everything read below.
		Ok(Self {
			order_id: record.get("order_id").and_then(Value::as_u64).unwrap_or(0),
			customer_id: str_field(record, "customer_id"),
			order_total: record
				.get("order_total")
				.and_then(Value::as_i64)
				.unwrap_or_default(),
			order_time: str_field(record, "order_time"),
			order_status: record
				.get("order_status")
				.and_then(Value::as_i64)
				.unwrap_or_default(),
		})
	}

	/// Renders the order as a record with exactly the persisted fields.
	pub fn to_record(&self) -> Value {
		json!({
			"order_id": self.order_id,
			"customer_id": self.customer_id,
			"order_total": self.order_total,
			"order_time": self.order_time,
			"order_status": self.order_status,
		})
	}

	/// Checks the order against the record schema.
	pub fn validate(&self) -> Result<(), ValidationError> {
		order_schema().validate(&self.to_record())
	}

	/// Returns true if the order has not been assigned an id yet.
	pub fn is_new(&self) -> bool {
		self.order_id == 0
	}

	/// Returns true if the order has been cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.order_status == ORDER_STATUS_CANCELLED
	}
}

fn str_field(record: &Value, name: &str) -> String {
	record
		.get(name)
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string()
}

/// The canonical order schema.
///
/// `customer_id` and `order_time` are required strings (`customer_id` must be
/// non-empty), `order_total` and `order_status` are required integers and
/// `order_id` is an optional non-negative integer.
pub fn order_schema() -> &'static Schema {
	static SCHEMA: OnceLock<Schema> = OnceLock::new();
	SCHEMA.get_or_init(|| {
		let any_i64 = FieldType::Integer {
			min: None,
			max: Some(i64::MAX),
		};
		Schema::new(vec![
			Field::optional(
				"order_id",
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			),
			Field::required("customer_id", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some("") => Err("customer_id must not be empty".to_string()),
					_ => Ok(()),
				}
			}),
			Field::required("order_total", any_i64),
			Field::required("order_time", FieldType::String),
			Field::required("order_status", any_i64),
		])
	})
}
