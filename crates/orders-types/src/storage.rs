//! Storage-related types for the orders service.

/// Storage namespaces for different data collections.
///
/// Keys in a backend are formed as `<namespace>:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Namespace holding order records and their id counter.
	Orders,
}

impl StorageKey {
	/// Returns the string representation of the namespace.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
		}
	}

	/// Id under the namespace that holds the id counter rather than a record.
	pub fn counter_id(&self) -> &'static str {
		match self {
			StorageKey::Orders => "index",
		}
	}
}
