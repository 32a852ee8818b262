//! Schema validation for incoming records and backend configuration.
//!
//! Two flavours live here. [`Schema`] is an explicit, tagged description of a
//! JSON record (field name, whether it is required, its type and an optional
//! custom rule) interpreted by a small pure function that reports every
//! violation it finds. [`ConfigSchema`] is the trait storage backends
//! implement to check their TOML configuration section.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A single rule broken by a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
	/// The record is not a JSON object at all.
	NotAnObject { actual: String },
	/// A required field is absent.
	MissingField(String),
	/// A field is present but has the wrong JSON type.
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	/// A field has the right type but an unacceptable value.
	InvalidValue { field: String, message: String },
}

impl fmt::Display for Violation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Violation::NotAnObject { actual } => {
				write!(f, "body of request must be an object, got {}", actual)
			},
			Violation::MissingField(field) => write!(f, "missing required field '{}'", field),
			Violation::TypeMismatch {
				field,
				expected,
				actual,
			} => write!(
				f,
				"field '{}' must be {}, got {}",
				field, expected, actual
			),
			Violation::InvalidValue { field, message } => {
				write!(f, "invalid value for field '{}': {}", field, message)
			},
		}
	}
}

/// Error returned when a record fails schema validation.
///
/// Carries every violation found, in field declaration order, so callers can
/// report a complete message rather than only the first problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
	violations: Vec<Violation>,
}

impl ValidationError {
	/// Creates an error from a non-empty list of violations.
	pub fn new(violations: Vec<Violation>) -> Self {
		Self { violations }
	}

	/// All violations, in the order they were detected.
	pub fn violations(&self) -> &[Violation] {
		&self.violations
	}

	/// Names of the fields involved in at least one violation.
	pub fn fields(&self) -> Vec<&str> {
		self.violations
			.iter()
			.filter_map(|v| match v {
				Violation::NotAnObject { .. } => None,
				Violation::MissingField(field) => Some(field.as_str()),
				Violation::TypeMismatch { field, .. } => Some(field.as_str()),
				Violation::InvalidValue { field, .. } => Some(field.as_str()),
			})
			.collect()
	}
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Invalid order data: ")?;
		for (i, violation) in self.violations.iter().enumerate() {
			if i > 0 {
				write!(f, "; ")?;
			}
			write!(f, "{}", violation)?;
		}
		Ok(())
	}
}

impl std::error::Error for ValidationError {}

/// Represents the type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
	/// A JSON string.
	String,
	/// A JSON integer with optional inclusive bounds.
	Integer {
		/// Minimum allowed value (inclusive).
		min: Option<i64>,
		/// Maximum allowed value (inclusive).
		max: Option<i64>,
	},
}

impl FieldType {
	fn describe(&self) -> &'static str {
		match self {
			FieldType::String => "a string",
			FieldType::Integer { .. } => "an integer",
		}
	}
}

/// Custom rule run on a field after its type check succeeds.
pub type FieldValidator = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Represents a field in a record schema.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub required: bool,
	pub validator: Option<FieldValidator>,
}

impl fmt::Debug for Field {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("required", &self.required)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	/// Creates a required field with the given name and type.
	pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			required: true,
			validator: None,
		}
	}

	/// Creates an optional field with the given name and type.
	pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			required: false,
			validator: None,
		}
	}

	/// Adds a custom validator to this field.
	///
	/// The validator only runs when the field is present and has the declared
	/// type; it returns a message describing the problem on failure.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}
}

/// Defines a validation schema for JSON records.
#[derive(Debug)]
pub struct Schema {
	pub fields: Vec<Field>,
}

impl Schema {
	/// Creates a new schema from its field declarations.
	pub fn new(fields: Vec<Field>) -> Self {
		Self { fields }
	}

	/// Validates a JSON value against this schema.
	///
	/// A value that is not an object is rejected outright with a single
	/// [`Violation::NotAnObject`]. Otherwise every field is checked for
	/// presence, then type, then its custom rule, and all violations are
	/// collected. Unknown fields are ignored.
	pub fn validate(&self, record: &Value) -> Result<(), ValidationError> {
		let object = match record.as_object() {
			Some(object) => object,
			None => {
				return Err(ValidationError::new(vec![Violation::NotAnObject {
					actual: json_type_name(record).to_string(),
				}]))
			},
		};

		let mut violations = Vec::new();

		for field in &self.fields {
			match object.get(&field.name) {
				None if field.required => {
					violations.push(Violation::MissingField(field.name.clone()));
				},
				None => {},
				Some(value) => {
					if let Err(violation) = check_field_type(&field.name, value, &field.field_type)
					{
						violations.push(violation);
						continue;
					}
					if let Some(validator) = &field.validator {
						if let Err(message) = validator(value) {
							violations.push(Violation::InvalidValue {
								field: field.name.clone(),
								message,
							});
						}
					}
				},
			}
		}

		if violations.is_empty() {
			Ok(())
		} else {
			Err(ValidationError::new(violations))
		}
	}
}

fn check_field_type(
	field_name: &str,
	value: &Value,
	expected_type: &FieldType,
) -> Result<(), Violation> {
	let mismatch = || Violation::TypeMismatch {
		field: field_name.to_string(),
		expected: expected_type.describe().to_string(),
		actual: json_type_name(value).to_string(),
	};

	match expected_type {
		FieldType::String => {
			if !value.is_string() {
				return Err(mismatch());
			}
		},
		FieldType::Integer { min, max } => {
			// u64 values above i64::MAX are still integers; they only fail a max bound.
			let int_val = match (value.as_i64(), value.as_u64()) {
				(Some(v), _) => v as i128,
				(None, Some(v)) => v as i128,
				(None, None) => return Err(mismatch()),
			};

			if let Some(min_val) = min {
				if int_val < *min_val as i128 {
					return Err(Violation::InvalidValue {
						field: field_name.to_string(),
						message: format!("Value {} is less than minimum {}", int_val, min_val),
					});
				}
			}

			if let Some(max_val) = max {
				if int_val > *max_val as i128 {
					return Err(Violation::InvalidValue {
						field: field_name.to_string(),
						message: format!("Value {} is greater than maximum {}", int_val, max_val),
					});
				}
			}
		},
	}

	Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(n) if n.is_f64() => "float",
		Value::Number(_) => "integer",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

/// Errors raised when a backend's TOML configuration is rejected.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
	/// A required key is missing.
	#[error("Missing required field: {0}")]
	MissingField(String),
	/// A key has the wrong TOML type.
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
	/// A key has an unacceptable value.
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
}

/// Expected TOML type of a backend configuration key.
#[derive(Debug, Clone, Copy)]
pub enum ConfigFieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
}

/// Checks a backend's TOML section: `fields` are optional keys with their
/// expected types. Missing keys are fine; present keys must match.
pub fn validate_config_fields(
	config: &toml::Value,
	fields: &[(&str, ConfigFieldType)],
) -> Result<(), ConfigValidationError> {
	let table = config
		.as_table()
		.ok_or_else(|| ConfigValidationError::TypeMismatch {
			field: "root".to_string(),
			expected: "table".to_string(),
			actual: config.type_str().to_string(),
		})?;

	for (name, field_type) in fields {
		let Some(value) = table.get(*name) else {
			continue;
		};
		match field_type {
			ConfigFieldType::String => {
				if !value.is_str() {
					return Err(ConfigValidationError::TypeMismatch {
						field: name.to_string(),
						expected: "string".to_string(),
						actual: value.type_str().to_string(),
					});
				}
			},
			ConfigFieldType::Integer { min, max } => {
				let int_val =
					value
						.as_integer()
						.ok_or_else(|| ConfigValidationError::TypeMismatch {
							field: name.to_string(),
							expected: "integer".to_string(),
							actual: value.type_str().to_string(),
						})?;
				if min.is_some_and(|m| int_val < m) || max.is_some_and(|m| int_val > m) {
					return Err(ConfigValidationError::InvalidValue {
						field: name.to_string(),
						message: format!("Value {} is out of range", int_val),
					});
				}
			},
		}
	}

	Ok(())
}

/// Trait defining a configuration schema that can validate TOML values.
///
/// Storage backends implement this so the builder can reject a bad
/// configuration section before the backend is used.
pub trait ConfigSchema: Send + Sync {
	/// Validates a TOML configuration value against this schema.
	fn validate(&self, config: &toml::Value) -> Result<(), ConfigValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn sample_schema() -> Schema {
		Schema::new(vec![
			Field::optional("id", FieldType::Integer { min: Some(0), max: None }),
			Field::required("name", FieldType::String).with_validator(|v| {
				if v.as_str().is_some_and(str::is_empty) {
					Err("must not be empty".to_string())
				} else {
					Ok(())
				}
			}),
			Field::required("count", FieldType::Integer { min: None, max: None }),
		])
	}

	#[test]
	fn test_valid_record_passes() {
		let schema = sample_schema();
		assert!(schema.validate(&json!({"name": "a", "count": 3})).is_ok());
		assert!(schema.validate(&json!({"id": 7, "name": "a", "count": -3})).is_ok());
	}

	#[test]
	fn test_non_object_rejected_outright() {
		let schema = sample_schema();
		for value in [json!(null), json!("text"), json!([1, 2]), json!(5)] {
			let err = schema.validate(&value).unwrap_err();
			assert_eq!(err.violations().len(), 1);
			assert!(matches!(err.violations()[0], Violation::NotAnObject { .. }));
		}
	}

	#[test]
	fn test_reports_every_violation() {
		let schema = sample_schema();
		let err = schema.validate(&json!({"id": "x", "name": 4})).unwrap_err();

		assert_eq!(
			err.violations(),
			&[
				Violation::TypeMismatch {
					field: "id".into(),
					expected: "an integer".into(),
					actual: "string".into(),
				},
				Violation::TypeMismatch {
					field: "name".into(),
					expected: "a string".into(),
					actual: "integer".into(),
				},
				Violation::MissingField("count".into()),
			]
		);
		assert_eq!(err.fields(), vec!["id", "name", "count"]);
	}

	#[test]
	fn test_float_and_bool_are_not_integers() {
		let schema = sample_schema();
		let err = schema
			.validate(&json!({"name": "a", "count": 1.5}))
			.unwrap_err();
		assert!(err.to_string().contains("'count' must be an integer, got float"));

		let err = schema
			.validate(&json!({"name": "a", "count": true}))
			.unwrap_err();
		assert!(err.to_string().contains("got boolean"));
	}

	#[test]
	fn test_bounds_and_custom_rule() {
		let schema = sample_schema();
		let err = schema
			.validate(&json!({"id": -1, "name": "", "count": 0}))
			.unwrap_err();
		assert_eq!(err.violations().len(), 2);
		assert!(err.to_string().contains("less than minimum 0"));
		assert!(err.to_string().contains("must not be empty"));
	}

	#[test]
	fn test_config_fields() {
		let config: toml::Value = toml::from_str("host = \"localhost\"\nport = 6379").unwrap();
		let fields = [
			("host", ConfigFieldType::String),
			(
				"port",
				ConfigFieldType::Integer {
					min: Some(1),
					max: Some(65535),
				},
			),
		];
		assert!(validate_config_fields(&config, &fields).is_ok());

		let bad: toml::Value = toml::from_str("port = \"6379\"").unwrap();
		assert!(matches!(
			validate_config_fields(&bad, &fields),
			Err(ConfigValidationError::TypeMismatch { .. })
		));

		let out_of_range: toml::Value = toml::from_str("port = 70000").unwrap();
		assert!(matches!(
			validate_config_fields(&out_of_range, &fields),
			Err(ConfigValidationError::InvalidValue { .. })
		));
	}
}
