//! API types for the orders HTTP API.
//!
//! Request/response bodies that are not orders themselves, and the structured
//! error type every endpoint returns on failure.

use crate::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Query parameters accepted by `GET /orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOrdersQuery {
	/// Only return orders placed by this customer.
	pub customer_id: Option<String>,
}

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
	pub name: String,
	pub version: String,
	/// Absolute URL of the order collection.
	pub url: String,
}

/// Body of `GET /healthcheck`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
	pub status: u16,
	pub message: String,
}

/// API error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// HTTP status code, repeated in the body.
	pub status: u16,
	/// Machine-readable error kind, e.g. "Not Found".
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Structured API error type with appropriate HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed or incomplete input (400)
	BadRequest {
		message: String,
		details: Option<serde_json::Value>,
	},
	/// The addressed order does not exist (404)
	NotFound { message: String },
	/// Route exists but not for this method (405)
	MethodNotAllowed,
	/// Body sent with an unsupported content type (415)
	UnsupportedMediaType { message: String },
	/// Backing store could not serve the request (503)
	ServiceUnavailable { message: String },
	/// Internal server error (500)
	InternalServerError { message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::MethodNotAllowed => 405,
			APIError::UnsupportedMediaType { .. } => 415,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Short error kind used in the `error` field of the response body.
	pub fn kind(&self) -> &'static str {
		match self {
			APIError::BadRequest { .. } => "Bad Request",
			APIError::NotFound { .. } => "Not Found",
			APIError::MethodNotAllowed => "Method not Allowed",
			APIError::UnsupportedMediaType { .. } => "Unsupported Media Type",
			APIError::ServiceUnavailable { .. } => "Service Unavailable",
			APIError::InternalServerError { .. } => "Internal Server Error",
		}
	}

	/// Not-found error for an order id as it appeared in the request path.
	pub fn order_not_found(id: impl fmt::Display) -> Self {
		APIError::NotFound {
			message: format!("Order with id '{}' was not found.", id),
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (message, details) = match self {
			APIError::BadRequest { message, details } => (message.clone(), details.clone()),
			APIError::NotFound { message }
			| APIError::UnsupportedMediaType { message }
			| APIError::ServiceUnavailable { message }
			| APIError::InternalServerError { message } => (message.clone(), None),
			APIError::MethodNotAllowed => (
				"Your request method is not supported. Check your HTTP method and try again."
					.to_string(),
				None,
			),
		};
		ErrorResponse {
			status: self.status_code(),
			error: self.kind().to_string(),
			message,
			details,
		}
	}
}

impl From<ValidationError> for APIError {
	fn from(err: ValidationError) -> Self {
		let details = err
			.violations()
			.iter()
			.map(|v| serde_json::Value::String(v.to_string()))
			.collect();
		APIError::BadRequest {
			message: err.to_string(),
			details: Some(serde_json::Value::Array(details)),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.kind(), self.to_error_response().message)
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}
