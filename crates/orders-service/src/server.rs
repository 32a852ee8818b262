//! HTTP server for the orders API.
//!
//! Routes translate requests into calls on [`crate::apis::order`] and map
//! failures to JSON error bodies through [`APIError`].

use crate::apis::order;
use axum::{
	body::Bytes,
	extract::{DefaultBodyLimit, FromRequest, Path, Query, Request, State},
	http::{header, HeaderMap, StatusCode},
	response::{IntoResponse, Json, Response},
	routing::{delete, get, put},
	Form, Router,
};
use orders_config::{ApiConfig, Config};
use orders_core::OrderStore;
use orders_types::{
	APIError, HealthResponse, IndexResponse, ListOrdersQuery, Order, ORDER_STATUS_ACTIVE,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

const JSON_MEDIA_TYPE: &str = "application/json";
const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// The order store every route operates on.
	pub store: Arc<OrderStore>,
	/// Complete configuration.
	pub config: Arc<Config>,
}

/// Builds the router with all order routes and middleware.
///
/// `DELETE /orders/reset` is only registered when `api_config.test_mode` is set.
pub fn router(state: AppState, api_config: &ApiConfig) -> Router {
	let mut routes = Router::new()
		.route("/", get(handle_index))
		.route("/healthcheck", get(handle_health))
		.route("/orders", get(handle_list_orders).post(handle_create_order))
		.route(
			"/orders/{id}",
			get(handle_get_order)
				.put(handle_update_order)
				.delete(handle_delete_order),
		)
		.route("/orders/{id}/cancel", put(handle_cancel_order));

	if api_config.test_mode {
		tracing::warn!("Test mode enabled: DELETE /orders/reset is available");
		routes = routes.route("/orders/reset", delete(handle_reset_orders));
	}

	routes
		.fallback(handle_not_found)
		.method_not_allowed_fallback(handle_method_not_allowed)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive())
				.layer(TimeoutLayer::new(Duration::from_secs(
					api_config.timeout_seconds,
				)))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(state)
}

/// Starts the HTTP server and runs it until Ctrl-C.
pub async fn start_server(
	api_config: ApiConfig,
	store: Arc<OrderStore>,
	config: Config,
) -> Result<(), Box<dyn std::error::Error>> {
	let app_state = AppState {
		store,
		config: Arc::new(config),
	};
	let app = router(app_state, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Orders API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!("Failed to listen for shutdown signal: {}", e);
		return;
	}
	tracing::info!("Shutdown signal received");
}

/// Scheme and authority the client used to reach us.
fn base_url(headers: &HeaderMap) -> String {
	let scheme = headers
		.get("x-forwarded-proto")
		.and_then(|v| v.to_str().ok())
		.unwrap_or("http");
	let host = headers
		.get(header::HOST)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("localhost");
	format!("{}://{}", scheme, host)
}

/// Content type without parameters, lowercased.
fn media_type(headers: &HeaderMap) -> Option<String> {
	headers
		.get(header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.split(';').next())
		.map(|v| v.trim().to_ascii_lowercase())
}

fn unsupported_media_type(actual: Option<&str>, expected: &str) -> APIError {
	tracing::warn!("Invalid Content-Type: {}", actual.unwrap_or("<none>"));
	APIError::UnsupportedMediaType {
		message: format!("Content-Type must be {}", expected),
	}
}

async fn read_json(request: Request, state: &AppState) -> Result<Value, APIError> {
	let body = Bytes::from_request(request, state)
		.await
		.map_err(|e| APIError::BadRequest {
			message: e.body_text(),
			details: None,
		})?;
	serde_json::from_slice(&body).map_err(|e| APIError::BadRequest {
		message: format!("Invalid JSON body: {}", e),
		details: None,
	})
}

/// Turns submitted form fields into an order record.
///
/// Numeric text in `order_total` and `order_status` becomes an integer;
/// anything else is left as text for validation to reject. A missing status
/// means active.
fn form_record(fields: &HashMap<String, String>) -> Value {
	let mut record = serde_json::Map::new();
	for name in ["customer_id", "order_time"] {
		if let Some(value) = fields.get(name) {
			record.insert(name.to_string(), Value::String(value.clone()));
		}
	}
	for name in ["order_total", "order_status"] {
		if let Some(value) = fields.get(name) {
			let coerced = value
				.trim()
				.parse::<i64>()
				.map(Value::from)
				.unwrap_or_else(|_| Value::String(value.clone()));
			record.insert(name.to_string(), coerced);
		}
	}
	record
		.entry("order_status")
		.or_insert(Value::from(ORDER_STATUS_ACTIVE));
	Value::Object(record)
}

/// Handles GET / requests.
async fn handle_index(headers: HeaderMap) -> Json<IndexResponse> {
	Json(IndexResponse {
		name: "Order Demo REST API Service".to_string(),
		version: env!("CARGO_PKG_VERSION").to_string(),
		url: format!("{}/orders", base_url(&headers)),
	})
}

/// Handles GET /healthcheck requests.
async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, APIError> {
	match state.store.health_check().await {
		Ok(()) => Ok(Json(HealthResponse {
			status: 200,
			message: "Healthy".to_string(),
		})),
		Err(e) => {
			tracing::warn!(service = %state.config.service.id, "Health check failed: {}", e);
			Err(APIError::ServiceUnavailable {
				message: e.to_string(),
			})
		},
	}
}

/// Handles GET /orders requests.
async fn handle_list_orders(
	State(state): State<AppState>,
	Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, APIError> {
	match order::list(&state.store, query.customer_id.as_deref()).await {
		Ok(orders) => Ok(Json(orders)),
		Err(e) => {
			tracing::warn!("Order listing failed: {}", e);
			Err(APIError::from(e))
		},
	}
}

/// Handles POST /orders requests with a JSON or form body.
async fn handle_create_order(
	State(state): State<AppState>,
	request: Request,
) -> Result<Response, APIError> {
	let base = base_url(request.headers());
	let content_type = media_type(request.headers());

	let payload = match content_type.as_deref() {
		Some(JSON_MEDIA_TYPE) => read_json(request, &state).await?,
		Some(FORM_MEDIA_TYPE) => {
			tracing::info!("Getting data from form submitted");
			let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &state)
				.await
				.map_err(|e| APIError::BadRequest {
					message: e.body_text(),
					details: None,
				})?;
			form_record(&fields)
		},
		other => return Err(unsupported_media_type(other, JSON_MEDIA_TYPE)),
	};

	match order::create(&state.store, &payload).await {
		Ok(created) => {
			let location = format!("{}/orders/{}", base, created.order_id);
			Ok((
				StatusCode::CREATED,
				[(header::LOCATION, location)],
				Json(created),
			)
				.into_response())
		},
		Err(e) => {
			tracing::warn!("Order creation failed: {}", e);
			Err(APIError::from(e))
		},
	}
}

/// Handles GET /orders/{id} requests.
async fn handle_get_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	match order::retrieve(&state.store, &id).await {
		Ok(found) => Ok(Json(found)),
		Err(e) => {
			tracing::warn!("Order retrieval failed: {}", e);
			Err(APIError::from(e))
		},
	}
}

/// Handles PUT /orders/{id} requests. Only JSON bodies are accepted.
async fn handle_update_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
	request: Request,
) -> Result<Json<Order>, APIError> {
	let content_type = media_type(request.headers());
	if content_type.as_deref() != Some(JSON_MEDIA_TYPE) {
		return Err(unsupported_media_type(content_type.as_deref(), JSON_MEDIA_TYPE));
	}
	let payload = read_json(request, &state).await?;

	match order::update(&state.store, &id, &payload).await {
		Ok(updated) => Ok(Json(updated)),
		Err(e) => {
			tracing::warn!("Order update failed: {}", e);
			Err(APIError::from(e))
		},
	}
}

/// Handles DELETE /orders/{id} requests.
async fn handle_delete_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<StatusCode, APIError> {
	match order::delete(&state.store, &id).await {
		Ok(()) => Ok(StatusCode::NO_CONTENT),
		Err(e) => {
			tracing::warn!("Order deletion failed: {}", e);
			Err(APIError::from(e))
		},
	}
}

/// Handles PUT /orders/{id}/cancel requests.
async fn handle_cancel_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<Order>, APIError> {
	match order::cancel(&state.store, &id).await {
		Ok(cancelled) => Ok(Json(cancelled)),
		Err(e) => {
			tracing::warn!("Order cancellation failed: {}", e);
			Err(APIError::from(e))
		},
	}
}

/// Handles DELETE /orders/reset requests.
async fn handle_reset_orders(State(state): State<AppState>) -> Result<StatusCode, APIError> {
	match order::reset(&state.store).await {
		Ok(()) => Ok(StatusCode::NO_CONTENT),
		Err(e) => {
			tracing::warn!("Order reset failed: {}", e);
			Err(APIError::from(e))
		},
	}
}

async fn handle_not_found() -> APIError {
	APIError::NotFound {
		message: "The requested URL was not found on the server.".to_string(),
	}
}

async fn handle_method_not_allowed() -> APIError {
	APIError::MethodNotAllowed
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::{to_bytes, Body};
	use axum::http::Method;
	use orders_storage::{implementations::memory::MemoryStorage, StorageService};
	use serde_json::json;
	use tower::ServiceExt;

	fn app_with(test_mode: bool) -> Router {
		let config: Config = "[service]\nid = \"orders-test\"\n[storage]\nprimary = \"memory\"\n[storage.implementations.memory]\n"
			.parse()
			.unwrap();
		let store = OrderStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))));
		let api_config = ApiConfig {
			test_mode,
			..ApiConfig::default()
		};
		router(
			AppState {
				store: Arc::new(store),
				config: Arc::new(config),
			},
			&api_config,
		)
	}

	fn app() -> Router {
		app_with(false)
	}

	fn request(method: Method, uri: &str, content_type: Option<&str>, body: impl Into<Body>) -> Request {
		let mut builder = Request::builder()
			.method(method)
			.uri(uri)
			.header(header::HOST, "orders.test");
		if let Some(content_type) = content_type {
			builder = builder.header(header::CONTENT_TYPE, content_type);
		}
		builder.body(body.into()).unwrap()
	}

	fn json_request(method: Method, uri: &str, body: &Value) -> Request {
		request(method, uri, Some(JSON_MEDIA_TYPE), body.to_string())
	}

	async fn send(app: &Router, request: Request) -> (StatusCode, HeaderMap, Value) {
		let response = app.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let headers = response.headers().clone();
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let body = if bytes.is_empty() {
			Value::Null
		} else {
			serde_json::from_slice(&bytes).unwrap()
		};
		(status, headers, body)
	}

	fn order_body(customer_id: &str, total: i64) -> Value {
		json!({
			"customer_id": customer_id,
			"order_total": total,
			"order_time": "11:01",
			"order_status": 1,
		})
	}

	#[tokio::test]
	async fn test_index_and_healthcheck() {
		let app = app();

		let (status, _, body) = send(&app, request(Method::GET, "/", None, Body::empty())).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["url"], "http://orders.test/orders");
		assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

		let (status, _, body) =
			send(&app, request(Method::GET, "/healthcheck", None, Body::empty())).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body, json!({"status": 200, "message": "Healthy"}));
	}

	#[tokio::test]
	async fn test_create_list_get_delete_flow() {
		let app = app();

		let (status, headers, created) =
			send(&app, json_request(Method::POST, "/orders", &order_body("2", 3))).await;
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(created["order_id"], 1);
		assert_eq!(headers[header::LOCATION], "http://orders.test/orders/1");

		let (status, _, _) =
			send(&app, json_request(Method::POST, "/orders", &order_body("6", 7))).await;
		assert_eq!(status, StatusCode::CREATED);

		let (_, _, list) = send(&app, request(Method::GET, "/orders", None, Body::empty())).await;
		assert_eq!(list.as_array().unwrap().len(), 2);

		let (_, _, filtered) = send(
			&app,
			request(Method::GET, "/orders?customer_id=6", None, Body::empty()),
		)
		.await;
		assert_eq!(filtered.as_array().unwrap().len(), 1);
		assert_eq!(filtered[0]["order_id"], 2);

		let (status, _, found) =
			send(&app, request(Method::GET, "/orders/1", None, Body::empty())).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(found, created);

		let (status, _, body) =
			send(&app, request(Method::DELETE, "/orders/1", None, Body::empty())).await;
		assert_eq!(status, StatusCode::NO_CONTENT);
		assert_eq!(body, Value::Null);

		let (status, _, body) =
			send(&app, request(Method::GET, "/orders/1", None, Body::empty())).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body["message"], "Order with id '1' was not found.");
		assert_eq!(body["error"], "Not Found");
	}

	#[tokio::test]
	async fn test_create_from_form() {
		let app = app();
		let (status, _, created) = send(
			&app,
			request(
				Method::POST,
				"/orders",
				Some(FORM_MEDIA_TYPE),
				"customer_id=07&order_total=25&order_time=09%3A30",
			),
		)
		.await;
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(created["customer_id"], "07");
		assert_eq!(created["order_total"], 25);
		assert_eq!(created["order_time"], "09:30");
		assert_eq!(created["order_status"], 1);
	}

	#[tokio::test]
	async fn test_create_rejects_bad_input() {
		let app = app();

		let (status, _, body) = send(
			&app,
			json_request(Method::POST, "/orders", &json!({"order_total": "x"})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert_eq!(body["status"], 400);
		assert_eq!(body["details"].as_array().unwrap().len(), 4);

		let (status, _, _) = send(
			&app,
			request(Method::POST, "/orders", Some(JSON_MEDIA_TYPE), "{not json"),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		let (status, _, body) = send(
			&app,
			request(Method::POST, "/orders", Some("text/plain"), "hello"),
		)
		.await;
		assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
		assert_eq!(body["message"], "Content-Type must be application/json");
	}

	#[tokio::test]
	async fn test_update_order() {
		let app = app();
		send(&app, json_request(Method::POST, "/orders", &order_body("a", 1))).await;

		let (status, _, updated) =
			send(&app, json_request(Method::PUT, "/orders/1", &order_body("b", 50))).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(updated["order_id"], 1);
		assert_eq!(updated["customer_id"], "b");
		assert_eq!(updated["order_total"], 50);

		let (status, _, _) =
			send(&app, json_request(Method::PUT, "/orders/9", &order_body("b", 50))).await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		let (status, _, _) =
			send(&app, json_request(Method::PUT, "/orders/1", &json!({"customer_id": 5}))).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		let (status, _, _) = send(
			&app,
			request(
				Method::PUT,
				"/orders/1",
				Some(FORM_MEDIA_TYPE),
				"customer_id=c",
			),
		)
		.await;
		assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
	}

	#[tokio::test]
	async fn test_cancel_order() {
		let app = app();
		send(&app, json_request(Method::POST, "/orders", &order_body("a", 1))).await;

		let (status, _, cancelled) =
			send(&app, request(Method::PUT, "/orders/1/cancel", None, Body::empty())).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(cancelled["order_status"], 0);

		let (status, _, _) =
			send(&app, request(Method::PUT, "/orders/5/cancel", None, Body::empty())).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn test_non_numeric_id_is_not_found() {
		let app = app();
		let (status, _, body) =
			send(&app, request(Method::GET, "/orders/abc", None, Body::empty())).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body["message"], "Order with id 'abc' was not found.");
	}

	#[tokio::test]
	async fn test_unknown_route_and_method() {
		let app = app();
		let (status, _, body) =
			send(&app, request(Method::GET, "/nowhere", None, Body::empty())).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert_eq!(body["status"], 404);

		let (status, _, body) =
			send(&app, request(Method::PATCH, "/orders", None, Body::empty())).await;
		assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
		assert_eq!(body["error"], "Method not Allowed");
	}

	#[tokio::test]
	async fn test_reset_only_in_test_mode() {
		let app = app_with(true);
		send(&app, json_request(Method::POST, "/orders", &order_body("a", 1))).await;
		send(&app, json_request(Method::POST, "/orders", &order_body("b", 1))).await;

		let (status, _, _) =
			send(&app, request(Method::DELETE, "/orders/reset", None, Body::empty())).await;
		assert_eq!(status, StatusCode::NO_CONTENT);

		let (_, _, list) = send(&app, request(Method::GET, "/orders", None, Body::empty())).await;
		assert_eq!(list, json!([]));
		let (_, _, created) =
			send(&app, json_request(Method::POST, "/orders", &order_body("c", 1))).await;
		assert_eq!(created["order_id"], 1);

		// Without test mode the path is just a malformed id.
		let app = self::app();
		send(&app, json_request(Method::POST, "/orders", &order_body("a", 1))).await;
		send(&app, request(Method::DELETE, "/orders/reset", None, Body::empty())).await;
		let (_, _, list) = send(&app, request(Method::GET, "/orders", None, Body::empty())).await;
		assert_eq!(list.as_array().unwrap().len(), 1);
	}

	#[test]
	fn test_form_record_coercion() {
		let mut fields = HashMap::new();
		fields.insert("customer_id".to_string(), "1".to_string());
		fields.insert("order_total".to_string(), " 42 ".to_string());
		fields.insert("order_status".to_string(), "abc".to_string());

		let record = form_record(&fields);
		assert_eq!(record["customer_id"], "1");
		assert_eq!(record["order_total"], 42);
		assert_eq!(record["order_status"], "abc");
		assert!(record.get("order_time").is_none());
	}
}
