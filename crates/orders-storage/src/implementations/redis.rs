//! Redis storage backend for the orders service.
//!
//! Endpoints are discovered in this order: explicit `host`/`port`/`password`
//! in the configuration section, then a Cloud Foundry style service binding
//! read from `VCAP_SERVICES`, then the well-known local addresses
//! `127.0.0.1:6379` and `redis:6379`. The first endpoint that answers `PING`
//! is kept for the lifetime of the backend.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use orders_types::{
	validate_config_fields, ConfigFieldType, ConfigSchema, ConfigValidationError,
	ImplementationRegistry, SecretString,
};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_PORT: u16 = 6379;
const DEFAULT_BINDING_ENV: &str = "VCAP_SERVICES";
const DEFAULT_SERVICE_NAME: &str = "rediscloud";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;

/// Address and credential of one Redis server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
	pub host: String,
	pub port: u16,
	pub password: Option<SecretString>,
}

impl RedisEndpoint {
	pub fn new(host: impl Into<String>, port: u16, password: Option<SecretString>) -> Self {
		Self {
			host: host.into(),
			port,
			password,
		}
	}

	fn client(&self) -> Result<redis::Client, StorageError> {
		let info = redis::ConnectionInfo {
			addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
			redis: redis::RedisConnectionInfo {
				password: self
					.password
					.as_ref()
					.map(|p| p.expose_secret().to_string()),
				..Default::default()
			},
		};
		redis::Client::open(info).map_err(|e| StorageError::Configuration(e.to_string()))
	}
}

impl fmt::Display for RedisEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

#[derive(Debug, Deserialize)]
struct ServiceBinding {
	credentials: BindingCredentials,
}

#[derive(Debug, Deserialize)]
struct BindingCredentials {
	hostname: String,
	port: BindingPort,
	#[serde(default)]
	password: Option<String>,
}

/// Bindings publish the port either as a number or as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BindingPort {
	Number(u16),
	Text(String),
}

/// Extracts the endpoint of `service_name` from a `VCAP_SERVICES` document.
pub fn endpoint_from_binding(raw: &str, service_name: &str) -> Result<RedisEndpoint, StorageError> {
	let services: HashMap<String, Vec<ServiceBinding>> = serde_json::from_str(raw)
		.map_err(|e| StorageError::Configuration(format!("Invalid service binding: {}", e)))?;

	let binding = services
		.get(service_name)
		.and_then(|bindings| bindings.first())
		.ok_or_else(|| {
			StorageError::Configuration(format!(
				"Service binding has no '{}' entry",
				service_name
			))
		})?;

	let creds = &binding.credentials;
	let port = match &creds.port {
		BindingPort::Number(port) => *port,
		BindingPort::Text(text) => text.parse().map_err(|_| {
			StorageError::Configuration(format!("Invalid port in service binding: {}", text))
		})?,
	};

	Ok(RedisEndpoint::new(
		creds.hostname.clone(),
		port,
		creds.password.clone().filter(|p| !p.is_empty()).map(SecretString::new),
	))
}

/// Resolves the candidate endpoints for a configuration section.
///
/// `binding` is the content of the service binding variable, if set.
pub fn discover_endpoints(
	config: &toml::Value,
	binding: Option<&str>,
) -> Result<Vec<RedisEndpoint>, StorageError> {
	if let Some(host) = config.get("host").and_then(|v| v.as_str()) {
		let port = config
			.get("port")
			.and_then(|v| v.as_integer())
			.map(|p| p as u16)
			.unwrap_or(DEFAULT_PORT);
		let password = config
			.get("password")
			.and_then(|v| v.as_str())
			.filter(|p| !p.is_empty())
			.map(SecretString::from);
		return Ok(vec![RedisEndpoint::new(host, port, password)]);
	}

	if let Some(raw) = binding {
		let service_name = config
			.get("service_name")
			.and_then(|v| v.as_str())
			.unwrap_or(DEFAULT_SERVICE_NAME);
		return Ok(vec![endpoint_from_binding(raw, service_name)?]);
	}

	Ok(vec![
		RedisEndpoint::new("127.0.0.1", DEFAULT_PORT, None),
		RedisEndpoint::new("redis", DEFAULT_PORT, None),
	])
}

fn map_redis_error(err: redis::RedisError) -> StorageError {
	if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
		StorageError::Unavailable(err.to_string())
	} else {
		StorageError::Backend(err.to_string())
	}
}

/// Escapes glob metacharacters so a literal prefix can be used in KEYS.
fn glob_escape(prefix: &str) -> String {
	let mut escaped = String::with_capacity(prefix.len());
	for c in prefix.chars() {
		if matches!(c, '*' | '?' | '[' | ']' | '\\') {
			escaped.push('\\');
		}
		escaped.push(c);
	}
	escaped
}

/// Redis-backed storage implementation.
pub struct RedisStorage {
	/// Endpoints to try, in order.
	candidates: Vec<RedisEndpoint>,
	/// Upper bound on each connection attempt.
	connect_timeout: Duration,
	/// Connection to the first endpoint that answered.
	connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisStorage {
	/// Creates a backend that will connect to the first live candidate.
	pub fn new(candidates: Vec<RedisEndpoint>, connect_timeout: Duration) -> Self {
		Self {
			candidates,
			connect_timeout,
			connection: RwLock::new(None),
		}
	}

	async fn try_endpoint(
		&self,
		endpoint: &RedisEndpoint,
	) -> Result<MultiplexedConnection, StorageError> {
		let client = endpoint.client()?;
		let attempt = async {
			let mut conn = client.get_multiplexed_async_connection().await?;
			redis::cmd("PING")
				.query_async::<_, String>(&mut conn)
				.await?;
			Ok::<_, redis::RedisError>(conn)
		};
		match tokio::time::timeout(self.connect_timeout, attempt).await {
			Ok(result) => result.map_err(map_redis_error),
			Err(_) => Err(StorageError::Unavailable(format!(
				"Timed out after {:?}",
				self.connect_timeout
			))),
		}
	}

	/// Probes the candidates in order and keeps the first live connection.
	async fn connect(&self) -> Result<MultiplexedConnection, StorageError> {
		let mut guard = self.connection.write().await;
		if let Some(conn) = guard.as_ref() {
			return Ok(conn.clone());
		}

		for endpoint in &self.candidates {
			tracing::info!("Testing connection to Redis at {}", endpoint);
			match self.try_endpoint(endpoint).await {
				Ok(conn) => {
					tracing::info!("Connection established to {}", endpoint);
					*guard = Some(conn.clone());
					return Ok(conn);
				},
				Err(e) => {
					tracing::warn!("Connection error from {}: {}", endpoint, e);
				},
			}
		}

		let tried = self
			.candidates
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join(", ");
		Err(StorageError::Unavailable(format!(
			"Could not connect to the Redis service (tried {})",
			tried
		)))
	}

	async fn connection(&self) -> Result<MultiplexedConnection, StorageError> {
		if let Some(conn) = self.connection.read().await.as_ref() {
			return Ok(conn.clone());
		}
		self.connect().await
	}
}

#[async_trait]
impl StorageInterface for RedisStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let mut conn = self.connection().await?;
		let value: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
		value.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let mut conn = self.connection().await?;
		conn.set::<_, _, ()>(key, value)
			.await
			.map_err(map_redis_error)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut conn = self.connection().await?;
		conn.del::<_, ()>(key).await.map_err(map_redis_error)
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let mut conn = self.connection().await?;
		conn.exists::<_, bool>(key).await.map_err(map_redis_error)
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut conn = self.connection().await?;
		let pattern = format!("{}*", glob_escape(prefix));
		conn.keys::<_, Vec<String>>(pattern)
			.await
			.map_err(map_redis_error)
	}

	async fn increment(&self, key: &str) -> Result<u64, StorageError> {
		// INCR is atomic on the server.
		let mut conn = self.connection().await?;
		conn.incr::<_, _, u64>(key, 1u64)
			.await
			.map_err(map_redis_error)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(RedisStorageSchema)
	}

	async fn health_check(&self) -> Result<(), StorageError> {
		let mut conn = self.connect().await?;
		redis::cmd("PING")
			.query_async::<_, String>(&mut conn)
			.await
			.map(|_| ())
			.map_err(map_redis_error)
	}
}

/// Configuration schema for RedisStorage.
pub struct RedisStorageSchema;

impl ConfigSchema for RedisStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ConfigValidationError> {
		validate_config_fields(
			config,
			&[
				("host", ConfigFieldType::String),
				(
					"port",
					ConfigFieldType::Integer {
						min: Some(1),
						max: Some(u16::MAX as i64),
					},
				),
				("password", ConfigFieldType::String),
				("service_binding_env", ConfigFieldType::String),
				("service_name", ConfigFieldType::String),
				(
					"connect_timeout_ms",
					ConfigFieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
			],
		)
	}
}

/// Factory function to create a Redis storage backend from configuration.
///
/// Configuration parameters:
/// - `host`, `port`, `password`: explicit endpoint (port defaults to 6379)
/// - `service_binding_env`: variable holding the service binding (default: "VCAP_SERVICES")
/// - `service_name`: entry to read from the binding (default: "rediscloud")
/// - `connect_timeout_ms`: bound on each connection attempt (default: 2000)
///
/// No connection is made here; call `health_check` to probe the endpoints.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	RedisStorageSchema.validate(config)?;

	let binding_env = config
		.get("service_binding_env")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_BINDING_ENV);
	let binding = std::env::var(binding_env).ok();
	if binding.is_some() {
		tracing::info!("Using service binding from {}", binding_env);
	}

	let candidates = discover_endpoints(config, binding.as_deref())?;
	let connect_timeout = config
		.get("connect_timeout_ms")
		.and_then(|v| v.as_integer())
		.map(|ms| ms as u64)
		.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

	Ok(Box::new(RedisStorage::new(
		candidates,
		Duration::from_millis(connect_timeout),
	)))
}

/// Registry for the Redis storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "redis";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
