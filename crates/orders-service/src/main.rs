//! Main entry point for the orders service.
//!
//! Loads configuration, builds the order store on the configured storage
//! backend and serves the orders REST API until interrupted.

use clap::Parser;
use orders_config::Config;
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod factory_registry;
mod server;

/// Command-line arguments for the orders service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, env = "ORDERS_CONFIG", default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the orders service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the order store, failing if the backend is unreachable
/// 5. Serves the API until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started orders service");

	let config_path = args
		.config
		.to_str()
		.ok_or_else(|| format!("Config path is not valid UTF-8: {}", args.config.display()))?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let store = match factory_registry::build_order_store(config.clone()).await {
		Ok(store) => Arc::new(store),
		Err(e) => {
			tracing::error!("Failed to initialize order store: {}", e);
			return Err(e.into());
		},
	};

	let api_config = config.api_or_default();
	if api_config.enabled {
		server::start_server(api_config, store, config).await?;
	} else {
		tracing::warn!("API server disabled in configuration, nothing to serve");
	}

	tracing::info!("Stopped orders service");
	Ok(())
}
