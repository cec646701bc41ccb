//! multidb-pool - Main entry point.
//!
//! Runs one statement against the configured backend through the pooled query
//! service and prints the outcome as JSON.

use clap::Parser;
use multidb_pool::config::Config;
use multidb_pool::{DbResult, FactoryRegistry, QueryService};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only the JSON result.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config, service: &QueryService) -> DbResult<serde_json::Value> {
    let backend = config.backend_config()?;
    let params = config.query_params();

    info!(
        target_db = %backend.describe(),
        params = params.len(),
        "Running statement"
    );

    let outcome = service
        .execute(&backend.kind, &backend, &config.sql, &params)
        .await?;
    Ok(outcome.into_json())
}

#[tokio::main]
async fn main() {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    info!("Starting multidb-pool v{}", env!("CARGO_PKG_VERSION"));

    let service = QueryService::new(
        FactoryRegistry::with_default_backends(),
        config.service_options(),
    );

    let result = run(&config, &service).await;
    service.shutdown().await;

    match result {
        Ok(value) => println!("{}", value),
        Err(e) => {
            error!(error = %e, "Statement failed");
            println!("{}", serde_json::json!(e.to_body()));
            std::process::exit(1);
        }
    }
}
