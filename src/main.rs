#![cfg(not(tarpaulin_include))]

use recorder::{AppConfig, app};
use std::env;
use std::path::PathBuf;

/// Main entry point for the product recorder web application
///
/// Reads an optional TOML configuration file path from the first command-line
/// argument, applies `RECORDER_*` environment overrides and serves the UI.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref())?;
    log::info!(
        "Starting product recorder ({:?} schema, totals row {})",
        config.schema,
        if config.totals_row { "on" } else { "off" }
    );

    app::run(config).await
}
