// Corridor Server entrypoint
//!
//! The heavy lifting (initialization, HTTP wiring, graceful shutdown)
//! lives in dedicated modules so this file remains a thin orchestrator.

mod lifecycle;
mod logging;

use anyhow::Result;
use corridor_server::ServerConfig;
use lifecycle::{bootstrap, run};
use log::info;

#[actix_web::main]
async fn main() -> Result<()> {
    // Load configuration (fallback to defaults when config file missing)
    let config = match ServerConfig::from_file("config.toml") {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Warning: Failed to load config.toml: {}", e);
            eprintln!("Using defaults");
            ServerConfig::default()
        }
    };

    // Logging before any other side effects
    logging::init_logging(
        &config.logging.level,
        &config.logging.file_path,
        config.logging.log_to_console,
    )?;

    let version = env!("CARGO_PKG_VERSION");
    info!("Corridor Server v{}", version);
    info!("  Data dir:  {}", config.data_dir);
    info!(
        "  Cluster:   {}",
        match &config.cluster {
            Some(c) if c.on => format!(
                "on (peer {}, {} slots, {} replicas)",
                c.peer_id, c.slot_count, c.replica_count
            ),
            _ => "off (standalone)".to_string(),
        }
    );

    // Build application state and kick off background services
    let server = bootstrap(&config).await?;

    // Run HTTP server until termination signal is received
    run(&config, server).await
}
