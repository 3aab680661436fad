//! Server lifecycle management helpers.
//!
//! Encapsulates the heavy lifting so `main.rs` stays a thin orchestrator:
//! building the core from configuration, wiring the HTTP server, and
//! coordinating graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Service as _;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use corridor_core::{Context, CoreOptions, CorridorServer};
use corridor_store::{MemoryBackend, RocksBackend, StorageBackend};
use futures_util::future::{ready, Either};
use log::info;

use crate::ServerConfig;

/// Builds storage and the core component graph, then starts the core
/// (cluster transport included when configured).
pub async fn bootstrap(config: &ServerConfig) -> Result<Arc<CorridorServer>> {
    std::fs::create_dir_all(&config.data_dir)?;

    let backend: Arc<dyn StorageBackend> = match config.storage.kind.as_str() {
        "memory" => Arc::new(MemoryBackend::new()),
        _ => {
            let path = config.storage_path();
            std::fs::create_dir_all(&path)?;
            let backend = RocksBackend::open(&path)?;
            info!("RocksDB initialized at {}", path);
            Arc::new(backend)
        }
    };

    let opts = CoreOptions {
        data_dir: config.data_dir.clone().into(),
        handle_pool_size: config.handle_pool_size,
        timing_wheel_tick: Duration::from_millis(config.timing_wheel.tick_ms),
        timing_wheel_size: config.timing_wheel.size,
        api_url: config.api_url(),
        rpc_timeout: Duration::from_secs(5),
        cluster: config.cluster.clone(),
    };

    let server = CorridorServer::new(opts, backend)?;
    server.start().await?;
    Ok(server)
}

/// Runs the HTTP server until a termination signal, then drains the core.
pub async fn run(config: &ServerConfig, server: Arc<CorridorServer>) -> Result<()> {
    let context = server.context().clone();
    let bind_addr = (config.server.host.clone(), config.server.port);

    info!(
        "HTTP API listening on http://{}:{}",
        config.server.host, config.server.port
    );

    let app_context = context.clone();
    let mut http = HttpServer::new(move || {
        let guard_ctx: Arc<Context> = app_context.clone();
        App::new()
            .app_data(web::Data::new(app_context.clone()))
            .wrap_fn(move |req, srv| {
                // Global IP blocklist, enforced before any handler runs.
                let blocked = req
                    .peer_addr()
                    .map(|addr| !guard_ctx.ip_guard.allow(&addr.ip().to_string()))
                    .unwrap_or(false);
                if blocked {
                    Either::Left(ready(Err(actix_web::error::ErrorForbidden(
                        "address is blocked",
                    ))))
                } else {
                    Either::Right(srv.call(req))
                }
            })
            .configure(corridor_api::configure)
    });
    if config.server.workers > 0 {
        http = http.workers(config.server.workers);
    }

    http.bind(bind_addr)?.run().await?;

    info!("HTTP server stopped, draining core...");
    server.stop().await;
    Ok(())
}
