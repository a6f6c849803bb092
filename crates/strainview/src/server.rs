use std::net::SocketAddr;

use anyhow::{Context, Result};
use strainview_service::config::Config;
use strainview_service::metric;

use crate::endpoints;
use crate::service::RequestService;

/// Starts the HTTP server based on the loaded config.
pub fn run(config: Config) -> Result<()> {
    // Logged before the service is created, so restarts show up even if creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("strainview-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let service = web_pool
        .block_on(async { RequestService::create(&config) })
        .context("failed to create HTTP service state")?;

    let socket = config.bind.parse::<SocketAddr>()?;
    tracing::info!("Starting HTTP server on {}", socket);
    web_pool.block_on(
        axum_server::bind(socket).serve(endpoints::create_app(service).into_make_service()),
    )?;
    tracing::info!("System shutdown complete");

    Ok(())
}
