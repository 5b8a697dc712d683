//! `previewkit dev` command implementation.
//!
//! Binds the HTTP server first, then starts the watcher and mounts its
//! middleware on the running router:
//!
//! ```text
//! GET /__progress   websocket, compile progress
//! GET /__hmr        websocket, rebuild notifications
//! GET /<public>/*   emitted assets
//! ```
//!
//! Ctrl+C stops the watcher through `bail` and shuts the server down.

use super::{load_presets, CompilerSpec};
use miette::{IntoDiagnostic, Result};
use previewkit_core::stats::aggregate;
use previewkit_core::{BuildError, BuildOptions, Config, Orchestrator, PreviewRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub config: Config,
    pub compiler: CompilerSpec,
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Bail if the first compile takes longer than this.
    pub timeout: Option<Duration>,
}

pub async fn run(action: DevAction) -> Result<()> {
    let presets = load_presets(&action.config)?;
    let orchestrator = Orchestrator::new(Arc::new(action.compiler.compiler(&action.config)));
    let router = PreviewRouter::new();

    // Start server
    let host_ip = if action.host == "localhost" {
        "127.0.0.1"
    } else {
        action.host.as_str()
    };
    let addr: SocketAddr = format!("{host_ip}:{}", action.port)
        .parse()
        .into_diagnostic()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    // The manager UI subscribes to progress from another origin.
    let app = router.clone().into_service().layer(CorsLayer::permissive());
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    println!();
    println!("  Preview server running at http://{}:{}", action.host, action.port);
    println!("  Press Ctrl+C to stop");
    println!();

    let options = BuildOptions::new(presets)
        .with_router(Arc::new(router))
        .with_debug(action.config.debug_bundler);

    let start = async {
        match action.timeout {
            Some(timeout) => orchestrator.start_within(options, timeout).await,
            None => orchestrator.start(options).await,
        }
    };
    tokio::pin!(start);

    let first = tokio::select! {
        result = &mut start => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match first {
        Some(result) => result,
        None => {
            orchestrator.bail().await;
            start.await
        }
    };

    let cancel = match result {
        Ok(outcome) => {
            info!(
                elapsed_ms = outcome.total_time.as_millis(),
                "=> Preview started"
            );
            Some(outcome.cancel)
        }
        Err(e) if e.is_cancellation() => {
            server.abort();
            return Ok(());
        }
        Err(BuildError::Diagnostics(stats)) => {
            // The watcher keeps running and recompiles on the next change.
            for message in aggregate(stats.as_ref(), None).errors {
                error!("{message}");
            }
            None
        }
        Err(e) => {
            orchestrator.bail().await;
            server.abort();
            return Err(e).into_diagnostic();
        }
    };

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    match cancel {
        Some(cancel) => cancel.cancel().await,
        None => orchestrator.bail().await,
    }
    server.abort();
    Ok(())
}
