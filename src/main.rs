//! route-monitor server
//!
//! Watches the configured clusters for routes and serves `/metrics`, where
//! every scrape probes all known routes.

use clap::Parser;
use route_monitor::cli::{Cli, Command, generate_config_template};
use route_monitor::cluster::{MultiWatcher, RouteLister};
use route_monitor::collector::Collector;
use route_monitor::config::Config;
use route_monitor::handlers::{self, AppState};
use route_monitor::metrics::DescriptorSet;
use route_monitor::probe::Prober;
use route_monitor::telemetry;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        return write_config_template(output.as_deref());
    }

    // Load configuration
    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            telemetry::init("info");
            tracing::error!(error = %e, "failed to load configuration");
            return Err(e.into());
        }
    };

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);
    tracing::info!(
        config = %cli.config,
        targets = config.targets.len(),
        "starting route-monitor"
    );

    let addr = config.server.socket_addr()?;

    // Cluster clients; any failure here is fatal
    let watchers = match MultiWatcher::connect(&config.targets).await {
        Ok(watchers) => Arc::new(watchers),
        Err(e) => {
            tracing::error!(error = %e, "failed to set up cluster watches");
            return Err(e.into());
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watch_handle = tokio::spawn({
        let watchers = Arc::clone(&watchers);
        async move { watchers.watch(shutdown_rx).await }
    });

    let routes: Arc<dyn RouteLister> = watchers;
    let collector = Collector::new(
        Arc::clone(&routes),
        Prober::new()?,
        Arc::new(DescriptorSet::route_health()?),
    );
    let app = handlers::router(AppState::new(collector, routes));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "serving metrics at http://{}/metrics", addr);

    // Dropping the sender on a server error stops the watchers as well
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await;

    if let Err(e) = watch_handle.await {
        tracing::error!(error = %e, "route watchers failed to stop cleanly");
    }

    if let Err(e) = served {
        tracing::error!(error = %e, "metrics server failed");
        return Err(e.into());
    }

    tracing::info!("route-monitor stopped");
    Ok(())
}

fn write_config_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Configuration template written to {path}");
        }
        None => print!("{template}"),
    }
    Ok(())
}

/// Resolves on SIGINT, SIGTERM or SIGQUIT
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = quit.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM/SIGQUIT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
