//! Waypoint Coordinator Server
//!
//! Runs the barrier monitor and the health/metrics endpoint on top of the
//! in-memory stores.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use waypoint_coordinator::memory::MemoryBackend;
use waypoint_coordinator::{http, BarrierMonitor, BarrierService, Config, SystemClock};

/// Waypoint execution coordinator.
#[derive(Parser, Debug)]
#[command(name = "waypoint-coordinator", about = "Delegate assignment and barrier coordinator")]
struct Args {
    /// HTTP server address (health and metrics)
    #[arg(long, default_value = "[::1]:50080")]
    http_addr: String,

    /// Seconds between barrier monitor scans
    #[arg(long, default_value = "60")]
    monitor_interval_secs: u64,

    /// Concurrent barrier updates per scan
    #[arg(long, default_value = "2")]
    monitor_workers: usize,

    /// This instance's partition index
    #[arg(long, default_value = "0")]
    partition_index: u32,

    /// Number of coordinator instances sharing the barrier work
    #[arg(long, default_value = "1")]
    partition_count: u32,

    /// Hours a validated connection result keeps a delegate whitelisted
    #[arg(long, default_value = "6")]
    whitelist_ttl_hours: i64,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            http_bind_addr: self.http_addr,
            barrier_monitor_interval: Duration::from_secs(self.monitor_interval_secs),
            barrier_monitor_workers: self.monitor_workers,
            partition_index: self.partition_index,
            partition_count: self.partition_count,
            whitelist_ttl: chrono::Duration::hours(self.whitelist_ttl_hours),
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("waypoint=info".parse()?))
        .init();

    let config = Args::parse().into_config();
    let http_addr: SocketAddr = config.http_bind_addr.parse()?;

    let backend = MemoryBackend::default();
    let state = backend.state(config, Arc::new(SystemClock));

    let service = Arc::new(BarrierService::new(state.clone()));
    let monitor = Arc::new(BarrierMonitor::new(state.clone(), service));

    let shutdown = CancellationToken::new();
    let monitor_handle = monitor.spawn(shutdown.clone());

    let listener = TcpListener::bind(http_addr).await?;
    info!(http_addr = %http_addr, "Waypoint coordinator listening");

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, http::create_router(state))
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    shutdown.cancel();
    monitor_handle.await?;
    Ok(())
}
