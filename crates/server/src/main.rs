use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{oneshot, watch};
use tracing_subscriber::EnvFilter;

use turnstile_core::{config, Clock, MemoryStore};
use turnstile_server::api::handlers::AppState;
use turnstile_server::api::{create_router, metrics};
use turnstile_server::cluster::resolve_peers;
use turnstile_server::replication::ReplicatedStore;

#[derive(Parser)]
#[command(name = "turnstile", about = "Distributed rate-limiting side-car")]
struct Args {
    /// HTTP API bind address
    #[arg(long, default_value = config::DEFAULT_API_ADDR)]
    listen: SocketAddr,

    /// UDP replication bind address
    #[arg(long, default_value = config::DEFAULT_CLUSTER_ADDR)]
    cluster_listen: SocketAddr,

    /// Replication address of another cluster member (repeatable; addresses
    /// of this node are filtered out)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Graceful shutdown budget for in-flight requests
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    shutdown_timeout: Duration,

    /// Constant offset added to every clock reading. Only useful for
    /// validating behaviour under unsynchronized clocks; leave unset.
    #[arg(long, value_parser = humantime::parse_duration)]
    clock_offset: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(
                    "turnstile_server=info"
                        .parse()
                        .expect("valid directive literal"),
                )
                .add_directive(
                    "turnstile_core=info"
                        .parse()
                        .expect("valid directive literal"),
                ),
        )
        .init();

    let args = Args::parse();

    let prometheus_handle =
        metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let socket = Arc::new(UdpSocket::bind(args.cluster_listen).await?);
    let cluster_addr = socket.local_addr()?;
    let peers = resolve_peers(&args.peers, cluster_addr)?;

    let clock = match args.clock_offset {
        Some(offset) => {
            tracing::warn!(offset = %humantime::format_duration(offset), "clock offset enabled — testing only");
            Clock::with_offset(offset)
        }
        None => Clock::system(),
    };

    let store = ReplicatedStore::new(MemoryStore::new(clock), socket, peers.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fatal_tx, fatal_rx) = oneshot::channel::<()>();

    // Replication receiver: a fatal socket error takes the process down the
    // same graceful path as a termination signal.
    let receiver = {
        let store = store.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = store.run(shutdown_rx).await {
                tracing::error!("replication receiver failed: {}", e);
                let _ = fatal_tx.send(());
            }
        })
    };

    // Periodic store gauges.
    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                config::METRICS_REFRESH_INTERVAL_SECS,
            ));
            loop {
                interval.tick().await;
                metrics::update_store_metrics(store.local());
            }
        });
    }

    let state = AppState {
        store,
        clock,
        prometheus_handle,
        start_time: Instant::now(),
    };
    let app = create_router(state);

    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        cluster_listen = %cluster_addr,
        peers = peers.len(),
        "turnstile ready"
    );

    let shutdown_timeout = args.shutdown_timeout;
    let shutdown = async move {
        tokio::select! {
            _ = wait_for_signal() => {}
            _ = fatal_rx => tracing::error!("replication socket failed, shutting down"),
        }
        // Draining must not outlive its budget.
        tokio::spawn(async move {
            tokio::time::sleep(shutdown_timeout).await;
            tracing::error!(
                "graceful shutdown exceeded {} — exiting",
                humantime::format_duration(shutdown_timeout)
            );
            std::process::exit(1);
        });
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(
        Duration::from_secs(config::REPLICATION_READ_TIMEOUT_SECS),
        receiver,
    )
    .await;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}
