use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use gridlane::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use gridlane::tenant::TenantManager;
use gridlane::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

struct Config {
    bind: String,
    port: String,
    data_dir: String,
    password: String,
    max_connections: usize,
    compact_threshold: u64,
    metrics_port: Option<u16>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    fn from_env() -> Self {
        Self {
            bind: env_or("GRIDLANE_BIND", "0.0.0.0"),
            port: env_or("GRIDLANE_PORT", "5433"),
            data_dir: env_or("GRIDLANE_DATA_DIR", "./data"),
            password: env_or("GRIDLANE_PASSWORD", "gridlane"),
            max_connections: env_parsed("GRIDLANE_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: env_parsed("GRIDLANE_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: env_parsed("GRIDLANE_METRICS_PORT"),
            tls_cert: std::env::var("GRIDLANE_TLS_CERT").ok(),
            tls_key: std::env::var("GRIDLANE_TLS_KEY").ok(),
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Wait until every connection permit is back, or the timeout passes.
async fn drain(semaphore: &Semaphore, max_connections: usize) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while semaphore.available_permits() < max_connections {
        if tokio::time::Instant::now() >= deadline {
            let open = max_connections - semaphore.available_permits();
            warn!("drain timeout, {open} connections still open");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!("all connections drained");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    gridlane::observability::init(config.metrics_port)?;
    let tls_acceptor =
        gridlane::tls::load_tls_acceptor(config.tls_cert.as_deref(), config.tls_key.as_deref())?;

    std::fs::create_dir_all(&config.data_dir)?;
    let tenant_manager = Arc::new(TenantManager::new(
        PathBuf::from(&config.data_dir),
        config.compact_threshold,
    ));
    let semaphore = Arc::new(Semaphore::new(config.max_connections));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        data_dir = %config.data_dir,
        max_connections = config.max_connections,
        tls = tls_acceptor.is_some(),
        "gridlane listening on {addr}"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown signal received, no longer accepting");
                break;
            }
        };

        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            warn!("connection limit reached, rejecting {peer}");
            metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!("connection from {peer}");
        metrics::counter!(CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        let tm = tenant_manager.clone();
        let password = config.password.clone();
        let tls = tls_acceptor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = wire::process_connection(socket, tm, password, tls).await {
                tracing::error!("connection error from {peer}: {e}");
            }
            metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        });
    }

    drain(&semaphore, config.max_connections).await;
    info!("gridlane stopped");
    Ok(())
}
