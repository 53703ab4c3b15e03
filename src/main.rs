use anyhow::Result;
use idburst::batch::{BatchRunner, BatchSettings};
use idburst::config::Config;
use idburst::issuer::{HttpTransport, RequestIssuer, Target};
use idburst::pool::IdPool;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "idburst.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .init();

    info!("Starting idburst");

    let target = Target::from_config(&config.target)?;
    let mut rng = match config.batch.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let pool = Arc::new(IdPool::generate(config.pool.size, &mut rng));
    info!("Generated {} ids", pool.len());
    debug!(
        "Generated ids: {}",
        pool.ids()
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let settings = BatchSettings::from_config(&config.batch);
    info!(
        "Sending batches of {} requests ({} in flight max) to {} every {:?}",
        settings.size,
        settings.max_in_flight,
        target.endpoint(),
        settings.interval
    );

    let issuer = RequestIssuer::new(HttpTransport::new(), target);
    let mut runner = BatchRunner::new(pool, issuer, settings, rng);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let summary = runner.run(shutdown).await;
    info!(
        "Stopped after {} batches: {} succeeded, {} failed, {} processed",
        summary.batches,
        summary.tally.successes,
        summary.tally.failures,
        summary.tally.total()
    );
    Ok(())
}

fn load_config() -> Result<Config> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::from_file(DEFAULT_CONFIG_PATH)?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };
    Ok(config)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }

    info!("Shutdown signal received, finishing the current batch...");
    shutdown.cancel();
}
