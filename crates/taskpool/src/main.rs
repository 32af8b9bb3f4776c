use clap::Parser;
use taskpool::{
    WorkerPool,
    config::{CliArgs, DriverConfig},
    driver,
    telemetry::init_telemetry,
};
use tokio::{io::AsyncRead, signal};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DriverConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let input: Box<dyn AsyncRead + Unpin + Send> = match &config.input {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };

    let pool = WorkerPool::start(config.pool.clone()).await?;
    let res = driver::run(
        &pool,
        input,
        tokio::io::stdout(),
        config.stats_interval,
        shutdown_signal(),
    )
    .await;

    match &res {
        Ok(_summary) => {
            #[cfg(feature = "tracing")]
            tracing::info!(
                "Driver finished: {} accepted, {} rejected, {} succeeded, {} failed",
                _summary.accepted,
                _summary.rejected,
                _summary.succeeded,
                _summary.failed
            );
        }
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("Driver failed: {_e:#}");
            // The driver bails before shutting the pool down on I/O errors.
            if let Err(_e) = pool.shutdown().await {
                #[cfg(feature = "tracing")]
                tracing::error!("Error during pool shutdown: {_e}");
            }
        }
    }

    providers.shutdown();
    res.map(|_| ())
}

fn log_startup_info(_config: &DriverConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting task pool with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting task pool with {} units, reading from {}",
            _config.pool.num_units,
            _config
                .input
                .as_ref()
                .map_or_else(|| "stdin".to_owned(), |path| path.display().to_string())
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// fires; EOF still ends the run.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
