use anyhow::Context;
use keyholder::{
    api::start_api_server,
    config::ObservabilityConfig,
    observability::{init_observability, log_config_info},
    sidecar::{build_election, build_fetcher, build_store, Sidecar},
    Config, APP_NAME, VERSION,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    // This must happen before any config is read from environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet; use defaults so the failure is visible.
            let _ = init_observability(&ObservabilityConfig::default());
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    init_observability(&config.observability).context("initializing observability")?;
    info!(app_name = APP_NAME, version = VERSION, "Starting keyholder sidecar");
    log_config_info(&config);

    let fetcher = build_fetcher(&config.publisher)?;
    let store = build_store(&config.publisher).await?;
    let mut sidecar = Sidecar::start(&config, fetcher, store).context("starting sidecar")?;
    match build_election(&config.leadership).await {
        Ok(Some(election)) => sidecar.attach_lease(election),
        Ok(None) => {}
        Err(e) => {
            sidecar.shutdown().await?;
            return Err(anyhow::Error::from(e).context("joining lease election"));
        }
    }

    let shutdown = CancellationToken::new();
    let api_shutdown = shutdown.clone();
    let mut api = tokio::spawn(start_api_server(config.api.clone(), sidecar.api_state(), async move {
        api_shutdown.cancelled().await
    }));

    let api_failed = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            false
        }
        joined = &mut api => {
            if let Err(e) = api_result(joined) {
                error!(error = %e, "HTTP API server exited");
            }
            true
        }
    };

    shutdown.cancel();
    if !api_failed {
        if let Err(e) = api_result(api.await) {
            error!(error = %e, "HTTP API server did not shut down cleanly");
        }
    }
    sidecar.shutdown().await?;

    if api_failed {
        anyhow::bail!("HTTP API server exited unexpectedly");
    }
    info!("keyholder stopped");
    Ok(())
}

fn api_result(
    joined: Result<keyholder::Result<()>, tokio::task::JoinError>,
) -> anyhow::Result<()> {
    joined.context("API server task panicked")?.map_err(Into::into)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
