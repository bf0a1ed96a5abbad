use anyhow::Result;
use lib_feed::FeedManager;
use lib_feed::markets::binance::BinanceApi;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

mod feed_logic;
use feed_logic::{config, downstream, logger, state, upstream};

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up FEED_* variables from a local .env before clap reads the environment
    let _ = dotenvy::dotenv();

    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    logger::setup_logging(&log_dir, config.log_level.as_deref().unwrap_or("info"))?;

    let settings = config.governor_settings();
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| lib_feed::markets::binance::apicall::DEFAULT_BASE_URL.to_string());
    let api = BinanceApi::new(&base_url, Duration::from_millis(settings.call_timeout_ms))?;
    let feed = FeedManager::new(api, settings)?;
    log::info!("Feed configured against {}", base_url);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new(feed);

    let upstream_handle = tokio::spawn(upstream::run(app_state.clone(), shutdown_tx.subscribe()));

    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let (upstream_result, downstream_result) = tokio::join!(upstream_handle, downstream_handle);
    if let Err(e) = upstream_result {
        log::error!("Upstream task failed: {}", e);
    }
    match downstream_result {
        Ok(Err(e)) => log::error!("Downstream server failed: {}", e),
        Err(e) => log::error!("Downstream task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete.");
    Ok(())
}
