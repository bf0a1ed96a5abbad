use lib_feed::{RemoteApi, StatusEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::feed_logic::state::AppState;

/// Runs the feed until shutdown, logging its status changes and budget.
pub async fn run<P: RemoteApi>(app_state: AppState<P>, mut shutdown: broadcast::Receiver<()>) {
    let feed = app_state.feed.clone();
    let mut events = feed.status_events();
    let mut telemetry = feed.telemetry();
    feed.start();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Upstream shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(StatusEvent::ConfigError(text)) if !text.is_empty() => {
                    log::warn!("Feed configuration error: {}", text);
                }
                Ok(StatusEvent::CoolingRemaining(0)) => log::info!("Feed cooling finished."),
                Ok(StatusEvent::CoolingRemaining(_)) => {}
                Ok(event) => log::info!("Feed status {:?} -> {}", event, feed.status_label()),
                Err(RecvError::Lagged(missed)) => log::debug!("Status log skipped {} events", missed),
                Err(RecvError::Closed) => break,
            },
            snapshot = telemetry.recv() => match snapshot {
                Ok(t) => log::debug!(
                    "Budget {}/{} per {} s, next request in ~{:.0} ms (N={})",
                    t.used_weight, t.weight_limit, t.interval_seconds, t.estimated_inter_request_ms, t.divider
                ),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    feed.shutdown().await;
}
