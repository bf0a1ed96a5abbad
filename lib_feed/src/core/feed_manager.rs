//! # Feed Manager
//!
//! The host-facing coordinator. It owns the two timing sources and the
//! engine they drive:
//!
//! - **Heartbeat**: sleeps for the base period, then runs one governor tick to
//!   completion before sleeping again, so the real spacing between requests is
//!   `N·P` plus the time the work took.
//! - **Cooling countdown**: started when the circuit breaker opens, counts the
//!   pause down once per second and exits at zero.
//!
//! Subscription changes and governor ticks share one async mutex, so a tick
//! never observes a half-applied registry change and a change waits for the
//! tick in flight. Shutdown cancels a token, awaits both tasks and then
//! releases the provider.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::configs::feed_settings::GovernorSettings;
use crate::core::dispatcher::{Dispatcher, ValueFrame};
use crate::core::governor::{Governor, Telemetry, TickOutcome};
use crate::core::model::{FeedValue, ResourceKey, SubscriptionId};
use crate::core::registry::SubscriptionTable;
use crate::core::status::{BudgetStatus, StatusEvent, StatusLabel};
use crate::error::{FeedError, FeedResult};
use crate::markets::provider::RemoteApi;

const TELEMETRY_CAPACITY: usize = 16;
const COOLING_STEP: Duration = Duration::from_secs(1);

/// State touched by a tick, guarded as one unit.
struct Engine<P> {
    governor: Governor,
    table: SubscriptionTable,
    provider: Option<Arc<P>>,
}

struct Inner<P> {
    engine: Mutex<Engine<P>>,
    status: Arc<BudgetStatus>,
    dispatcher: Dispatcher,
    telemetry: broadcast::Sender<Telemetry>,
    cancel: CancellationToken,
    heartbeat_period: Duration,
    heartbeat_task: StdMutex<Option<JoinHandle<()>>>,
    cooling_task: StdMutex<Option<JoinHandle<()>>>,
}

fn guard<T>(lock: &StdMutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Weight-governed feed over one provider. Cheap to clone.
pub struct FeedManager<P: RemoteApi> {
    inner: Arc<Inner<P>>,
}

impl<P: RemoteApi> Clone for FeedManager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: RemoteApi> FeedManager<P> {
    /// Builds a stopped feed. Call [`FeedManager::start`] to run the heartbeat.
    ///
    /// # Errors
    /// `InvalidArgument` if the settings do not validate.
    pub fn new(provider: P, settings: GovernorSettings) -> FeedResult<Self> {
        let heartbeat_period = Duration::from_millis(settings.heartbeat_ms);
        let governor = Governor::new(settings)?;
        let (telemetry, _) = broadcast::channel(TELEMETRY_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                engine: Mutex::new(Engine {
                    governor,
                    table: SubscriptionTable::new(),
                    provider: Some(Arc::new(provider)),
                }),
                status: Arc::new(BudgetStatus::new()),
                dispatcher: Dispatcher::new(),
                telemetry,
                cancel: CancellationToken::new(),
                heartbeat_period,
                heartbeat_task: StdMutex::new(None),
                cooling_task: StdMutex::new(None),
            }),
        })
    }

    /// Spawns the heartbeat. Calling it again, or after shutdown, does nothing.
    pub fn start(&self) {
        if self.inner.cancel.is_cancelled() {
            log::warn!("Feed manager already shut down; not starting.");
            return;
        }
        let mut slot = guard(&self.inner.heartbeat_task);
        if slot.is_some() {
            log::debug!("Heartbeat already running.");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(async move { inner.heartbeat().await }));
        log::info!("Feed heartbeat started ({} ms).", self.inner.heartbeat_period.as_millis());
    }

    /// Stops both timers, waits for them to finish and releases the provider.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let heartbeat = guard(&self.inner.heartbeat_task).take();
        let cooling = guard(&self.inner.cooling_task).take();
        for handle in [heartbeat, cooling].into_iter().flatten() {
            if let Err(err) = handle.await {
                log::error!("Feed task ended abnormally: {}", err);
            }
        }
        self.inner.engine.lock().await.provider = None;
        log::info!("Feed manager shut down.");
    }

    /// Runs one heartbeat tick now, outside the timer.
    pub async fn poll_once(&self) {
        self.inner.run_tick().await;
    }

    // --- Host API ---

    /// Registers a host subscription. Safe before the feed is configured.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty key or an id that is already registered.
    pub async fn on_subscription_created(&self, id: SubscriptionId, key: ResourceKey) -> FeedResult<StatusLabel> {
        if key.instrument.is_empty() || key.metric.is_empty() {
            return Err(FeedError::InvalidArgument(format!("incomplete resource key '{}'", key)));
        }
        let mut engine = self.inner.engine.lock().await;
        let attach = engine.table.attach(id, key.clone())?;
        self.inner.status.set_has_subscriptions(true);
        log::info!(
            "{} subscribed to {} ({}{})",
            id,
            key,
            attach.topic,
            if attach.new_topic { ", new" } else { "" }
        );
        Ok(self.inner.status.label())
    }

    /// Unregisters a host subscription. Removing the last one returns the feed
    /// to idle and clears what the governor learned.
    ///
    /// # Errors
    /// `NotFound` if the id is not registered.
    pub async fn on_subscription_destroyed(&self, id: SubscriptionId) -> FeedResult<()> {
        let mut engine = self.inner.engine.lock().await;
        let detach = engine.table.detach(id)?;
        self.inner.dispatcher.forget(id);
        log::info!("{} unsubscribed from {}", id, detach.key);

        if engine.table.is_empty() {
            self.inner.status.reset_for_idle();
            engine.governor.reset();
            log::info!("Last subscription removed; feed is idle.");
        }
        Ok(())
    }

    /// Flips the user on/off switch. Returns the new position.
    pub fn on_user_toggle(&self) -> bool {
        let enabled = self.inner.status.toggle_user_enabled();
        log::info!("Feed switched {} by user.", if enabled { "on" } else { "off" });
        enabled
    }

    /// Registers a listener for value frames.
    pub fn listen(&self, listener_id: &str) -> mpsc::UnboundedReceiver<Arc<ValueFrame>> {
        self.inner.dispatcher.add_listener(listener_id)
    }

    /// Removes a listener.
    pub fn remove_listener(&self, listener_id: &str) {
        self.inner.dispatcher.remove_listener(listener_id);
    }

    /// Last value delivered to a subscription.
    pub fn latest_value(&self, id: SubscriptionId) -> Option<FeedValue> {
        self.inner.dispatcher.latest(id)
    }

    /// Telemetry published after each delivered cycle.
    pub fn telemetry(&self) -> broadcast::Receiver<Telemetry> {
        self.inner.telemetry.subscribe()
    }

    /// Current budget snapshot.
    pub async fn telemetry_snapshot(&self) -> Telemetry {
        self.inner.engine.lock().await.governor.telemetry()
    }

    /// Status field change events.
    pub fn status_events(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.status.subscribe()
    }

    /// Current status label.
    pub fn status_label(&self) -> StatusLabel {
        self.inner.status.label()
    }

    /// Shared status state.
    pub fn status(&self) -> Arc<BudgetStatus> {
        Arc::clone(&self.inner.status)
    }

    /// Number of registered subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.inner.engine.lock().await.table.subscription_count()
    }
}

impl<P: RemoteApi> Inner<P> {
    async fn heartbeat(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.heartbeat_period) => {}
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.run_tick() => {}
            }
        }
        log::debug!("Heartbeat stopped.");
    }

    async fn run_tick(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut engine = self.engine.lock().await;
        let Some(provider) = engine.provider.clone() else {
            return;
        };
        let topics = engine.table.topics();
        let Engine { governor, table, .. } = &mut *engine;

        match governor.tick(provider.as_ref(), &self.status, &topics).await {
            TickOutcome::Skipped { status_refresh: Some(label) } => {
                let text = FeedValue::Status(label.to_string());
                let values = table.subscription_ids().map(|id| (id, text.clone())).collect();
                self.dispatcher.broadcast(0, values);
            }
            TickOutcome::Skipped { status_refresh: None } | TickOutcome::NotConfigured(_) => {}
            TickOutcome::CoolingTriggered => self.spawn_cooling(),
            TickOutcome::Completed { cycle, values, telemetry } => {
                let mut frame = Vec::new();
                for (topic, value) in values {
                    for id in table.subscribers_of(topic) {
                        frame.push((id, value.clone()));
                    }
                }
                self.dispatcher.broadcast(cycle, frame);
                // Nobody listening is fine.
                let _ = self.telemetry.send(telemetry);
            }
        }
    }

    /// Starts a fresh countdown, aborting any previous one.
    fn spawn_cooling(&self) {
        let mut slot = guard(&self.cooling_task);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let status = Arc::clone(&self.status);
        let cancel = self.cancel.clone();
        *slot = Some(tokio::spawn(cooling_countdown(status, cancel)));
    }
}

async fn cooling_countdown(status: Arc<BudgetStatus>, cancel: CancellationToken) {
    log::info!("Cooling for {} s.", status.cooling_remaining());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(COOLING_STEP) => {}
        }
        if status.tick_cooling() == 0 {
            break;
        }
    }
    log::info!("Cooling finished; polling resumes.");
}
