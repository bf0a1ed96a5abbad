//! # Governor
//!
//! The per-tick control algorithm. A fixed heartbeat drives [`Governor::tick`];
//! a cyclical [`StepCounter`] divides it down so only one tick in `N` does
//! any remote work. `N` is steered from the provider's used-weight signal:
//!
//! - **Feedback**: the weight consumed by the last cycle, extrapolated over the
//!   policy interval, is compared with `target_fraction` of the limit to pick
//!   the cadence that would just meet the target.
//! - **Damping**: once used weight crosses the damping trigger, `N` is
//!   doubled and multiplied by the escalation level.
//! - **Circuit breaker**: if the next request could overrun the limit the
//!   cycle is abandoned and the feed cools down for a full policy interval.
//!
//! A disconnect throws the controller memory away and restarts from the
//! initial divider.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{timeout, Instant};

use crate::configs::feed_settings::GovernorSettings;
use crate::core::batching::{plan_requests, CategoryPlan, RequestShape};
use crate::core::model::{Category, FeedValue, Placeholder, ResourceKey, TopicId};
use crate::core::status::{BudgetStatus, StatusLabel};
use crate::core::step_counter::StepCounter;
use crate::core::window_average::RunningWindowAverage;
use crate::error::{FeedError, FeedResult};
use crate::markets::provider::{record_error, Record, RemoteApi, SYMBOL_FIELD};

/// Budget snapshot published after each delivered cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    /// Policy interval in seconds.
    pub interval_seconds: u64,
    /// Weight allowed per interval.
    pub weight_limit: u64,
    /// Weight used so far in the interval.
    pub used_weight: u64,
    /// `N·P` plus the estimated work time, in milliseconds.
    pub estimated_inter_request_ms: f64,
    /// Divider threshold `N` now in force.
    pub divider: u32,
}

/// What one heartbeat tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No remote work this tick. Carries the status label when it changed and
    /// the feed is not live.
    Skipped {
        /// Label to show subscribers, if it changed.
        status_refresh: Option<StatusLabel>,
    },
    /// The policy fetch failed; retried on the next activation.
    NotConfigured(String),
    /// The circuit breaker opened and the cycle was abandoned.
    CoolingTriggered,
    /// A full cycle ran.
    Completed {
        /// Sequence number of the cycle.
        cycle: u64,
        /// Resolved value for every topic, in topic order.
        values: Vec<(TopicId, FeedValue)>,
        /// Budget snapshot after the cycle.
        telemetry: Telemetry,
    },
}

/// Cadence that would consume `target_fraction` of the budget, given the
/// weight the last cycle used.
///
/// Returns `None` when the weight did not grow (nothing to learn from).
#[allow(clippy::too_many_arguments)]
pub fn suggest_threshold(
    current_weight: u64,
    previous_weight: u64,
    interval_ms: u64,
    weight_limit: u64,
    target_fraction: f64,
    work_ms: f64,
    period_ms: u64,
) -> Option<u32> {
    if current_weight <= previous_weight || weight_limit == 0 || period_ms == 0 {
        return None;
    }
    let delta = (current_weight - previous_weight) as f64;
    let spacing_ms = delta * interval_ms as f64 / (weight_limit as f64 * target_fraction);
    let ticks = ((spacing_ms - work_ms) / period_ms as f64).round();
    Some(ticks.clamp(1.0, u32::MAX as f64) as u32)
}

/// Escalates `n_base` once the used fraction exceeds the trigger.
///
/// The band between the trigger and the limit is split into `levels` steps;
/// at step `k` (from 0) the result is `n_base · 2 · (k + 1)`.
pub fn damp_threshold(n_base: u32, used_fraction: f64, trigger: f64, levels: u32) -> u32 {
    if used_fraction <= trigger || levels == 0 {
        return n_base;
    }
    let step = (1.0 - trigger) / levels as f64;
    // Tolerate rounding at exact level boundaries.
    let level = (((used_fraction - trigger) / step + 1e-9).floor() as u64).min(levels as u64);
    let damped = n_base as u64 * 2 * (level + 1);
    damped.min(u32::MAX as u64) as u32
}

/// Resolves one key against the records fetched this cycle.
fn resolve(fetched: &HashMap<Category, HashMap<String, Record>>, key: &ResourceKey) -> FeedValue {
    let Some(records) = fetched.get(&key.category()) else {
        return FeedValue::Placeholder(Placeholder::Resolving);
    };
    let Some(record) = records.get(&key.instrument) else {
        return FeedValue::Placeholder(Placeholder::NotFound);
    };
    if let Some(err) = record_error(record) {
        return FeedValue::Placeholder(Placeholder::ProviderError(err));
    }
    match record.get(&key.metric) {
        Some(value) => FeedValue::from_json(value),
        None => FeedValue::Placeholder(Placeholder::NotFound),
    }
}

/// Adaptive polling controller. Owned by the heartbeat; not shared.
#[derive(Debug)]
pub struct Governor {
    settings: GovernorSettings,
    divider: StepCounter,
    debounce: StepCounter,
    work_time: RunningWindowAverage,
    n_base: u32,
    weight_limit: u64,
    weight_interval_ms: u64,
    damping_trigger: f64,
    current_weight: u64,
    previous_weight: u64,
    breaker_trips: u64,
    cycles: u64,
    last_label: Option<StatusLabel>,
}

impl Governor {
    /// Builds an unconfigured governor.
    ///
    /// # Errors
    /// `InvalidArgument` if the settings do not validate.
    pub fn new(settings: GovernorSettings) -> FeedResult<Self> {
        settings.validate()?;
        Ok(Self {
            divider: StepCounter::new(settings.initial_divider, true)?,
            debounce: StepCounter::new(settings.debounce_threshold, false)?,
            work_time: RunningWindowAverage::new(settings.window_capacity, settings.window_min_ready)?,
            n_base: settings.initial_divider,
            weight_limit: 0,
            weight_interval_ms: 0,
            damping_trigger: 0.0,
            current_weight: 0,
            previous_weight: 0,
            breaker_trips: 0,
            cycles: 0,
            last_label: None,
            settings,
        })
    }

    /// Runs one heartbeat tick over the registered topics.
    pub async fn tick<P: RemoteApi>(
        &mut self,
        provider: &P,
        status: &BudgetStatus,
        topics: &[(TopicId, ResourceKey)],
    ) -> TickOutcome {
        self.divider.advance();
        if !self.divider.is_activated() || !status.may_poll() || topics.is_empty() {
            return TickOutcome::Skipped {
                status_refresh: self.refresh_label(status),
            };
        }

        let started = Instant::now();
        // Toggles, failures and the breaker all drop connectivity.
        let resuming = !status.is_connected();
        if !status.is_configured() {
            if let Err(err) = self.configure(provider, status).await {
                return TickOutcome::NotConfigured(err.to_string());
            }
        }

        let plans = plan_requests(topics.iter().map(|(_, key)| key), &self.settings);
        let mut fetched: HashMap<Category, HashMap<String, Record>> = HashMap::new();
        let mut cycle_connected = true;

        for (index, plan) in plans.iter().enumerate() {
            match self.fetch_category(provider, plan).await {
                Ok(records) => {
                    fetched.insert(plan.category, records);
                }
                Err(err) => {
                    log::warn!("{} fetch failed: {}", plan.category, err);
                    cycle_connected = false;
                    status.set_connected(false);
                }
            }

            let next = &plans[(index + 1) % plans.len()];
            let next_cost = self.settings.costs.get(next.category).batched;
            if self.current_weight >= self.weight_limit.saturating_sub(next_cost) {
                self.trip_breaker(status, next.category);
                return TickOutcome::CoolingTriggered;
            }
        }

        let divider = if cycle_connected {
            if resuming {
                self.forget();
            }
            self.learn(started.elapsed());
            status.set_connected(true);
            damp_threshold(
                self.n_base,
                self.current_weight as f64 / self.weight_limit as f64,
                self.damping_trigger,
                self.settings.damping_levels,
            )
        } else {
            log::info!("Cycle lost connectivity; controller restarts from divider {}", self.settings.initial_divider);
            self.forget();
            self.settings.initial_divider
        };
        self.apply_divider(divider);

        self.cycles += 1;
        let values = topics
            .iter()
            .map(|(topic, key)| (*topic, resolve(&fetched, key)))
            .collect();
        let telemetry = self.telemetry();
        log::debug!(
            "Cycle {} used {}/{} weight, next in {:.0} ms",
            self.cycles,
            self.current_weight,
            self.weight_limit,
            telemetry.estimated_inter_request_ms
        );
        self.last_label = Some(status.label());

        TickOutcome::Completed {
            cycle: self.cycles,
            values,
            telemetry,
        }
    }

    /// Clears everything learned, including the policy. Used when the last
    /// subscription goes away.
    pub fn reset(&mut self) {
        self.forget();
        self.apply_divider(self.settings.initial_divider);
        self.divider.reset();
        self.weight_limit = 0;
        self.weight_interval_ms = 0;
        self.damping_trigger = 0.0;
        self.current_weight = 0;
        self.previous_weight = 0;
        self.last_label = None;
    }

    /// Current budget snapshot.
    pub fn telemetry(&self) -> Telemetry {
        let work_ms = self.work_time.mean().unwrap_or(0.0);
        let divider = self.divider.threshold();
        Telemetry {
            interval_seconds: self.weight_interval_ms.div_ceil(1000),
            weight_limit: self.weight_limit,
            used_weight: self.current_weight,
            estimated_inter_request_ms: divider as f64 * self.settings.heartbeat_ms as f64 + work_ms,
            divider,
        }
    }

    /// Settings in force.
    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    /// Undamped divider suggestion.
    pub fn n_base(&self) -> u32 {
        self.n_base
    }

    /// Divider threshold in force.
    pub fn divider_threshold(&self) -> u32 {
        self.divider.threshold()
    }

    /// Last used weight reported by the provider.
    pub fn current_weight(&self) -> u64 {
        self.current_weight
    }

    /// Used weight at the end of the previous connected cycle.
    pub fn previous_weight(&self) -> u64 {
        self.previous_weight
    }

    /// Policy limit, zero until configured.
    pub fn weight_limit(&self) -> u64 {
        self.weight_limit
    }

    /// Used-weight fraction above which damping kicks in.
    pub fn damping_trigger(&self) -> f64 {
        self.damping_trigger
    }

    /// Number of samples in the work-time estimator.
    pub fn work_samples(&self) -> usize {
        self.work_time.len()
    }

    /// Estimated work time per cycle, once enough samples exist.
    pub fn estimated_work_ms(&self) -> Option<f64> {
        self.work_time.mean().ok()
    }

    /// Number of circuit breaker trips since creation.
    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips
    }

    async fn configure<P: RemoteApi>(&mut self, provider: &P, status: &BudgetStatus) -> FeedResult<()> {
        let result = match self.call(provider.fetch_policy()).await {
            Ok(policy) if policy.limit > 0 && policy.interval_ms > 0 => Ok(policy),
            Ok(policy) => Err(FeedError::Configuration(format!(
                "unusable policy: {} weight per {} ms",
                policy.limit, policy.interval_ms
            ))),
            Err(err) => Err(err),
        };

        match result {
            Ok(policy) => {
                self.weight_limit = policy.limit;
                self.weight_interval_ms = policy.interval_ms;
                self.damping_trigger = self.settings.damping_trigger(policy.limit);
                status.set_cooling_period(policy.interval_ms.div_ceil(1000));
                status.set_configured(true);
                status.set_connected(true);
                status.set_config_error("");
                log::info!(
                    "Configured: {} weight per {} ms, damping above {:.3}",
                    policy.limit,
                    policy.interval_ms,
                    self.damping_trigger
                );
                Ok(())
            }
            Err(err) => {
                log::warn!("Configuration failed: {}", err);
                status.set_configured(false);
                status.set_connected(false);
                status.set_config_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Fetches one category; any failure leaves the category without data.
    async fn fetch_category<P: RemoteApi>(
        &mut self,
        provider: &P,
        plan: &CategoryPlan,
    ) -> FeedResult<HashMap<String, Record>> {
        let costs = self.settings.costs.get(plan.category);
        let mut records = HashMap::new();

        match &plan.shape {
            RequestShape::Batched => {
                let response = self.call(provider.fetch_batch(plan.category)).await?;
                self.record_weight(response.weight_used, costs.batched);
                for record in response.records {
                    let symbol = record.get(SYMBOL_FIELD).and_then(|v| v.as_str()).map(str::to_string);
                    if let Some(symbol) = symbol {
                        records.insert(symbol, record);
                    }
                }
            }
            RequestShape::Itemized(instruments) => {
                for instrument in instruments {
                    let response = self.call(provider.fetch_one(plan.category, instrument)).await?;
                    self.record_weight(response.weight_used, costs.itemized);
                    records.insert(instrument.clone(), response.record);
                }
            }
        }
        Ok(records)
    }

    async fn call<T, F>(&self, request: F) -> FeedResult<T>
    where
        F: Future<Output = FeedResult<T>>,
    {
        let limit_ms = self.settings.call_timeout_ms;
        match timeout(Duration::from_millis(limit_ms), request).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(limit_ms)),
        }
    }

    /// The provider's figure is authoritative; without one, count the static cost.
    fn record_weight(&mut self, reported: Option<u64>, cost: u64) {
        self.current_weight = match reported {
            Some(used) => used,
            None => self.current_weight.saturating_add(cost),
        };
    }

    fn trip_breaker(&mut self, status: &BudgetStatus, next: Category) {
        self.breaker_trips += 1;
        log::warn!(
            "Used weight {} of {} leaves no room for a {} batch; cooling for {} s (trip #{})",
            self.current_weight,
            self.weight_limit,
            next,
            status.cooling_period().max(1),
            self.breaker_trips
        );
        status.start_cooling();
        status.set_connected(false);
        self.current_weight = 0;
    }

    /// Feeds the cycle duration to the estimator and updates `n_base`.
    fn learn(&mut self, elapsed: Duration) {
        if self.debounce.is_activated() {
            self.work_time.add_sample(elapsed.as_secs_f64() * 1000.0);
        }
        self.debounce.advance();

        if let Ok(work_ms) = self.work_time.mean() {
            if let Some(n) = suggest_threshold(
                self.current_weight,
                self.previous_weight,
                self.weight_interval_ms,
                self.weight_limit,
                self.settings.target_fraction,
                work_ms,
                self.settings.heartbeat_ms,
            ) {
                if n != self.n_base {
                    log::debug!("Divider suggestion {} -> {}", self.n_base, n);
                }
                self.n_base = n;
            }
        }
        self.previous_weight = self.current_weight;
    }

    fn forget(&mut self) {
        self.work_time.clear();
        self.debounce.reset();
        self.n_base = self.settings.initial_divider;
    }

    /// Only a changed threshold restarts the divider; otherwise it keeps wrapping.
    fn apply_divider(&mut self, threshold: u32) {
        if threshold == self.divider.threshold() {
            return;
        }
        if let Err(err) = self.divider.set_threshold(threshold) {
            log::error!("Rejected divider {}: {}", threshold, err);
        }
    }

    fn refresh_label(&mut self, status: &BudgetStatus) -> Option<StatusLabel> {
        let label = status.label();
        if self.last_label.as_ref() == Some(&label) {
            return None;
        }
        self.last_label = Some(label.clone());
        if label == StatusLabel::Polling {
            None
        } else {
            Some(label)
        }
    }
}
