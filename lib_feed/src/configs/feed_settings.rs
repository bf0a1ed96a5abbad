//! # Feed Settings
//!
//! Policy knobs for the governor. The defaults match a Binance-style spot API
//! whose price endpoint costs 2 weight per symbol or 4 for every symbol, and
//! whose 24h ticker costs 2 per symbol or 80 for every symbol.

use serde::{Deserialize, Serialize};

use crate::core::model::Category;
use crate::error::{FeedError, FeedResult};

/// Static weight cost of the two request shapes of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCosts {
    /// Cost of one request covering every key.
    pub batched: u64,
    /// Cost of one request covering a single instrument.
    pub itemized: u64,
}

/// Weight costs for every category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostTable {
    /// `Category::Price`.
    pub price: CategoryCosts,
    /// `Category::Ticker`.
    pub ticker: CategoryCosts,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            price: CategoryCosts { batched: 4, itemized: 2 },
            ticker: CategoryCosts { batched: 80, itemized: 2 },
        }
    }
}

impl CostTable {
    /// Costs of `category`.
    pub fn get(&self, category: Category) -> CategoryCosts {
        match category {
            Category::Price => self.price,
            Category::Ticker => self.ticker,
        }
    }

    /// Most expensive batched request across categories.
    pub fn max_batched(&self) -> u64 {
        Category::ALL
            .iter()
            .map(|category| self.get(*category).batched)
            .max()
            .unwrap_or(0)
    }
}

/// Governor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernorSettings {
    /// Heartbeat period `P` in milliseconds.
    pub heartbeat_ms: u64,
    /// Divider threshold used at startup and after a disconnect.
    pub initial_divider: u32,
    /// Fraction of the weight budget the controller aims to consume.
    pub target_fraction: f64,
    /// Escalation steps between the damping trigger and the limit.
    pub damping_levels: u32,
    /// Batched requests' worth of headroom left between the damping trigger
    /// and the limit.
    pub damping_headroom_batches: u64,
    /// Itemize while distinct instruments < `max(1, batched / itemize_divisor)`.
    pub itemize_divisor: u64,
    /// Debounce gate threshold: samples before it activates are discarded.
    pub debounce_threshold: u32,
    /// Work-time estimator capacity.
    pub window_capacity: usize,
    /// Samples required before the estimator answers.
    pub window_min_ready: usize,
    /// Bound on a single remote call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Static per-call weight costs.
    pub costs: CostTable,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            heartbeat_ms: 250,
            initial_divider: 4,
            target_fraction: 0.75,
            damping_levels: 8,
            damping_headroom_batches: 4,
            itemize_divisor: 3,
            debounce_threshold: 3,
            window_capacity: 8,
            window_min_ready: 3,
            call_timeout_ms: 5_000,
            costs: CostTable::default(),
        }
    }
}

impl GovernorSettings {
    /// Checks ranges that would otherwise break the controller arithmetic.
    ///
    /// # Errors
    /// `InvalidArgument` naming the first offending field.
    pub fn validate(&self) -> FeedResult<()> {
        let invalid = |field: &str, why: &str| {
            Err(FeedError::InvalidArgument(format!("{}: {}", field, why)))
        };

        if self.heartbeat_ms == 0 {
            return invalid("heartbeatMs", "must be positive");
        }
        if self.initial_divider == 0 {
            return invalid("initialDivider", "must be at least 1");
        }
        if !(self.target_fraction > 0.0 && self.target_fraction <= 1.0) {
            return invalid("targetFraction", "must be in (0, 1]");
        }
        if self.damping_levels == 0 {
            return invalid("dampingLevels", "must be at least 1");
        }
        if self.itemize_divisor == 0 {
            return invalid("itemizeDivisor", "must be at least 1");
        }
        if self.debounce_threshold == 0 {
            return invalid("debounceThreshold", "must be at least 1");
        }
        if self.window_min_ready == 0 || self.window_capacity < self.window_min_ready {
            return invalid("windowCapacity", "needs 1 <= windowMinReady <= windowCapacity");
        }
        if self.call_timeout_ms == 0 {
            return invalid("callTimeoutMs", "must be positive");
        }
        Ok(())
    }

    /// Damping trigger for a given limit: the used-weight fraction above which
    /// the divider is escalated, leaving `damping_headroom_batches` of the most
    /// expensive batched request before the limit. Clamped to `[0, 1)`.
    pub fn damping_trigger(&self, weight_limit: u64) -> f64 {
        if weight_limit == 0 {
            return 0.0;
        }
        let headroom = (self.damping_headroom_batches * self.costs.max_batched()) as f64;
        (1.0 - headroom / weight_limit as f64).clamp(0.0, 0.999)
    }
}
