//! # Budget / Status State Machine
//!
//! Shared between the heartbeat, the cooling countdown and the host. Every
//! field is an atomic so no reader can observe a torn value, and each field
//! has a single writer path (`tick_cooling` uses compare-and-swap because the
//! countdown and the breaker both write `cooling_remaining`).
//!
//! Writes that change a value publish exactly one `StatusEvent` on a broadcast
//! bus; writes that store the same value are silent.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;

const EVENT_BUS_CAPACITY: usize = 64;

/// One field change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// At least one subscription exists.
    HasSubscriptions(bool),
    /// The rate-limit policy has been fetched.
    Configured(bool),
    /// The user on/off switch.
    UserEnabled(bool),
    /// The last remote exchange succeeded.
    Connected(bool),
    /// Length of a cooling pause, in seconds.
    CoolingPeriod(u64),
    /// Seconds left in the current cooling pause.
    CoolingRemaining(u64),
    /// Last configuration error text (empty when cleared).
    ConfigError(String),
}

/// Human-readable state, derived by priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLabel {
    /// No subscriptions.
    Idle,
    /// Circuit breaker open, seconds left.
    Cooling(u64),
    /// Switched off by the user.
    Off,
    /// Configured and connected.
    Polling,
    /// Waiting for configuration or a successful exchange.
    Connecting(Option<String>),
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Idle => f.write_str("idle"),
            StatusLabel::Cooling(secs) => write!(f, "cooling, {} seconds left", secs),
            StatusLabel::Off => f.write_str("off"),
            StatusLabel::Polling => f.write_str("polling"),
            StatusLabel::Connecting(None) => f.write_str("connecting"),
            StatusLabel::Connecting(Some(err)) => write!(f, "connecting: {}", err),
        }
    }
}

/// Budget and connectivity state of the feed.
#[derive(Debug)]
pub struct BudgetStatus {
    has_subscriptions: AtomicBool,
    is_configured: AtomicBool,
    is_user_enabled: AtomicBool,
    is_connected: AtomicBool,
    cooling_period: AtomicU64,
    cooling_remaining: AtomicU64,
    config_error: Mutex<String>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for BudgetStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetStatus {
    /// Fresh state: no subscriptions, not configured, user enabled.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            has_subscriptions: AtomicBool::new(false),
            is_configured: AtomicBool::new(false),
            is_user_enabled: AtomicBool::new(true),
            is_connected: AtomicBool::new(false),
            cooling_period: AtomicU64::new(0),
            cooling_remaining: AtomicU64::new(0),
            config_error: Mutex::new(String::new()),
            events,
        }
    }

    /// Subscribes to field-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    // --- Queries ---

    /// At least one subscription exists.
    pub fn has_subscriptions(&self) -> bool {
        self.has_subscriptions.load(Ordering::SeqCst)
    }

    /// The rate-limit policy is known.
    pub fn is_configured(&self) -> bool {
        self.is_configured.load(Ordering::SeqCst)
    }

    /// The user switch is on.
    pub fn is_user_enabled(&self) -> bool {
        self.is_user_enabled.load(Ordering::SeqCst)
    }

    /// The last remote exchange succeeded.
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    /// Length of a cooling pause in seconds.
    pub fn cooling_period(&self) -> u64 {
        self.cooling_period.load(Ordering::SeqCst)
    }

    /// Seconds left in the current cooling pause.
    pub fn cooling_remaining(&self) -> u64 {
        self.cooling_remaining.load(Ordering::SeqCst)
    }

    /// The circuit breaker is open.
    pub fn is_cooling(&self) -> bool {
        self.cooling_remaining() > 0
    }

    /// `configured ∧ user enabled ∧ ¬cooling`.
    pub fn is_actively_polling(&self) -> bool {
        self.is_configured() && self.may_poll()
    }

    /// `user enabled ∧ ¬cooling`: the heartbeat may do work, which includes
    /// attempting configuration.
    pub fn may_poll(&self) -> bool {
        self.is_user_enabled() && !self.is_cooling()
    }

    /// Last stored configuration error, if any.
    pub fn config_error(&self) -> Option<String> {
        let text = self
            .config_error
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Derives the label by priority.
    pub fn label(&self) -> StatusLabel {
        if !self.has_subscriptions() {
            StatusLabel::Idle
        } else if self.is_cooling() {
            StatusLabel::Cooling(self.cooling_remaining())
        } else if !self.is_user_enabled() {
            StatusLabel::Off
        } else if self.is_configured() && self.is_connected() {
            StatusLabel::Polling
        } else {
            StatusLabel::Connecting(self.config_error())
        }
    }

    // --- Writers ---

    /// Records whether any subscription exists.
    pub fn set_has_subscriptions(&self, value: bool) {
        self.store_flag(&self.has_subscriptions, value, StatusEvent::HasSubscriptions);
    }

    /// Records whether the policy is known.
    pub fn set_configured(&self, value: bool) {
        self.store_flag(&self.is_configured, value, StatusEvent::Configured);
    }

    /// Records the user switch.
    pub fn set_user_enabled(&self, value: bool) {
        self.store_flag(&self.is_user_enabled, value, StatusEvent::UserEnabled);
    }

    /// Records connectivity.
    pub fn set_connected(&self, value: bool) {
        self.store_flag(&self.is_connected, value, StatusEvent::Connected);
    }

    /// Records the cooling pause length.
    pub fn set_cooling_period(&self, seconds: u64) {
        self.store_count(&self.cooling_period, seconds, StatusEvent::CoolingPeriod);
    }

    /// Stores (or clears, with an empty string) the configuration error text.
    pub fn set_config_error(&self, text: &str) {
        let changed = match self.config_error.lock() {
            Ok(mut guard) if guard.as_str() != text => {
                *guard = text.to_string();
                true
            }
            _ => false,
        };
        if changed {
            self.emit(StatusEvent::ConfigError(text.to_string()));
        }
    }

    /// Flips the user switch and drops connectivity so the label immediately
    /// stops showing stale data. Returns the new switch position.
    pub fn toggle_user_enabled(&self) -> bool {
        let enabled = !self.is_user_enabled.fetch_xor(true, Ordering::SeqCst);
        self.emit(StatusEvent::UserEnabled(enabled));
        self.set_connected(false);
        enabled
    }

    /// Opens the circuit breaker for a full cooling period.
    pub fn start_cooling(&self) {
        let period = self.cooling_period().max(1);
        self.store_count(&self.cooling_remaining, period, StatusEvent::CoolingRemaining);
    }

    /// One second of cooling has elapsed. Returns the seconds left.
    pub fn tick_cooling(&self) -> u64 {
        match self
            .cooling_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        {
            Ok(previous) => {
                let left = previous - 1;
                self.emit(StatusEvent::CoolingRemaining(left));
                left
            }
            Err(_) => 0,
        }
    }

    /// Returns to the idle state after the last subscription is removed.
    ///
    /// An in-progress cooling countdown is preserved.
    pub fn reset_for_idle(&self) {
        self.set_has_subscriptions(false);
        self.set_configured(false);
        self.set_user_enabled(true);
        self.set_connected(false);
        self.set_config_error("");
    }

    fn store_flag(&self, field: &AtomicBool, value: bool, event: fn(bool) -> StatusEvent) {
        if field.swap(value, Ordering::SeqCst) != value {
            self.emit(event(value));
        }
    }

    fn store_count(&self, field: &AtomicU64, value: u64, event: fn(u64) -> StatusEvent) {
        if field.swap(value, Ordering::SeqCst) != value {
            self.emit(event(value));
        }
    }

    fn emit(&self, event: StatusEvent) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(event);
    }
}
