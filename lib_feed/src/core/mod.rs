//! # Core Engine Module
//!
//! The governor and everything it drives. Components, leaves first:
//!
//! - **`step_counter`**: bounded modular/saturating counter used as the
//!   frequency divider and as the first-measurement debounce gate.
//! - **`window_average`**: fixed-capacity sample window that estimates the
//!   time one polling cycle takes.
//! - **`registry`**: the bijective topic/key registry and the reference
//!   counted subscription table built on it.
//! - **`status`**: the budget/status state machine with its typed event bus.
//! - **`batching`**: turns the registered keys into per-category request plans.
//! - **`governor`**: the per-tick control algorithm.
//! - **`dispatcher`**: fan-out of value frames to host listeners.
//! - **`feed_manager`**: owns the heartbeat and cooling timers and exposes the
//!   host-facing API.

/// Request planning: batched vs itemized per category.
pub mod batching;
/// Fan-out of value frames to host listeners.
pub mod dispatcher;
/// Host-facing orchestrator that owns both timers.
pub mod feed_manager;
/// The adaptive polling governor.
pub mod governor;
/// Identifiers, resource keys and delivered values.
pub mod model;
/// Bijective topic registry and reference-counted subscriptions.
pub mod registry;
/// Budget/status state machine.
pub mod status;
/// Frequency divider / debounce primitive.
pub mod step_counter;
/// Moving-average work-time estimator.
pub mod window_average;

// --- Public API Re-exports ---
pub use dispatcher::{Dispatcher, ValueFrame};
pub use feed_manager::FeedManager;
pub use governor::{Governor, Telemetry, TickOutcome};
pub use registry::{BijectiveRegistry, SubscriptionTable};
pub use status::{BudgetStatus, StatusEvent, StatusLabel};
pub use step_counter::StepCounter;
pub use window_average::RunningWindowAverage;

#[cfg(test)]
pub(crate) mod test_support;
