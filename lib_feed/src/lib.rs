//! # lib_feed
//!
//! Weight-governed polling feed for rate-limited market data APIs.
//!
//! A fast fixed heartbeat is divided down to an adaptive polling cadence by a
//! closed-loop governor that watches the provider's "used weight" signal.
//! Many fine-grained subscriptions are collapsed into the smallest set of
//! batched or itemized requests, and a cooling circuit breaker hard-stops
//! polling before the budget is exhausted.
//!
//! - **`core`**: counters, estimator, registry, status, governor, dispatcher
//!   and the host-facing `FeedManager`.
//! - **`markets`**: the abstract `RemoteApi` collaborator and, behind the
//!   `binance` feature, a concrete HTTP adapter.
//! - **`retrieve`**: the generic `ApiClient` used by HTTP adapters.
//! - **`configs`**: serde-backed governor settings.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Governor settings and per-category weight costs.
pub mod configs;
/// The feed engine.
pub mod core;
/// Error taxonomy shared by every module.
pub mod error;
/// Remote API collaborators.
pub mod markets;
/// Generic HTTP retrieval client.
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use configs::feed_settings::{CategoryCosts, CostTable, GovernorSettings};
pub use core::feed_manager::FeedManager;
pub use core::model::{Category, FeedValue, Placeholder, ResourceKey, SubscriptionId, TopicId};
pub use core::status::{StatusEvent, StatusLabel};
pub use core::governor::Telemetry;
pub use error::{FeedError, FeedResult};
pub use markets::provider::RemoteApi;
