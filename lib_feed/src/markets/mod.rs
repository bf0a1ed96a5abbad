//! # Market APIs Module
//!
//! Everything that talks to a remote data provider.
//!
//! - **`provider`**: the `RemoteApi` trait the governor drives, with the
//!   response types it exchanges. The core never depends on anything more
//!   concrete than this.
//! - **`binance`**: an adapter for a Binance-style REST API whose rate limit
//!   is expressed as request weight per interval. Enabled by the `binance`
//!   feature.

/// The abstract remote collaborator.
pub mod provider;
/// Binance-style REST adapter.
#[cfg(feature = "binance")]
pub mod binance;
