//! # Data Retrieval Module
//!
//! Generic HTTP plumbing shared by provider adapters.
//!
//! - **`ky_http`**: an `ApiClient` on `reqwest` + `reqwest-middleware` with a
//!   per-client timeout and an optional exponential-backoff retry budget.
//!   Polling clients run with zero retries so one call is one request and
//!   the provider's weight accounting stays predictable.

/// Generic HTTP API client with optional retry middleware.
pub mod ky_http;
