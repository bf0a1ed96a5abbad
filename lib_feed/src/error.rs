//! # Feed Errors
//!
//! One error enum for the whole library. Programming errors (`InvalidArgument`,
//! `NotFound`, `NotReady`) are fatal to the call that raised them; remote
//! failures (`Transport`, `MalformedResponse`, `Timeout`, `Configuration`) are
//! absorbed by the governor and surface only as status and placeholders.

use thiserror::Error;

/// Errors produced by the feed engine and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// A counter, window or registry operation received an out-of-range value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The estimator was queried before it collected enough samples.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// A registry lookup missed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request could not be delivered or the provider answered with a
    /// non-success status.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The provider answered but the payload did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A single remote call exceeded the per-call timeout.
    #[error("Remote call timed out after {0} ms")]
    Timeout(u64),

    /// The rate-limit policy could not be fetched or parsed.
    #[error("Configuration failure: {0}")]
    Configuration(String),
}

/// Convenience alias used across the crate.
pub type FeedResult<T> = Result<T, FeedError>;
