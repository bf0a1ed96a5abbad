//! # Configuration Modules
//!
//! Serde-backed settings for the governor. Values are read once when the
//! `FeedManager` is built; every policy knob has a named default.

/// Governor knobs and per-category weight costs.
pub mod feed_settings;
