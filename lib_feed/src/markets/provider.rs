//! # Remote API Contract
//!
//! The governor only needs three calls from a provider: a batched fetch per
//! category, an itemized fetch per instrument and the rate-limit policy. Each
//! response carries the provider's own account of the weight used so far in
//! the current interval, which the governor treats as authoritative.
//!
//! Records are opaque JSON objects keyed by metric name. Only `symbol`
//! (instrument lookup in batched responses) and `code`/`msg` (per-item
//! provider errors) are interpreted.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::model::Category;
use crate::error::FeedResult;

/// One provider record.
pub type Record = Map<String, Value>;

/// Field naming the instrument inside a record.
pub const SYMBOL_FIELD: &str = "symbol";
/// Field present only on error records.
pub const ERROR_CODE_FIELD: &str = "code";
/// Human-readable text of an error record.
pub const ERROR_MSG_FIELD: &str = "msg";

/// Response to a batched request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResponse {
    /// Weight used in the current interval, as reported by the provider.
    pub weight_used: Option<u64>,
    /// One record per instrument.
    pub records: Vec<Record>,
}

/// Response to an itemized request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemResponse {
    /// Weight used in the current interval, as reported by the provider.
    pub weight_used: Option<u64>,
    /// The instrument's record, possibly an error record.
    pub record: Record,
}

/// Rate-limit policy: at most `limit` weight per `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Weight units allowed per interval.
    pub limit: u64,
    /// Interval length in milliseconds.
    pub interval_ms: u64,
}

/// Returns the `(code, msg)` text of an error record.
pub fn record_error(record: &Record) -> Option<String> {
    let code = record.get(ERROR_CODE_FIELD)?;
    let msg = record
        .get(ERROR_MSG_FIELD)
        .and_then(Value::as_str)
        .unwrap_or("provider error");
    Some(format!("{} ({})", msg, code))
}

/// The remote data provider.
///
/// Calls are awaited one at a time by the governor, each under its own
/// timeout. Failures are `FeedError::Transport` or
/// `FeedError::MalformedResponse`.
pub trait RemoteApi: Send + Sync + 'static {
    /// Fetches every instrument of `category` in one request.
    fn fetch_batch(&self, category: Category) -> impl Future<Output = FeedResult<BatchResponse>> + Send;

    /// Fetches a single instrument of `category`.
    fn fetch_one(
        &self,
        category: Category,
        instrument: &str,
    ) -> impl Future<Output = FeedResult<ItemResponse>> + Send;

    /// Fetches the rate-limit policy.
    fn fetch_policy(&self) -> impl Future<Output = FeedResult<Policy>> + Send;
}

impl<T: RemoteApi> RemoteApi for Arc<T> {
    fn fetch_batch(&self, category: Category) -> impl Future<Output = FeedResult<BatchResponse>> + Send {
        (**self).fetch_batch(category)
    }

    fn fetch_one(
        &self,
        category: Category,
        instrument: &str,
    ) -> impl Future<Output = FeedResult<ItemResponse>> + Send {
        (**self).fetch_one(category, instrument)
    }

    fn fetch_policy(&self) -> impl Future<Output = FeedResult<Policy>> + Send {
        (**self).fetch_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_error() {
        let record = json!({"code": -1121, "msg": "Invalid symbol."});
        let record = record.as_object().unwrap();
        assert_eq!(record_error(record).as_deref(), Some("Invalid symbol. (-1121)"));

        let ok = json!({"symbol": "BTCUSDT", "price": "1.0"});
        assert_eq!(record_error(ok.as_object().unwrap()), None);
    }
}
