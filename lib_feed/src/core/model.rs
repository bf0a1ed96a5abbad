//! # Feed Model
//!
//! Identifiers, resource keys and the values delivered to subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier chosen by the host for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Identifier of one deduplicated resource key inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicId(pub u64);

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "topic#{}", self.0)
    }
}

/// Request shape a metric is served by.
///
/// Keys of the same category can share one batched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Latest traded price only.
    Price,
    /// Rolling 24h statistics (last price, volume, change, ...).
    Ticker,
}

impl Category {
    /// Every category, in polling order.
    pub const ALL: [Category; 2] = [Category::Price, Category::Ticker];

    /// Metric name served by the price endpoint.
    pub const PRICE_METRIC: &'static str = "price";

    /// Classifies a metric name.
    pub fn of_metric(metric: &str) -> Self {
        if metric == Self::PRICE_METRIC {
            Category::Price
        } else {
            Category::Ticker
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Price => "price",
            Category::Ticker => "ticker",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a subscription asks for: one metric of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Instrument symbol, normalized to upper case (e.g. `BTCUSDT`).
    pub instrument: String,
    /// Metric name as the provider spells it (e.g. `lastPrice`).
    pub metric: String,
}

impl ResourceKey {
    /// Builds a key, trimming both parts and upper-casing the instrument.
    pub fn new(instrument: &str, metric: &str) -> Self {
        Self {
            instrument: instrument.trim().to_uppercase(),
            metric: metric.trim().to_string(),
        }
    }

    /// Request category this key is fetched with.
    pub fn category(&self) -> Category {
        Category::of_metric(&self.metric)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instrument, self.metric)
    }
}

/// Reason a subscription currently has no value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Placeholder {
    /// The category was not retrieved this cycle.
    Resolving,
    /// The provider answered but the instrument or metric is unknown.
    NotFound,
    /// The provider returned an error record for this item.
    ProviderError(String),
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Resolving => f.write_str("resolving"),
            Placeholder::NotFound => f.write_str("not found"),
            Placeholder::ProviderError(detail) => write!(f, "provider error: {}", detail),
        }
    }
}

/// Value pushed to one subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FeedValue {
    /// A numeric metric (numeric strings are parsed).
    Number(f64),
    /// A non-numeric metric.
    Text(String),
    /// No value this cycle.
    Placeholder(Placeholder),
    /// Feed status label shown while the feed is not live.
    Status(String),
}

impl FeedValue {
    /// Converts one field of a provider record.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(FeedValue::Number)
                .unwrap_or_else(|| FeedValue::Text(n.to_string())),
            Value::String(s) => match s.parse::<f64>() {
                Ok(n) if n.is_finite() => FeedValue::Number(n),
                _ => FeedValue::Text(s.clone()),
            },
            Value::Bool(b) => FeedValue::Text(b.to_string()),
            Value::Null => FeedValue::Placeholder(Placeholder::NotFound),
            other => FeedValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedValue::Number(n) => write!(f, "{}", n),
            FeedValue::Text(s) | FeedValue::Status(s) => f.write_str(s),
            FeedValue::Placeholder(p) => write!(f, "#{}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_normalization_and_category() {
        let key = ResourceKey::new(" btcusdt ", "price");
        assert_eq!(key.instrument, "BTCUSDT");
        assert_eq!(key.category(), Category::Price);
        assert_eq!(ResourceKey::new("ETHUSDT", "lastPrice").category(), Category::Ticker);
        assert_eq!(key.to_string(), "BTCUSDT/price");
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(FeedValue::from_json(&json!("42.50")), FeedValue::Number(42.5));
        assert_eq!(FeedValue::from_json(&json!(7)), FeedValue::Number(7.0));
        assert_eq!(FeedValue::from_json(&json!("BTCUSDT")), FeedValue::Text("BTCUSDT".into()));
        assert_eq!(
            FeedValue::from_json(&Value::Null),
            FeedValue::Placeholder(Placeholder::NotFound)
        );
        // "NaN" parses as f64 but is not a usable market value.
        assert_eq!(FeedValue::from_json(&json!("NaN")), FeedValue::Text("NaN".into()));
    }
}
