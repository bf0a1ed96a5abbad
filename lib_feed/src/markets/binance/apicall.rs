use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::core::model::Category;
use crate::error::{FeedError, FeedResult};
use crate::markets::provider::{BatchResponse, ItemResponse, Policy, Record, RemoteApi, ERROR_CODE_FIELD};
use crate::retrieve::ky_http::{ApiClient, ApiResponse, ClientOptions};

/// Public spot API.
pub const DEFAULT_BASE_URL: &str = "https://api.binance.com/";

const PRICE_PATH: &str = "api/v3/ticker/price";
const TICKER_PATH: &str = "api/v3/ticker/24hr";
// A single-symbol probe keeps the payload small; rateLimits are global.
const POLICY_PATH: &str = "api/v3/exchangeInfo?symbol=BTCUSDT";
const USED_WEIGHT_HEADERS: [&str; 2] = ["x-mbx-used-weight-1m", "x-mbx-used-weight"];
const REQUEST_WEIGHT: &str = "REQUEST_WEIGHT";
const POLICY_RETRIES: u32 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimit {
    rate_limit_type: String,
    interval: String,
    interval_num: u64,
    limit: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    rate_limits: Vec<RateLimit>,
}

/// Weight-limited Binance-style REST provider.
#[derive(Debug, Clone)]
pub struct BinanceApi {
    client: ApiClient,
    policy_client: ApiClient,
}

impl BinanceApi {
    /// Creates an adapter for `base_url` with a per-request timeout.
    ///
    /// Data calls are never retried, so each one costs exactly one request
    /// worth of weight. The policy call retries transient failures.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = ApiClient::new(
            base_url,
            ClientOptions {
                timeout,
                ..ClientOptions::default()
            },
        )?;
        let policy_client = ApiClient::new(
            base_url,
            ClientOptions {
                timeout,
                max_retries: POLICY_RETRIES,
            },
        )?;
        Ok(Self { client, policy_client })
    }

    async fn get(&self, client: &ApiClient, path: &str) -> FeedResult<ApiResponse<Value>> {
        client
            .get::<Value>(path)
            .await
            .map_err(|err| classify(path, err))
    }
}

fn endpoint(category: Category) -> &'static str {
    match category {
        Category::Price => PRICE_PATH,
        Category::Ticker => TICKER_PATH,
    }
}

/// Maps a client error to the feed taxonomy.
fn classify(path: &str, err: anyhow::Error) -> FeedError {
    let decode = err
        .downcast_ref::<reqwest::Error>()
        .map(reqwest::Error::is_decode)
        .unwrap_or(false);
    if decode {
        FeedError::MalformedResponse(format!("{}: {}", path, err))
    } else {
        FeedError::Transport(format!("{}: {:#}", path, err))
    }
}

fn http_failure(path: &str, status: u16, body: Option<&str>) -> FeedError {
    FeedError::Transport(format!("{}: HTTP {} {}", path, status, body.unwrap_or_default().trim()))
}

/// Reads the provider's used-weight counter.
pub fn used_weight(headers: &HeaderMap) -> Option<u64> {
    USED_WEIGHT_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .and_then(|text| text.trim().parse().ok())
    })
}

/// Extracts the request-weight policy from an `exchangeInfo` body.
pub fn parse_policy(body: &Value) -> FeedResult<Policy> {
    let info: ExchangeInfo = serde_json::from_value(body.clone())
        .map_err(|err| FeedError::MalformedResponse(format!("exchangeInfo: {}", err)))?;
    let entry = info
        .rate_limits
        .iter()
        .find(|limit| limit.rate_limit_type == REQUEST_WEIGHT)
        .ok_or_else(|| FeedError::MalformedResponse("exchangeInfo has no REQUEST_WEIGHT limit".to_string()))?;

    let unit_ms: u64 = match entry.interval.as_str() {
        "SECOND" => 1_000,
        "MINUTE" => 60_000,
        "HOUR" => 3_600_000,
        "DAY" => 86_400_000,
        other => {
            return Err(FeedError::MalformedResponse(format!("unknown rate limit interval '{}'", other)));
        }
    };
    Ok(Policy {
        limit: entry.limit,
        interval_ms: unit_ms * entry.interval_num.max(1),
    })
}

/// A 4xx body carrying `code` is a per-item answer, not a transport failure.
fn item_error_record(status: u16, body: Option<&str>) -> Option<Record> {
    if !(400..500).contains(&status) {
        return None;
    }
    match serde_json::from_str::<Value>(body?) {
        Ok(Value::Object(record)) if record.contains_key(ERROR_CODE_FIELD) => Some(record),
        _ => None,
    }
}

fn into_records(path: &str, body: Value) -> FeedResult<Vec<Record>> {
    match body {
        Value::Array(rows) => Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(record) => Some(record),
                _ => None,
            })
            .collect()),
        other => Err(FeedError::MalformedResponse(format!(
            "{}: expected an array, got {}",
            path,
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl RemoteApi for BinanceApi {
    async fn fetch_batch(&self, category: Category) -> FeedResult<BatchResponse> {
        let path = endpoint(category);
        let response = self.get(&self.client, path).await?;
        let weight_used = used_weight(&response.headers);
        match response.data {
            Some(body) if response.success => Ok(BatchResponse {
                weight_used,
                records: into_records(path, body)?,
            }),
            _ => Err(http_failure(path, response.status, response.error_body.as_deref())),
        }
    }

    async fn fetch_one(&self, category: Category, instrument: &str) -> FeedResult<ItemResponse> {
        let path = format!("{}?symbol={}", endpoint(category), instrument);
        let response = self.get(&self.client, &path).await?;
        let weight_used = used_weight(&response.headers);

        if let (true, Some(body)) = (response.success, response.data) {
            return match body {
                Value::Object(record) => Ok(ItemResponse { weight_used, record }),
                other => Err(FeedError::MalformedResponse(format!(
                    "{}: expected an object, got {}",
                    path,
                    kind_of(&other)
                ))),
            };
        }

        let error_body = response.error_body.as_deref();
        match item_error_record(response.status, error_body) {
            Some(record) => {
                log::debug!("{} rejected {}: HTTP {}", path, instrument, response.status);
                Ok(ItemResponse { weight_used, record })
            }
            None => Err(http_failure(&path, response.status, error_body)),
        }
    }

    async fn fetch_policy(&self) -> FeedResult<Policy> {
        let response = self.get(&self.policy_client, POLICY_PATH).await?;
        match response.data {
            Some(body) if response.success => parse_policy(&body),
            _ => Err(http_failure(POLICY_PATH, response.status, response.error_body.as_deref())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_parse_policy_picks_request_weight() {
        let body = json!({
            "timezone": "UTC",
            "rateLimits": [
                {"rateLimitType": "RAW_REQUESTS", "interval": "MINUTE", "intervalNum": 5, "limit": 61000},
                {"rateLimitType": "REQUEST_WEIGHT", "interval": "MINUTE", "intervalNum": 1, "limit": 6000},
                {"rateLimitType": "ORDERS", "interval": "SECOND", "intervalNum": 10, "limit": 100}
            ]
        });
        assert_eq!(parse_policy(&body).unwrap(), Policy { limit: 6000, interval_ms: 60_000 });
    }

    #[test]
    fn test_parse_policy_multiplies_interval() {
        let body = json!({"rateLimits": [
            {"rateLimitType": "REQUEST_WEIGHT", "interval": "SECOND", "intervalNum": 10, "limit": 50}
        ]});
        assert_eq!(parse_policy(&body).unwrap().interval_ms, 10_000);
    }

    #[test]
    fn test_parse_policy_rejects_bad_bodies() {
        assert!(matches!(parse_policy(&json!({"rateLimits": []})), Err(FeedError::MalformedResponse(_))));
        assert!(matches!(parse_policy(&json!([1, 2])), Err(FeedError::MalformedResponse(_))));
        let weird = json!({"rateLimits": [
            {"rateLimitType": "REQUEST_WEIGHT", "interval": "FORTNIGHT", "intervalNum": 1, "limit": 5}
        ]});
        assert!(matches!(parse_policy(&weird), Err(FeedError::MalformedResponse(_))));
    }

    #[test]
    fn test_used_weight_header_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(used_weight(&headers), None);

        headers.insert("x-mbx-used-weight", HeaderValue::from_static("17"));
        assert_eq!(used_weight(&headers), Some(17));

        headers.insert("x-mbx-used-weight-1m", HeaderValue::from_static("23"));
        assert_eq!(used_weight(&headers), Some(23));

        headers.insert("x-mbx-used-weight-1m", HeaderValue::from_static("n/a"));
        assert_eq!(used_weight(&headers), Some(17));
    }

    #[test]
    fn test_item_error_record() {
        let body = r#"{"code":-1121,"msg":"Invalid symbol."}"#;
        let record = item_error_record(400, Some(body)).unwrap();
        assert_eq!(record.get("code"), Some(&json!(-1121)));

        assert!(item_error_record(500, Some(body)).is_none());
        assert!(item_error_record(429, Some("Too many requests")).is_none());
        assert!(item_error_record(404, None).is_none());
    }

    #[test]
    fn test_into_records_requires_array() {
        let rows = json!([{"symbol": "BTCUSDT", "price": "1"}, 5]);
        assert_eq!(into_records(PRICE_PATH, rows).unwrap().len(), 1);
        assert!(matches!(
            into_records(PRICE_PATH, json!({"code": -1})),
            Err(FeedError::MalformedResponse(_))
        ));
    }
}
