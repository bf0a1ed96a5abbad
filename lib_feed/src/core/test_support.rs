//! Scripted in-memory provider for governor and feed manager tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::core::model::Category;
use crate::error::{FeedError, FeedResult};
use crate::markets::provider::{BatchResponse, ItemResponse, Policy, Record, RemoteApi};

#[derive(Debug, Default)]
struct Script {
    policy: Option<Policy>,
    weights: VecDeque<u64>,
    last_weight: Option<u64>,
    failing: HashSet<Category>,
    stalled: HashSet<Category>,
    batch_calls: HashMap<Category, usize>,
    item_calls: usize,
    policy_calls: usize,
}

impl Script {
    /// Pops the next scripted weight, repeating the last one when exhausted.
    fn next_weight(&mut self) -> Option<u64> {
        if let Some(weight) = self.weights.pop_front() {
            self.last_weight = Some(weight);
        }
        self.last_weight
    }
}

/// A provider answering from fixed tables, with scripted used weight.
#[derive(Debug, Default)]
pub(crate) struct ScriptedApi {
    script: Mutex<Script>,
}

fn table(category: Category) -> Vec<Record> {
    let rows = match category {
        Category::Price => json!([
            {"symbol": "BTCUSDT", "price": "64250.50"},
            {"symbol": "ETHUSDT", "price": "3120.00"}
        ]),
        Category::Ticker => json!([
            {"symbol": "BTCUSDT", "lastPrice": "64250.50", "volume": "1523.7"},
            {"symbol": "ETHUSDT", "lastPrice": "3120.00", "volume": "20411.2"}
        ]),
    };
    match rows {
        Value::Array(rows) => rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_policy(self, limit: u64, interval_ms: u64) -> Self {
        self.set_policy(Some(Policy { limit, interval_ms }));
        self
    }

    pub(crate) fn with_weights(self, weights: &[u64]) -> Self {
        self.script.lock().unwrap().weights.extend(weights.iter().copied());
        self
    }

    pub(crate) fn failing(self, category: Category) -> Self {
        self.fail(category);
        self
    }

    /// Calls for `category` never complete.
    pub(crate) fn stalling(self, category: Category) -> Self {
        self.script.lock().unwrap().stalled.insert(category);
        self
    }

    pub(crate) fn set_policy(&self, policy: Option<Policy>) {
        self.script.lock().unwrap().policy = policy;
    }

    pub(crate) fn fail(&self, category: Category) {
        self.script.lock().unwrap().failing.insert(category);
    }

    pub(crate) fn batch_calls(&self, category: Category) -> usize {
        self.script.lock().unwrap().batch_calls.get(&category).copied().unwrap_or(0)
    }

    pub(crate) fn item_calls(&self) -> usize {
        self.script.lock().unwrap().item_calls
    }

    pub(crate) fn policy_calls(&self) -> usize {
        self.script.lock().unwrap().policy_calls
    }
}

impl RemoteApi for ScriptedApi {
    async fn fetch_batch(&self, category: Category) -> FeedResult<BatchResponse> {
        let stalled = {
            let mut script = self.script.lock().unwrap();
            *script.batch_calls.entry(category).or_default() += 1;
            script.stalled.contains(&category)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut script = self.script.lock().unwrap();
        if script.failing.contains(&category) {
            return Err(FeedError::Transport(format!("{} endpoint down", category)));
        }
        Ok(BatchResponse {
            weight_used: script.next_weight(),
            records: table(category),
        })
    }

    async fn fetch_one(&self, category: Category, instrument: &str) -> FeedResult<ItemResponse> {
        let stalled = {
            let mut script = self.script.lock().unwrap();
            script.item_calls += 1;
            script.stalled.contains(&category)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut script = self.script.lock().unwrap();
        if script.failing.contains(&category) {
            return Err(FeedError::Transport(format!("{} endpoint down", category)));
        }
        let record = table(category)
            .into_iter()
            .find(|row| row.get("symbol").and_then(Value::as_str) == Some(instrument))
            .unwrap_or_else(|| {
                let error = json!({"code": -1121, "msg": "Invalid symbol."});
                error.as_object().cloned().unwrap_or_default()
            });
        Ok(ItemResponse {
            weight_used: script.next_weight(),
            record,
        })
    }

    async fn fetch_policy(&self) -> FeedResult<Policy> {
        let mut script = self.script.lock().unwrap();
        script.policy_calls += 1;
        script
            .policy
            .ok_or_else(|| FeedError::Transport("exchange info unavailable".to_string()))
    }
}
