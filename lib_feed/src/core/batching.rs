//! # Request Batching
//!
//! Partitions the registered keys by category and picks a request shape per
//! category. A batched request costs the same no matter how many instruments
//! it covers, so itemizing only pays off while few instruments are needed:
//! below `max(1, batched / itemize_divisor)` distinct instruments.

use std::collections::{BTreeMap, BTreeSet};

use crate::configs::feed_settings::GovernorSettings;
use crate::core::model::{Category, ResourceKey};

/// How one category is fetched this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestShape {
    /// One request covering every instrument.
    Batched,
    /// One request per listed instrument.
    Itemized(Vec<String>),
}

/// Requests for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPlan {
    /// Category served.
    pub category: Category,
    /// Chosen request shape.
    pub shape: RequestShape,
}

impl CategoryPlan {
    /// Weight the plan is expected to cost.
    pub fn expected_cost(&self, settings: &GovernorSettings) -> u64 {
        let costs = settings.costs.get(self.category);
        match &self.shape {
            RequestShape::Batched => costs.batched,
            RequestShape::Itemized(instruments) => costs.itemized * instruments.len() as u64,
        }
    }
}

/// Largest instrument count (exclusive) for which itemizing is chosen.
pub fn itemize_limit(batched_cost: u64, itemize_divisor: u64) -> u64 {
    (batched_cost / itemize_divisor.max(1)).max(1)
}

/// Builds one plan per category that has at least one key, in category order.
pub fn plan_requests<'a, I>(keys: I, settings: &GovernorSettings) -> Vec<CategoryPlan>
where
    I: IntoIterator<Item = &'a ResourceKey>,
{
    let mut instruments: BTreeMap<Category, BTreeSet<&'a str>> = BTreeMap::new();
    for key in keys {
        instruments
            .entry(key.category())
            .or_default()
            .insert(key.instrument.as_str());
    }

    instruments
        .into_iter()
        .map(|(category, needed)| {
            let limit = itemize_limit(settings.costs.get(category).batched, settings.itemize_divisor);
            let shape = if (needed.len() as u64) < limit {
                RequestShape::Itemized(needed.into_iter().map(str::to_string).collect())
            } else {
                RequestShape::Batched
            };
            CategoryPlan { category, shape }
        })
        .collect()
}
