//! Retention policies.
//!
//! Small collections are mirrored in full. Large ones keep a bounded subset
//! locally: the last N days of activity, or the top N records by a ranking.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tillsync_types::{Collection, Record, RecordBody, Timestamp};

/// How much of a collection is kept locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Every record.
    Full,
    /// Records whose activity falls within the last `days` days.
    Windowed { days: u32 },
    /// The `n` highest-ranked records.
    TopN { n: usize, rank_by: RankBy },
}

/// Ranking used by [`RetentionPolicy::TopN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    /// Lifetime units sold (inventory); other collections rank as zero.
    UnitsSold,
    /// Most recently updated first.
    RecentlyUpdated,
}

impl RetentionPolicy {
    /// Narrows an authoritative set to what should be stored locally.
    ///
    /// Output keeps the input's relative order.
    #[must_use]
    pub fn apply(&self, records: Vec<Record>, now: Timestamp) -> Vec<Record> {
        match *self {
            RetentionPolicy::Full => records,
            RetentionPolicy::Windowed { days } => {
                let cutoff = now.minus_days(days);
                records
                    .into_iter()
                    .filter(|r| activity_time(r) >= cutoff)
                    .collect()
            }
            RetentionPolicy::TopN { n, rank_by } => {
                if records.len() <= n {
                    return records;
                }
                let mut ranked: Vec<(usize, &Record)> = records.iter().enumerate().collect();
                // Tombstones only fill slots live records leave free.
                ranked.sort_by_key(|(_, r)| {
                    (r.is_deleted(), Reverse(rank(r, rank_by)), Reverse(r.updated_at), r.id.clone())
                });
                let mut keep: Vec<usize> = ranked.into_iter().take(n).map(|(i, _)| i).collect();
                keep.sort_unstable();

                let mut keep = keep.into_iter().peekable();
                records
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, r)| {
                        if keep.peek() == Some(&i) {
                            keep.next();
                            Some(r)
                        } else {
                            None
                        }
                    })
                    .collect()
            }
        }
    }
}

/// When the record's business activity happened.
fn activity_time(record: &Record) -> Timestamp {
    match &record.body {
        RecordBody::Sales(sale) => sale.occurred_at,
        RecordBody::Expenses(expense) => expense.incurred_at,
        _ => record.updated_at,
    }
}

fn rank(record: &Record, rank_by: RankBy) -> i64 {
    match (rank_by, &record.body) {
        (RankBy::UnitsSold, RecordBody::Inventory(item)) => i64::try_from(item.units_sold).unwrap_or(i64::MAX),
        (RankBy::UnitsSold, _) => 0,
        (RankBy::RecentlyUpdated, _) => record.updated_at.as_millis(),
    }
}

/// Retention plus freshness for one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPolicy {
    pub retention: RetentionPolicy,
    /// Local data younger than this is served without refreshing (ms).
    /// Full collections are fresh once populated and ignore it.
    pub staleness_ms: i64,
}

impl CollectionPolicy {
    /// Whether data refreshed at `last_refresh` can be served at `now`.
    #[must_use]
    pub fn is_fresh(&self, last_refresh: Option<Timestamp>, now: Timestamp) -> bool {
        match (last_refresh, self.retention) {
            (None, _) => false,
            (Some(_), RetentionPolicy::Full) => true,
            (Some(at), _) => now.millis_since(at) < self.staleness_ms,
        }
    }
}

const DEFAULT_STALENESS_MS: i64 = 15 * 60 * 1000;

/// Per-collection policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachePolicies(BTreeMap<Collection, CollectionPolicy>);

impl CachePolicies {
    /// The policy for `collection`; collections without one are mirrored in full.
    #[must_use]
    pub fn policy_for(&self, collection: Collection) -> CollectionPolicy {
        self.0.get(&collection).copied().unwrap_or(CollectionPolicy {
            retention: RetentionPolicy::Full,
            staleness_ms: DEFAULT_STALENESS_MS,
        })
    }

    /// Overrides one collection's policy.
    #[must_use]
    pub fn with(mut self, collection: Collection, policy: CollectionPolicy) -> Self {
        self.0.insert(collection, policy);
        self
    }
}

impl Default for CachePolicies {
    fn default() -> Self {
        let windowed = CollectionPolicy {
            retention: RetentionPolicy::Windowed { days: 90 },
            staleness_ms: DEFAULT_STALENESS_MS,
        };
        let full = CollectionPolicy {
            retention: RetentionPolicy::Full,
            staleness_ms: DEFAULT_STALENESS_MS,
        };
        Self(BTreeMap::from([
            (
                Collection::Inventory,
                CollectionPolicy {
                    retention: RetentionPolicy::TopN {
                        n: 500,
                        rank_by: RankBy::UnitsSold,
                    },
                    staleness_ms: DEFAULT_STALENESS_MS,
                },
            ),
            (Collection::Sales, windowed),
            (Collection::Expenses, windowed),
            (Collection::Customers, full),
            (Collection::Suppliers, full),
        ]))
    }
}
