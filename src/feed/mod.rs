//! Odds feed boundary.
//!
//! Defines the `OddsFeed` trait and the typed snapshot shapes it returns.
//! A snapshot is decoded item by item: an element that fails to decode is
//! kept as a rejection alongside the good items instead of failing the
//! whole fetch.

pub mod odds_api;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{BookError, BookResult};

// ---------------------------------------------------------------------------
// Snapshot shapes (feed JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SportData {
    pub key: String,
    pub active: bool,
    pub group: String,
    #[serde(default)]
    pub description: String,
    pub title: String,
    #[serde(default)]
    pub has_outrights: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub id: String,
    pub sport_key: String,
    #[serde(default)]
    pub sport_title: String,
    /// Unix seconds.
    pub commence_time: i64,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub bookmakers: Option<Vec<Bookmaker>>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub scores: Option<Vec<Score>>,
    /// Unix seconds of the last score change.
    #[serde(default)]
    pub last_update: Option<i64>,
}

impl EventData {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        unix_to_datetime(self.commence_time)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.unwrap_or(false)
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.last_update.and_then(unix_to_datetime)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmaker {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub last_update: Option<i64>,
    #[serde(default)]
    pub markets: Vec<MarketData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub key: String,
    pub last_update: i64,
    pub outcomes: Vec<OutcomeData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeData {
    pub name: String,
    pub price: f64,
}

/// Free-text score for one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    pub score: String,
}

/// One fetched payload from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub sports: Vec<SportData>,
    pub events: Vec<EventData>,
    /// Items that failed to decode (`BookError::ItemParse`).
    pub rejected: Vec<BookError>,
    pub fetched_at: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn new(sports: Vec<SportData>, events: Vec<EventData>) -> Self {
        Self {
            sports,
            events,
            rejected: Vec::new(),
            fetched_at: Utc::now(),
        }
    }
}

/// Convert feed unix seconds to a UTC timestamp.
pub fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Decode a list of raw JSON items one at a time.
///
/// `key_field` names the field used to identify an item in rejections
/// (`"key"` for sports, `"id"` for events).
pub fn decode_items<T: DeserializeOwned>(
    kind: &'static str,
    key_field: &str,
    items: Vec<serde_json::Value>,
) -> (Vec<T>, Vec<BookError>) {
    let mut decoded = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        let key = item
            .get(key_field)
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("#{index}"));

        match serde_json::from_value::<T>(item) {
            Ok(value) => decoded.push(value),
            Err(e) => {
                warn!(kind, key = %key, error = %e, "Skipping malformed feed item");
                rejected.push(BookError::ItemParse {
                    kind,
                    key,
                    reason: e.to_string(),
                });
            }
        }
    }

    (decoded, rejected)
}

// ---------------------------------------------------------------------------
// Feed trait
// ---------------------------------------------------------------------------

/// Abstraction over the external odds provider.
///
/// Implementors perform no retries: a failed fetch surfaces as
/// `BookError::FeedUnavailable` and the next scheduled cycle tries again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsFeed: Send + Sync {
    /// Fetch the current sports and events.
    ///
    /// `tracked_sports` are sports with stored events still awaiting a
    /// result. Their scores are fetched even when the sport no longer
    /// appears among upcoming odds.
    async fn fetch_snapshot(&self, tracked_sports: &[String]) -> BookResult<FeedSnapshot>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
