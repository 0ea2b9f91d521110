//! The Odds API integration.
//!
//! API docs: https://the-odds-api.com/liveapi/guides/v4/
//! Base URL: https://api.the-odds-api.com/v4
//! Auth: `apiKey` query parameter. Every request costs quota, so one
//! snapshot is three kinds of call: sports, upcoming odds, and scores for
//! each sport that has events in the odds response or stored events still
//! waiting on a result.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{decode_items, EventData, FeedSnapshot, OddsFeed, SportData};
use crate::config::FeedConfig;
use crate::types::{BookError, BookResult};

/// Odds API client.
pub struct OddsApiClient {
    http: Client,
    api_key: SecretString,
    api_base: String,
    markets: Vec<String>,
    bookmakers: Vec<String>,
    fetch_scores: bool,
    scores_days_from: u32,
}

impl OddsApiClient {
    pub fn new(cfg: &FeedConfig, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent("oddsbook/0.1.0")
            .build()
            .context("Failed to build HTTP client for The Odds API")?;

        Ok(Self {
            http,
            api_key,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            markets: cfg.markets.clone(),
            bookmakers: cfg.bookmakers.clone(),
            fetch_scores: cfg.fetch_scores,
            scores_days_from: cfg.scores_days_from,
        })
    }

    // -- Paths (without the key, safe to log) ----------------------------

    fn sports_path(&self) -> String {
        "/sports/?".to_string()
    }

    fn odds_path(&self) -> String {
        format!(
            "/sports/upcoming/odds/?markets={}&bookmakers={}&dateFormat=unix&",
            urlencoding::encode(&self.markets.join(",")),
            urlencoding::encode(&self.bookmakers.join(",")),
        )
    }

    fn scores_path(&self, sport_key: &str) -> String {
        format!(
            "/sports/{}/scores/?daysFrom={}&dateFormat=unix&",
            urlencoding::encode(sport_key),
            self.scores_days_from,
        )
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{path}apiKey={}",
            self.api_base,
            urlencoding::encode(self.api_key.expose_secret())
        )
    }

    // -- Requests --------------------------------------------------------

    /// GET a JSON array, keeping elements raw so they decode one by one.
    async fn get_list(&self, path: &str) -> BookResult<Vec<serde_json::Value>> {
        debug!(path, "Fetching from The Odds API");

        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| BookError::FeedUnavailable(format!("request to {path} failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BookError::FeedUnavailable(format!(
                "{path} returned {status}: {body}"
            )));
        }

        if let Some(remaining) = resp
            .headers()
            .get("x-requests-remaining")
            .and_then(|v| v.to_str().ok())
        {
            debug!(path, remaining, "Odds API quota");
        }

        resp.json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| BookError::FeedUnavailable(format!("{path} returned invalid JSON: {e}")))
    }

    /// Scores for one sport. Failures are logged and yield nothing.
    async fn fetch_scores_for(&self, sport_key: &str) -> Vec<serde_json::Value> {
        match self.get_list(&self.scores_path(sport_key)).await {
            Ok(items) => items,
            Err(e) => {
                warn!(sport = sport_key, error = %e, "Scores fetch failed, skipping sport");
                Vec::new()
            }
        }
    }
}

/// Sports whose scores are polled: those in the odds response plus the
/// tracked ones.
pub fn scores_sport_keys(events: &[EventData], tracked_sports: &[String]) -> BTreeSet<String> {
    events
        .iter()
        .map(|e| e.sport_key.clone())
        .chain(tracked_sports.iter().cloned())
        .collect()
}

/// Fold score records into the odds events by event id. Score records for
/// events missing from the odds response are appended as new events.
pub fn merge_scores(events: &mut Vec<EventData>, scores: Vec<EventData>) {
    for scored in scores {
        match events.iter_mut().find(|e| e.id == scored.id) {
            Some(event) => {
                if scored.completed.is_some() {
                    event.completed = scored.completed;
                }
                if scored.scores.is_some() {
                    event.scores = scored.scores;
                }
                if scored.last_update.is_some() {
                    event.last_update = scored.last_update;
                }
            }
            None => events.push(scored),
        }
    }
}

#[async_trait]
impl OddsFeed for OddsApiClient {
    async fn fetch_snapshot(&self, tracked_sports: &[String]) -> BookResult<FeedSnapshot> {
        let raw_sports = self.get_list(&self.sports_path()).await?;
        let raw_events = self.get_list(&self.odds_path()).await?;

        let (sports, mut rejected) = decode_items::<SportData>("sport", "key", raw_sports);
        let (mut events, event_rejects) = decode_items::<EventData>("event", "id", raw_events);
        rejected.extend(event_rejects);

        if self.fetch_scores {
            let sport_keys = scores_sport_keys(&events, tracked_sports);
            debug!(sports = ?sport_keys, "Fetching scores");
            let responses =
                join_all(sport_keys.iter().map(|key| self.fetch_scores_for(key))).await;

            let raw_scores: Vec<serde_json::Value> = responses.into_iter().flatten().collect();
            let (scores, score_rejects) = decode_items::<EventData>("score", "id", raw_scores);
            rejected.extend(score_rejects);
            merge_scores(&mut events, scores);
        }

        info!(
            sports = sports.len(),
            events = events.len(),
            rejected = rejected.len(),
            "Feed snapshot fetched"
        );

        Ok(FeedSnapshot {
            sports,
            events,
            rejected,
            fetched_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
