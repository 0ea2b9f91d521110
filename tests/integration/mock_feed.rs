//! Scripted feed for integration testing.
//!
//! Provides a deterministic `OddsFeed` that hands out queued snapshots
//! (or errors) in order, plus builders for feed-shaped test data and a
//! `Book` harness wiring the store, synchronizer, bet engine and ledger.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;

use oddsbook::engine::{BetEngine, Ledger, SyncReport, Synchronizer};
use oddsbook::feed::{Bookmaker, EventData, FeedSnapshot, MarketData, OddsFeed, OutcomeData, Score, SportData};
use oddsbook::storage::{MemoryStore, Repository};
use oddsbook::types::*;

// ---------------------------------------------------------------------------
// Scripted feed
// ---------------------------------------------------------------------------

/// Replays queued responses. An empty queue reports the feed as down.
#[derive(Clone, Default)]
pub struct ScriptedFeed {
    queue: Arc<Mutex<VecDeque<BookResult<FeedSnapshot>>>>,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, snapshot: FeedSnapshot) {
        self.queue.lock().push_back(Ok(snapshot));
    }

    pub fn push_error(&self, reason: &str) {
        self.queue
            .lock()
            .push_back(Err(BookError::FeedUnavailable(reason.to_string())));
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }

    /// Tracked sports passed to each fetch, in call order.
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl OddsFeed for ScriptedFeed {
    async fn fetch_snapshot(&self, tracked_sports: &[String]) -> BookResult<FeedSnapshot> {
        self.requests.lock().push(tracked_sports.to_vec());
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(BookError::FeedUnavailable("script exhausted".into())))
    }
}

// ---------------------------------------------------------------------------
// Feed data builders
// ---------------------------------------------------------------------------

pub const SPORT: &str = "soccer_epl";

pub fn sport() -> SportData {
    SportData {
        key: SPORT.into(),
        active: true,
        group: "Soccer".into(),
        description: "English Premier League".into(),
        title: "EPL".into(),
        has_outrights: false,
    }
}

/// An upcoming event with one bet365 h2h market.
pub fn fixture(id: &str, home: &str, away: &str, prices: &[(&str, f64)]) -> EventData {
    let now = Utc::now().timestamp();
    EventData {
        id: id.into(),
        sport_key: SPORT.into(),
        sport_title: "EPL".into(),
        commence_time: now + 86_400,
        home_team: home.into(),
        away_team: away.into(),
        bookmakers: Some(vec![Bookmaker {
            key: "bet365".into(),
            title: "Bet365".into(),
            last_update: Some(now - 60),
            markets: vec![MarketData {
                key: "h2h".into(),
                last_update: now - 60,
                outcomes: prices
                    .iter()
                    .map(|(name, price)| OutcomeData { name: name.to_string(), price: *price })
                    .collect(),
            }],
        }]),
        completed: Some(false),
        scores: None,
        last_update: None,
    }
}

/// The same event reported as finished with the given scores.
pub fn final_score(mut event: EventData, home_score: &str, away_score: &str) -> EventData {
    event.completed = Some(true);
    event.last_update = Some(event.commence_time + 7_200);
    event.scores = Some(vec![
        Score { name: event.home_team.clone(), score: home_score.into() },
        Score { name: event.away_team.clone(), score: away_score.into() },
    ]);
    event
}

pub fn snapshot(events: Vec<EventData>) -> FeedSnapshot {
    FeedSnapshot::new(vec![sport()], events)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Book {
    pub store: Arc<MemoryStore>,
    pub feed: ScriptedFeed,
    pub sync: Synchronizer<MemoryStore>,
    pub bets: BetEngine<MemoryStore>,
    pub ledger: Ledger<MemoryStore>,
}

impl Book {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        let feed = ScriptedFeed::new();
        Self {
            sync: Synchronizer::new(store.clone(), Box::new(feed.clone())),
            bets: BetEngine::new(store.clone(), 12),
            ledger: Ledger::new(store.clone()),
            feed,
            store,
        }
    }

    /// Apply a snapshot directly, bypassing the feed.
    pub fn apply(&self, events: Vec<EventData>) -> SyncReport {
        self.sync.apply_snapshot(&snapshot(events), Utc::now())
    }

    /// Open a wallet and fund it.
    pub fn funded_user(&self, external_id: &str, amount: Decimal) -> User {
        let user = self.ledger.open_wallet(external_id, None, None).unwrap();
        if amount > Decimal::ZERO {
            self.ledger.deposit(user.wallet_id, amount).unwrap();
        }
        user
    }

    /// Id of the bet365 h2h option `name` on feed event `external_id`.
    pub fn option(&self, external_id: &str, name: &str) -> OptionId {
        self.store
            .read(|r| {
                let event = r.event_by_external_id(external_id)?.unwrap();
                let market = r.find_market(event.id, "bet365", "h2h")?.unwrap();
                Ok(r.find_option(market.id, name)?.unwrap().id)
            })
            .unwrap()
    }

    pub fn event(&self, external_id: &str) -> Event {
        self.store
            .read(|r| r.event_by_external_id(external_id))
            .unwrap()
            .unwrap()
    }

    pub fn balance(&self, user: &User) -> Decimal {
        self.ledger.balance(user.wallet_id).unwrap()
    }

    /// Every wallet satisfies `balance == Σ amounts` and `balance ≥ 0`.
    pub fn assert_ledgers_consistent(&self) {
        for wallet in self.store.wallets() {
            assert!(
                wallet.is_consistent(),
                "wallet {} drifted: balance {} vs log {}",
                wallet.id,
                wallet.balance,
                wallet.ledger_sum()
            );
        }
    }
}
