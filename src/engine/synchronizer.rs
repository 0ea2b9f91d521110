//! Market synchronizer: reconciles feed snapshots into the store.
//!
//! Each sport and each event in a snapshot is applied in its own unit of
//! work, so one bad item never blocks its siblings and a cancelled run
//! keeps whatever already committed. The event unit covers the event row,
//! its markets and options, score updates and, when the feed first reports
//! the event as completed, the settlement of every bet on it.
//!
//! Applying the same snapshot twice writes nothing the second time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::bets::{settle_event_in, SettlementReport};
use crate::feed::{unix_to_datetime, EventData, FeedSnapshot, MarketData, OddsFeed, Score, SportData};
use crate::storage::{Repository, StoreRead, UnitOfWork};
use crate::types::{
    BookError, BookResult, Event, EventId, EventResult, Market, MarketId, MarketOption, OptionId,
    ScoreUpdate, Sport, DRAW_SELECTION, ODDS_SCALE,
};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What one synchronization run changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub sports_created: usize,
    pub sports_updated: usize,
    pub events_created: usize,
    pub events_updated: usize,
    pub markets_created: usize,
    pub markets_updated: usize,
    pub options_created: usize,
    pub options_updated: usize,
    pub score_updates_appended: usize,
    pub events_completed: usize,
    pub settlements: Vec<SettlementReport>,
    /// Items skipped in this run, with the reason.
    pub rejected: Vec<BookError>,
}

impl SyncReport {
    /// Number of rows inserted or modified.
    pub fn rows_written(&self) -> usize {
        self.sports_created
            + self.sports_updated
            + self.events_created
            + self.events_updated
            + self.markets_created
            + self.markets_updated
            + self.options_created
            + self.options_updated
            + self.score_updates_appended
    }

    pub fn bets_settled(&self) -> usize {
        self.settlements.iter().map(|s| s.settled.len()).sum()
    }

    fn absorb(&mut self, other: SyncReport) {
        self.sports_created += other.sports_created;
        self.sports_updated += other.sports_updated;
        self.events_created += other.events_created;
        self.events_updated += other.events_updated;
        self.markets_created += other.markets_created;
        self.markets_updated += other.markets_updated;
        self.options_created += other.options_created;
        self.options_updated += other.options_updated;
        self.score_updates_appended += other.score_updates_appended;
        self.events_completed += other.events_completed;
        self.settlements.extend(other.settlements);
        self.rejected.extend(other.rejected);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another run was still in progress.
    Skipped,
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

pub struct Synchronizer<R: Repository> {
    store: Arc<R>,
    feed: Box<dyn OddsFeed>,
    running: Mutex<()>,
}

impl<R: Repository> Synchronizer<R> {
    pub fn new(store: Arc<R>, feed: Box<dyn OddsFeed>) -> Self {
        Self {
            store,
            feed,
            running: Mutex::new(()),
        }
    }

    /// Fetch one snapshot and apply it.
    ///
    /// Returns `Skipped` immediately if a previous run has not finished.
    /// A feed failure aborts the run before anything is written.
    pub async fn run_synchronization(&self) -> BookResult<SyncOutcome> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Synchronization already in progress, skipping this run");
            return Ok(SyncOutcome::Skipped);
        };

        let tracked = self.tracked_sports(Utc::now())?;
        let snapshot = match self.feed.fetch_snapshot(&tracked).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Feed fetch failed, aborting synchronization");
                return Err(e);
            }
        };

        Ok(SyncOutcome::Completed(self.apply_snapshot(&snapshot, Utc::now())))
    }

    /// Sport keys of stored events that have started without a result.
    /// Finished games drop out of the upcoming odds, so their scores have
    /// to be asked for by sport.
    pub fn tracked_sports(&self, now: DateTime<Utc>) -> BookResult<Vec<String>> {
        let keys: BTreeSet<String> = self.store.read(|r| {
            Ok(r.events_awaiting_result(now)?
                .into_iter()
                .map(|e| e.sport_key)
                .collect())
        })?;
        if !keys.is_empty() {
            debug!(sports = ?keys, "Tracking unfinished events");
        }
        Ok(keys.into_iter().collect())
    }

    /// Reconcile a snapshot against the store as of `now`.
    pub fn apply_snapshot(&self, snapshot: &FeedSnapshot, now: DateTime<Utc>) -> SyncReport {
        let mut report = SyncReport {
            rejected: snapshot.rejected.clone(),
            ..SyncReport::default()
        };

        for data in &snapshot.sports {
            match self.store.transaction(|uow| upsert_sport(uow, data)) {
                Ok(Change::Created) => report.sports_created += 1,
                Ok(Change::Updated) => report.sports_updated += 1,
                Ok(Change::Unchanged) => {}
                Err(e) => {
                    warn!(sport = %data.key, error = %e, "Sport skipped");
                    report.rejected.push(e);
                }
            }
        }

        for data in &snapshot.events {
            match self.store.transaction(|uow| sync_event(uow, data, now)) {
                Ok(delta) => report.absorb(delta),
                Err(e) => {
                    warn!(event = %data.id, error = %e, "Event skipped");
                    report.rejected.push(e);
                }
            }
        }

        info!(
            sports = snapshot.sports.len(),
            events = snapshot.events.len(),
            rows_written = report.rows_written(),
            events_created = report.events_created,
            options_updated = report.options_updated,
            completed = report.events_completed,
            bets_settled = report.bets_settled(),
            rejected = report.rejected.len(),
            "Synchronization complete"
        );

        report
    }
}

// ---------------------------------------------------------------------------
// Per-item units of work
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Updated,
    Unchanged,
}

fn item_error(kind: &'static str, key: &str, reason: impl Into<String>) -> BookError {
    BookError::ItemParse {
        kind,
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn upsert_sport(uow: &mut dyn UnitOfWork, data: &SportData) -> BookResult<Change> {
    if data.key.trim().is_empty() {
        return Err(item_error("sport", &data.key, "empty key"));
    }

    let incoming = Sport {
        key: data.key.clone(),
        title: data.title.clone(),
        description: data.description.clone(),
        group: data.group.clone(),
        active: data.active,
        has_outrights: data.has_outrights,
    };

    match uow.sport(&data.key)? {
        None => {
            debug!(sport = %incoming, "New sport");
            uow.save_sport(incoming)?;
            Ok(Change::Created)
        }
        Some(existing) if existing == incoming => Ok(Change::Unchanged),
        Some(_) => {
            uow.save_sport(incoming)?;
            Ok(Change::Updated)
        }
    }
}

/// Apply one feed event. Returns the counts for this event only.
fn sync_event(
    uow: &mut dyn UnitOfWork,
    data: &EventData,
    now: DateTime<Utc>,
) -> BookResult<SyncReport> {
    let mut delta = SyncReport::default();

    let start = data.start_time().ok_or_else(|| {
        item_error("event", &data.id, format!("invalid commence_time {}", data.commence_time))
    })?;
    if uow.sport(&data.sport_key)?.is_none() {
        return Err(item_error(
            "event",
            &data.id,
            format!("unknown sport '{}'", data.sport_key),
        ));
    }

    // A new event is saved up front so its markets can point at it
    let (mut event, created) = match uow.event_by_external_id(&data.id)? {
        Some(existing) => (existing, false),
        None => {
            let event = Event {
                id: EventId::new(),
                external_id: data.id.clone(),
                sport_key: data.sport_key.clone(),
                home_team: data.home_team.clone(),
                away_team: data.away_team.clone(),
                start_time: start,
                is_live: Event::live_at(start, now),
                completed: false,
                result: None,
                score_updates: Vec::new(),
            };
            debug!(event = %event, "New event");
            uow.save_event(event.clone())?;
            delta.events_created += 1;
            (event, true)
        }
    };
    // Row as currently stored
    let baseline = event.clone();

    event.start_time = start;
    event.is_live = Event::live_at(start, now);

    // Prices are frozen once the event is completed locally
    if !event.completed {
        for bookmaker in data.bookmakers.iter().flatten() {
            for market in &bookmaker.markets {
                match parse_market(&event.external_id, &bookmaker.key, market) {
                    Ok(parsed) => apply_market(uow, &event, parsed, &mut delta)?,
                    Err(e) => {
                        warn!(error = %e, "Market skipped");
                        delta.rejected.push(e);
                    }
                }
            }
        }
    }

    if let (Some(scores), Some(timestamp)) = (&data.scores, data.last_update_time()) {
        for score in scores {
            let appended = event.append_score_update(ScoreUpdate {
                name: score.name.clone(),
                score: score.score.clone(),
                timestamp,
            });
            if appended {
                delta.score_updates_appended += 1;
            }
        }
    }

    let completing = data.is_completed() && !event.completed;
    if completing {
        event.completed = true;
        event.result = decide_result(&*uow, &event, data.scores.as_deref())?;
    }

    if event != baseline {
        uow.save_event(event.clone())?;
        if !created {
            delta.events_updated += 1;
        }
    }

    if completing {
        info!(event = %event, result = ?event.result, "Event completed");
        delta.events_completed += 1;
        delta.settlements.push(settle_event_in(uow, event.id)?);
    }

    Ok(delta)
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// A feed market that passed validation.
#[derive(Debug, Clone, PartialEq)]
struct ParsedMarket {
    source: String,
    name: String,
    updated_at: DateTime<Utc>,
    /// (option name, odds) in feed order.
    outcomes: Vec<(String, Decimal)>,
}

/// Validate a feed market before anything is written for it.
fn parse_market(event_key: &str, source: &str, market: &MarketData) -> BookResult<ParsedMarket> {
    let key = format!("{event_key}/{source}/{}", market.key);

    let updated_at = unix_to_datetime(market.last_update)
        .ok_or_else(|| item_error("market", &key, format!("invalid last_update {}", market.last_update)))?;
    if market.outcomes.is_empty() {
        return Err(item_error("market", &key, "no outcomes"));
    }

    let mut seen = HashSet::with_capacity(market.outcomes.len());
    let mut outcomes = Vec::with_capacity(market.outcomes.len());
    for outcome in &market.outcomes {
        if !seen.insert(outcome.name.as_str()) {
            return Err(item_error(
                "market",
                &key,
                format!("duplicate outcome '{}'", outcome.name),
            ));
        }
        if !outcome.price.is_finite() || outcome.price < 1.0 {
            return Err(item_error(
                "market",
                &key,
                format!("invalid price {} for '{}'", outcome.price, outcome.name),
            ));
        }
        let odds = Decimal::try_from(outcome.price)
            .map_err(|e| item_error("market", &key, format!("price {}: {e}", outcome.price)))?
            .round_dp(ODDS_SCALE);
        outcomes.push((outcome.name.clone(), odds));
    }

    Ok(ParsedMarket {
        source: source.to_string(),
        name: market.key.clone(),
        updated_at,
        outcomes,
    })
}

fn apply_market(
    uow: &mut dyn UnitOfWork,
    event: &Event,
    parsed: ParsedMarket,
    delta: &mut SyncReport,
) -> BookResult<()> {
    let ts = parsed.updated_at;

    let Some(mut market) = uow.find_market(event.id, &parsed.source, &parsed.name)? else {
        let market_id = MarketId::new();
        let mut option_ids = Vec::with_capacity(parsed.outcomes.len());
        for (name, odds) in parsed.outcomes {
            let option = MarketOption {
                id: OptionId::new(),
                market_id,
                name,
                odds,
                last_updated: Some(ts),
            };
            option_ids.push(option.id);
            uow.save_option(option)?;
            delta.options_created += 1;
        }
        uow.save_market(Market {
            id: market_id,
            event_id: event.id,
            source: parsed.source,
            name: parsed.name,
            is_live: event.is_live,
            last_updated: Some(ts),
            option_ids,
        })?;
        delta.markets_created += 1;
        return Ok(());
    };

    let mut changed = market.is_live != event.is_live;
    market.is_live = event.is_live;

    let newer = market.last_updated.map_or(true, |stored| ts > stored);
    if newer {
        for (name, odds) in parsed.outcomes {
            match uow.find_option(market.id, &name)? {
                Some(mut option) => {
                    if option.last_updated.map_or(true, |stored| ts > stored) {
                        debug!(option = %option, new_odds = %odds, "Odds update");
                        option.odds = odds;
                        option.last_updated = Some(ts);
                        uow.save_option(option)?;
                        delta.options_updated += 1;
                    }
                }
                None => {
                    let option = MarketOption {
                        id: OptionId::new(),
                        market_id: market.id,
                        name,
                        odds,
                        last_updated: Some(ts),
                    };
                    market.option_ids.push(option.id);
                    uow.save_option(option)?;
                    delta.options_created += 1;
                }
            }
        }
        market.last_updated = Some(ts);
        changed = true;
    } else {
        debug!(
            event = %event.external_id,
            source = %market.source,
            market = %market.name,
            "Stale market data ignored"
        );
    }

    if changed {
        uow.save_market(market)?;
        delta.markets_updated += 1;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Work out the result of a completed event from its final scores.
///
/// Missing or non-numeric scores give `None` (void). Level scores count as
/// a draw only when a draw was offered on the event; otherwise they are
/// void too.
fn decide_result<S: StoreRead + ?Sized>(
    store: &S,
    event: &Event,
    feed_scores: Option<&[Score]>,
) -> BookResult<Option<EventResult>> {
    let (Some(home), Some(away)) = (
        final_score(event, feed_scores, &event.home_team),
        final_score(event, feed_scores, &event.away_team),
    ) else {
        warn!(event = %event.external_id, "No usable final score, event is void");
        return Ok(None);
    };

    let result = if home > away {
        Some(EventResult::HomeTeamWin)
    } else if home < away {
        Some(EventResult::AwayTeamWin)
    } else if draw_offered(store, event.id)? {
        Some(EventResult::Draw)
    } else {
        warn!(event = %event.external_id, score = %home, "Level score without a draw market, event is void");
        None
    };
    Ok(result)
}

/// Score for `team` from the feed, falling back to the latest stored update.
fn final_score(event: &Event, feed_scores: Option<&[Score]>, team: &str) -> Option<Decimal> {
    let raw = match feed_scores {
        Some(scores) => scores.iter().find(|s| s.name == team).map(|s| s.score.as_str()),
        None => event
            .score_updates
            .iter()
            .rev()
            .find(|s| s.name == team)
            .map(|s| s.score.as_str()),
    }?;
    raw.trim().parse::<Decimal>().ok()
}

fn draw_offered<S: StoreRead + ?Sized>(store: &S, event_id: EventId) -> BookResult<bool> {
    for market in store.markets_for_event(event_id)? {
        for option_id in &market.option_ids {
            if let Some(option) = store.option(*option_id)? {
                if option.name.eq_ignore_ascii_case(DRAW_SELECTION) {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
