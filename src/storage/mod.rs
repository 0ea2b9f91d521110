//! Persistence layer.
//!
//! The engine talks to storage through two traits: [`StoreRead`] for
//! lookups and [`UnitOfWork`] for writes inside a transaction. A
//! [`Repository`] hands out units of work that commit together or not at
//! all. [`MemoryStore`] is the in-process implementation; its contents can
//! be saved to and restored from a JSON state file between runs.

pub mod memory;

pub use memory::{MemoryStore, StoreStats};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

use crate::types::{
    Bet, BetId, BookResult, Event, EventId, Market, MarketId, MarketOption, OptionId, Sport,
    User, UserId, Wallet, WalletId,
};

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "oddsbook_state.json";

/// Read access to every entity kind.
///
/// Natural keys (sport key, event external id, market (event, source,
/// name), option (market, name), user external id) never change once an
/// entity is saved.
pub trait StoreRead {
    fn sport(&self, key: &str) -> BookResult<Option<Sport>>;

    fn event(&self, id: EventId) -> BookResult<Option<Event>>;
    fn event_by_external_id(&self, external_id: &str) -> BookResult<Option<Event>>;
    /// Events that started at or before `now` and are not completed.
    fn events_awaiting_result(&self, now: DateTime<Utc>) -> BookResult<Vec<Event>>;

    fn market(&self, id: MarketId) -> BookResult<Option<Market>>;
    fn find_market(&self, event_id: EventId, source: &str, name: &str)
        -> BookResult<Option<Market>>;
    fn markets_for_event(&self, event_id: EventId) -> BookResult<Vec<Market>>;

    fn option(&self, id: OptionId) -> BookResult<Option<MarketOption>>;
    fn find_option(&self, market_id: MarketId, name: &str) -> BookResult<Option<MarketOption>>;

    fn user(&self, id: UserId) -> BookResult<Option<User>>;
    fn user_by_external_id(&self, external_id: &str) -> BookResult<Option<User>>;

    fn wallet(&self, id: WalletId) -> BookResult<Option<Wallet>>;

    fn bet(&self, id: BetId) -> BookResult<Option<Bet>>;
    /// PENDING bets with at least one leg on the event.
    fn pending_bets_on_event(&self, event_id: EventId) -> BookResult<Vec<Bet>>;
    fn bets_for_user(&self, user_id: UserId) -> BookResult<Vec<Bet>>;
}

/// Write access inside a transaction. `save_*` inserts or replaces.
pub trait UnitOfWork: StoreRead {
    fn save_sport(&mut self, sport: Sport) -> BookResult<()>;
    fn save_event(&mut self, event: Event) -> BookResult<()>;
    fn save_market(&mut self, market: Market) -> BookResult<()>;
    fn save_option(&mut self, option: MarketOption) -> BookResult<()>;
    fn save_user(&mut self, user: User) -> BookResult<()>;
    fn save_wallet(&mut self, wallet: Wallet) -> BookResult<()>;
    fn save_bet(&mut self, bet: Bet) -> BookResult<()>;
}

/// Transactional access to the store.
pub trait Repository: Send + Sync {
    /// Run `f` as one atomic unit: every write commits if it returns `Ok`,
    /// none do if it returns `Err`. Units of work are serialized.
    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn UnitOfWork) -> BookResult<T>,
    ) -> BookResult<T>;

    /// Point-in-time read-only view.
    fn read<T>(&self, f: impl FnOnce(&dyn StoreRead) -> BookResult<T>) -> BookResult<T>;
}

/// Save the whole store to a JSON file.
pub fn save_state(store: &MemoryStore, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = store.to_json().context("Failed to serialise store state")?;

    std::fs::write(path, &json).context(format!("Failed to write state to {path}"))?;

    debug!(path, bytes = json.len(), "State saved");
    Ok(())
}

/// Load a store from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<MemoryStore>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;

    let store =
        MemoryStore::from_json(&json).context(format!("Failed to parse state from {path}"))?;

    let stats = store.stats();
    info!(
        path,
        sports = stats.sports,
        events = stats.events,
        bets = stats.bets,
        wallets = stats.wallets,
        "State loaded from disk"
    );

    Ok(Some(store))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
