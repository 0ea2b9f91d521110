//! In-memory store.
//!
//! All entities live in one [`Tables`] value behind a single writer lock,
//! so every unit of work (and therefore every wallet mutation) is
//! serialized. Writes go through a [`Journal`] that records the previous
//! value of each row it touches; dropping the journal without committing
//! replays that log in reverse.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Repository, StoreRead, UnitOfWork};
use crate::types::{
    Bet, BetId, BookResult, BetStatus, Event, EventId, Market, MarketId, MarketOption, OptionId,
    Sport, User, UserId, Wallet, WalletId,
};

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Lookup indexes over natural keys. Rebuilt after deserialization.
#[derive(Debug, Default, Clone)]
struct Indexes {
    event_by_external: HashMap<String, EventId>,
    market_by_key: HashMap<(EventId, String, String), MarketId>,
    markets_by_event: HashMap<EventId, Vec<MarketId>>,
    option_by_key: HashMap<(MarketId, String), OptionId>,
    user_by_external: HashMap<String, UserId>,
    bets_by_event: HashMap<EventId, Vec<BetId>>,
    bets_by_user: HashMap<UserId, Vec<BetId>>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    sports: HashMap<String, Sport>,
    #[serde(default)]
    events: HashMap<EventId, Event>,
    #[serde(default)]
    markets: HashMap<MarketId, Market>,
    #[serde(default)]
    options: HashMap<OptionId, MarketOption>,
    #[serde(default)]
    users: HashMap<UserId, User>,
    #[serde(default)]
    wallets: HashMap<WalletId, Wallet>,
    #[serde(default)]
    bets: HashMap<BetId, Bet>,
    #[serde(skip)]
    indexes: Indexes,
}

/// Previous state of a row touched by a journal.
#[derive(Debug)]
enum Undo {
    Sport(String, Option<Sport>),
    Event(EventId, Option<Event>),
    Market(MarketId, Option<Market>),
    Option(OptionId, Option<MarketOption>),
    User(UserId, Option<User>),
    Wallet(WalletId, Option<Wallet>),
    Bet(BetId, Option<Bet>),
}

impl Tables {
    fn reindex(&mut self) {
        let mut idx = Indexes::default();
        for event in self.events.values() {
            idx.event_by_external.insert(event.external_id.clone(), event.id);
        }
        for market in self.markets.values() {
            idx.market_by_key.insert(
                (market.event_id, market.source.clone(), market.name.clone()),
                market.id,
            );
            idx.markets_by_event
                .entry(market.event_id)
                .or_default()
                .push(market.id);
        }
        for option in self.options.values() {
            idx.option_by_key
                .insert((option.market_id, option.name.clone()), option.id);
        }
        for user in self.users.values() {
            idx.user_by_external.insert(user.external_id.clone(), user.id);
        }
        for bet in self.bets.values() {
            index_bet(&mut idx, bet);
        }
        self.indexes = idx;
    }

    /// Undo a single write. Rows that did not exist before are removed
    /// along with their index entries; keys are immutable, so restoring a
    /// previous version leaves the indexes as they are.
    fn restore(&mut self, undo: Undo) {
        match undo {
            Undo::Sport(key, prev) => match prev {
                Some(sport) => {
                    self.sports.insert(key, sport);
                }
                None => {
                    self.sports.remove(&key);
                }
            },
            Undo::Event(id, prev) => match prev {
                Some(event) => {
                    self.events.insert(id, event);
                }
                None => {
                    if let Some(event) = self.events.remove(&id) {
                        self.indexes.event_by_external.remove(&event.external_id);
                    }
                }
            },
            Undo::Market(id, prev) => match prev {
                Some(market) => {
                    self.markets.insert(id, market);
                }
                None => {
                    if let Some(m) = self.markets.remove(&id) {
                        if let Some(ids) = self.indexes.markets_by_event.get_mut(&m.event_id) {
                            ids.retain(|mid| *mid != id);
                        }
                        self.indexes
                            .market_by_key
                            .remove(&(m.event_id, m.source, m.name));
                    }
                }
            },
            Undo::Option(id, prev) => match prev {
                Some(option) => {
                    self.options.insert(id, option);
                }
                None => {
                    if let Some(o) = self.options.remove(&id) {
                        self.indexes.option_by_key.remove(&(o.market_id, o.name));
                    }
                }
            },
            Undo::User(id, prev) => match prev {
                Some(user) => {
                    self.users.insert(id, user);
                }
                None => {
                    if let Some(u) = self.users.remove(&id) {
                        self.indexes.user_by_external.remove(&u.external_id);
                    }
                }
            },
            Undo::Wallet(id, prev) => match prev {
                Some(wallet) => {
                    self.wallets.insert(id, wallet);
                }
                None => {
                    self.wallets.remove(&id);
                }
            },
            Undo::Bet(id, prev) => match prev {
                Some(bet) => {
                    self.bets.insert(id, bet);
                }
                None => {
                    if let Some(bet) = self.bets.remove(&id) {
                        unindex_bet(&mut self.indexes, &bet);
                    }
                }
            },
        }
    }
}

fn index_bet(idx: &mut Indexes, bet: &Bet) {
    let mut seen: Vec<EventId> = Vec::with_capacity(bet.legs.len());
    for leg in &bet.legs {
        if !seen.contains(&leg.event_id) {
            seen.push(leg.event_id);
            idx.bets_by_event.entry(leg.event_id).or_default().push(bet.id);
        }
    }
    idx.bets_by_user.entry(bet.user_id).or_default().push(bet.id);
}

fn unindex_bet(idx: &mut Indexes, bet: &Bet) {
    for leg in &bet.legs {
        if let Some(ids) = idx.bets_by_event.get_mut(&leg.event_id) {
            ids.retain(|id| *id != bet.id);
        }
    }
    if let Some(ids) = idx.bets_by_user.get_mut(&bet.user_id) {
        ids.retain(|id| *id != bet.id);
    }
}

impl StoreRead for Tables {
    fn sport(&self, key: &str) -> BookResult<Option<Sport>> {
        Ok(self.sports.get(key).cloned())
    }

    fn event(&self, id: EventId) -> BookResult<Option<Event>> {
        Ok(self.events.get(&id).cloned())
    }

    fn event_by_external_id(&self, external_id: &str) -> BookResult<Option<Event>> {
        Ok(self
            .indexes
            .event_by_external
            .get(external_id)
            .and_then(|id| self.events.get(id))
            .cloned())
    }

    fn events_awaiting_result(&self, now: DateTime<Utc>) -> BookResult<Vec<Event>> {
        Ok(self
            .events
            .values()
            .filter(|e| !e.completed && e.start_time <= now)
            .cloned()
            .collect())
    }

    fn market(&self, id: MarketId) -> BookResult<Option<Market>> {
        Ok(self.markets.get(&id).cloned())
    }

    fn find_market(
        &self,
        event_id: EventId,
        source: &str,
        name: &str,
    ) -> BookResult<Option<Market>> {
        let key = (event_id, source.to_string(), name.to_string());
        Ok(self
            .indexes
            .market_by_key
            .get(&key)
            .and_then(|id| self.markets.get(id))
            .cloned())
    }

    fn markets_for_event(&self, event_id: EventId) -> BookResult<Vec<Market>> {
        let Some(ids) = self.indexes.markets_by_event.get(&event_id) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| self.markets.get(id)).cloned().collect())
    }

    fn option(&self, id: OptionId) -> BookResult<Option<MarketOption>> {
        Ok(self.options.get(&id).cloned())
    }

    fn find_option(&self, market_id: MarketId, name: &str) -> BookResult<Option<MarketOption>> {
        Ok(self
            .indexes
            .option_by_key
            .get(&(market_id, name.to_string()))
            .and_then(|id| self.options.get(id))
            .cloned())
    }

    fn user(&self, id: UserId) -> BookResult<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    fn user_by_external_id(&self, external_id: &str) -> BookResult<Option<User>> {
        Ok(self
            .indexes
            .user_by_external
            .get(external_id)
            .and_then(|id| self.users.get(id))
            .cloned())
    }

    fn wallet(&self, id: WalletId) -> BookResult<Option<Wallet>> {
        Ok(self.wallets.get(&id).cloned())
    }

    fn bet(&self, id: BetId) -> BookResult<Option<Bet>> {
        Ok(self.bets.get(&id).cloned())
    }

    fn pending_bets_on_event(&self, event_id: EventId) -> BookResult<Vec<Bet>> {
        let Some(ids) = self.indexes.bets_by_event.get(&event_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.bets.get(id))
            .filter(|bet| bet.status == BetStatus::Pending)
            .cloned()
            .collect())
    }

    fn bets_for_user(&self, user_id: UserId) -> BookResult<Vec<Bet>> {
        let Some(ids) = self.indexes.bets_by_user.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| self.bets.get(id)).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// A unit of work over [`Tables`]. Rolls back on drop unless committed.
pub struct Journal<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'a> Journal<'a> {
    fn new(tables: &'a mut Tables) -> Self {
        Self {
            tables,
            undo: Vec::new(),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Journal<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(undo) = self.undo.pop() {
            self.tables.restore(undo);
        }
    }
}

impl StoreRead for Journal<'_> {
    fn sport(&self, key: &str) -> BookResult<Option<Sport>> {
        self.tables.sport(key)
    }
    fn event(&self, id: EventId) -> BookResult<Option<Event>> {
        self.tables.event(id)
    }
    fn event_by_external_id(&self, external_id: &str) -> BookResult<Option<Event>> {
        self.tables.event_by_external_id(external_id)
    }
    fn events_awaiting_result(&self, now: DateTime<Utc>) -> BookResult<Vec<Event>> {
        self.tables.events_awaiting_result(now)
    }
    fn market(&self, id: MarketId) -> BookResult<Option<Market>> {
        self.tables.market(id)
    }
    fn find_market(
        &self,
        event_id: EventId,
        source: &str,
        name: &str,
    ) -> BookResult<Option<Market>> {
        self.tables.find_market(event_id, source, name)
    }
    fn markets_for_event(&self, event_id: EventId) -> BookResult<Vec<Market>> {
        self.tables.markets_for_event(event_id)
    }
    fn option(&self, id: OptionId) -> BookResult<Option<MarketOption>> {
        self.tables.option(id)
    }
    fn find_option(&self, market_id: MarketId, name: &str) -> BookResult<Option<MarketOption>> {
        self.tables.find_option(market_id, name)
    }
    fn user(&self, id: UserId) -> BookResult<Option<User>> {
        self.tables.user(id)
    }
    fn user_by_external_id(&self, external_id: &str) -> BookResult<Option<User>> {
        self.tables.user_by_external_id(external_id)
    }
    fn wallet(&self, id: WalletId) -> BookResult<Option<Wallet>> {
        self.tables.wallet(id)
    }
    fn bet(&self, id: BetId) -> BookResult<Option<Bet>> {
        self.tables.bet(id)
    }
    fn pending_bets_on_event(&self, event_id: EventId) -> BookResult<Vec<Bet>> {
        self.tables.pending_bets_on_event(event_id)
    }
    fn bets_for_user(&self, user_id: UserId) -> BookResult<Vec<Bet>> {
        self.tables.bets_for_user(user_id)
    }
}

impl UnitOfWork for Journal<'_> {
    fn save_sport(&mut self, sport: Sport) -> BookResult<()> {
        let key = sport.key.clone();
        let prev = self.tables.sports.insert(key.clone(), sport);
        self.undo.push(Undo::Sport(key, prev));
        Ok(())
    }

    fn save_event(&mut self, event: Event) -> BookResult<()> {
        let id = event.id;
        let external_id = event.external_id.clone();
        let prev = self.tables.events.insert(id, event);
        if prev.is_none() {
            self.tables.indexes.event_by_external.insert(external_id, id);
        }
        self.undo.push(Undo::Event(id, prev));
        Ok(())
    }

    fn save_market(&mut self, market: Market) -> BookResult<()> {
        let id = market.id;
        let event_id = market.event_id;
        let key = (event_id, market.source.clone(), market.name.clone());
        let prev = self.tables.markets.insert(id, market);
        if prev.is_none() {
            self.tables.indexes.market_by_key.insert(key, id);
            self.tables
                .indexes
                .markets_by_event
                .entry(event_id)
                .or_default()
                .push(id);
        }
        self.undo.push(Undo::Market(id, prev));
        Ok(())
    }

    fn save_option(&mut self, option: MarketOption) -> BookResult<()> {
        let id = option.id;
        let key = (option.market_id, option.name.clone());
        let prev = self.tables.options.insert(id, option);
        if prev.is_none() {
            self.tables.indexes.option_by_key.insert(key, id);
        }
        self.undo.push(Undo::Option(id, prev));
        Ok(())
    }

    fn save_user(&mut self, user: User) -> BookResult<()> {
        let id = user.id;
        let external_id = user.external_id.clone();
        let prev = self.tables.users.insert(id, user);
        if prev.is_none() {
            self.tables.indexes.user_by_external.insert(external_id, id);
        }
        self.undo.push(Undo::User(id, prev));
        Ok(())
    }

    fn save_wallet(&mut self, wallet: Wallet) -> BookResult<()> {
        let id = wallet.id;
        let prev = self.tables.wallets.insert(id, wallet);
        self.undo.push(Undo::Wallet(id, prev));
        Ok(())
    }

    fn save_bet(&mut self, bet: Bet) -> BookResult<()> {
        let id = bet.id;
        if !self.tables.bets.contains_key(&id) {
            index_bet(&mut self.tables.indexes, &bet);
        }
        let prev = self.tables.bets.insert(id, bet);
        self.undo.push(Undo::Bet(id, prev));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Row counts, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sports: usize,
    pub events: usize,
    pub markets: usize,
    pub options: usize,
    pub users: usize,
    pub wallets: usize,
    pub bets: usize,
}

/// In-process [`Repository`] with a single writer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        let t = self.tables.read();
        StoreStats {
            sports: t.sports.len(),
            events: t.events.len(),
            markets: t.markets.len(),
            options: t.options.len(),
            users: t.users.len(),
            wallets: t.wallets.len(),
            bets: t.bets.len(),
        }
    }

    /// Every wallet in the store. Used by audits and tests.
    pub fn wallets(&self) -> Vec<Wallet> {
        self.tables.read().wallets.values().cloned().collect()
    }

    /// Every event in the store.
    pub fn events(&self) -> Vec<Event> {
        self.tables.read().events.values().cloned().collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.tables.read())
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut tables: Tables = serde_json::from_str(json)?;
        tables.reindex();
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }
}

impl Repository for MemoryStore {
    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn UnitOfWork) -> BookResult<T>,
    ) -> BookResult<T> {
        let mut guard = self.tables.write();
        let mut journal = Journal::new(&mut guard);
        let value = f(&mut journal)?;
        journal.commit();
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&dyn StoreRead) -> BookResult<T>) -> BookResult<T> {
        let guard = self.tables.read();
        f(&*guard)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
