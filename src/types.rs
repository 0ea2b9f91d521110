//! Shared types for the sportsbook core.
//!
//! These types form the data model used across all modules: the market
//! catalogue maintained by the synchronizer, and the wallets and bets
//! mutated by the bet engine. Relationships are expressed as ids; the
//! storage layer resolves them.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of decimal places money amounts are kept at.
pub const MONEY_SCALE: u32 = 2;

/// Number of decimal places odds are kept at.
pub const ODDS_SCALE: u32 = 4;

/// Truncate an amount to the money scale. Payouts never round up.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero)
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Internal id of an [`Event`] (distinct from the feed's external id).
    EventId
);
entity_id!(MarketId);
entity_id!(
    /// Id of a [`MarketOption`]; this is what bettors select.
    OptionId
);
entity_id!(UserId);
entity_id!(WalletId);
entity_id!(BetId);
entity_id!(TransactionId);

// ---------------------------------------------------------------------------
// Catalogue: sports, events, markets
// ---------------------------------------------------------------------------

/// A sport as published by the feed. Identity is the external key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sport {
    pub key: String,
    pub title: String,
    pub description: String,
    pub group: String,
    pub active: bool,
    pub has_outrights: bool,
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] ({}{})",
            self.title,
            self.key,
            self.group,
            if self.active { "" } else { ", inactive" }
        )
    }
}

/// Final outcome of a head-to-head event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventResult {
    HomeTeamWin,
    Draw,
    AwayTeamWin,
}

impl fmt::Display for EventResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventResult::HomeTeamWin => write!(f, "HOME_TEAM_WIN"),
            EventResult::Draw => write!(f, "DRAW"),
            EventResult::AwayTeamWin => write!(f, "AWAY_TEAM_WIN"),
        }
    }
}

/// Name the feed uses for the draw outcome in three-way markets.
pub const DRAW_SELECTION: &str = "Draw";

/// One score reading for one side of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub name: String,
    pub score: String,
    pub timestamp: DateTime<Utc>,
}

/// A sporting event. Created and updated only by the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Feed identifier; unique and stable across syncs.
    pub external_id: String,
    pub sport_key: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: DateTime<Utc>,
    pub is_live: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub result: Option<EventResult>,
    /// Append-only; unique by (name, timestamp).
    #[serde(default)]
    pub score_updates: Vec<ScoreUpdate>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (self.completed, self.is_live) {
            (true, _) => "completed",
            (false, true) => "live",
            (false, false) => "upcoming",
        };
        write!(
            f,
            "{} [{}] {} ({state})",
            self.name(),
            self.external_id,
            self.start_time.format("%Y-%m-%d %H:%M UTC"),
        )
    }
}

impl Event {
    /// Human readable "Home vs Away".
    pub fn name(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }

    /// Whether an event starting at `start` is live at `now`.
    pub fn live_at(start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= start
    }

    /// Append a score update unless one with the same (name, timestamp)
    /// already exists. Returns whether a record was appended.
    pub fn append_score_update(&mut self, update: ScoreUpdate) -> bool {
        let duplicate = self
            .score_updates
            .iter()
            .any(|s| s.name == update.name && s.timestamp == update.timestamp);
        if duplicate {
            return false;
        }
        self.score_updates.push(update);
        true
    }

    /// Map a market option name onto the result it backs.
    ///
    /// Returns `None` when the name is neither team nor the draw, i.e. the
    /// option cannot be graded against a head-to-head result.
    pub fn selection_for(&self, option_name: &str) -> Option<EventResult> {
        if option_name == self.home_team {
            Some(EventResult::HomeTeamWin)
        } else if option_name == self.away_team {
            Some(EventResult::AwayTeamWin)
        } else if option_name.eq_ignore_ascii_case(DRAW_SELECTION) {
            Some(EventResult::Draw)
        } else {
            None
        }
    }
}

/// A bookmaker market on an event (e.g. `h2h` from `bet365`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub event_id: EventId,
    /// Bookmaker key the prices came from.
    pub source: String,
    /// Market key, e.g. `h2h`.
    pub name: String,
    pub is_live: bool,
    pub last_updated: Option<DateTime<Utc>>,
    /// Options in feed order.
    pub option_ids: Vec<OptionId>,
}

/// A selectable outcome within a market, carrying the current price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOption {
    pub id: OptionId,
    pub market_id: MarketId,
    pub name: String,
    /// Current decimal odds.
    pub odds: Decimal,
    pub last_updated: Option<DateTime<Utc>>,
}

impl fmt::Display for MarketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.name, self.odds)
    }
}

// ---------------------------------------------------------------------------
// Users, wallets and the transaction log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub wallet_id: WalletId,
}

/// Ledger entry kind. The sign of a transaction amount follows its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    BetPlaced,
    BetWon,
    BetRefunded,
}

impl TransactionType {
    /// Whether this kind adds money to the wallet.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionType::Deposit | TransactionType::BetWon | TransactionType::BetRefunded
        )
    }

    /// Apply this kind's sign to a positive amount.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::BetPlaced => "BET_PLACED",
            TransactionType::BetWon => "BET_WON",
            TransactionType::BetRefunded => "BET_REFUNDED",
        };
        write!(f, "{s}")
    }
}

/// Immutable ledger entry. `amount` is already signed by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub amount: Decimal,
    pub kind: TransactionType,
    /// Bet this entry belongs to, for bet-related kinds.
    #[serde(default)]
    pub bet_id: Option<BetId>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:+} @ {}",
            self.kind,
            self.amount,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// A user's wallet: current balance plus the append-only log backing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Decimal,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wallet {} | balance={} | entries={}",
            self.id,
            self.balance,
            self.transactions.len()
        )
    }
}

impl Wallet {
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: WalletId::new(),
            user_id,
            balance: Decimal::ZERO,
            transactions: Vec::new(),
        }
    }

    /// Sum of all signed transaction amounts.
    pub fn ledger_sum(&self) -> Decimal {
        self.transactions.iter().map(|t| t.amount).sum()
    }

    /// `balance == Σ amounts` and `balance ≥ 0`.
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum() && self.balance >= Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Canceled,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Pending)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BetStatus::Pending => "PENDING",
            BetStatus::Won => "WON",
            BetStatus::Lost => "LOST",
            BetStatus::Canceled => "CANCELED",
        };
        write!(f, "{s}")
    }
}

/// One leg of a bet. `odds` is the price at placement, not a live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetOption {
    pub market_option_id: OptionId,
    /// Event the option belonged to at placement.
    pub event_id: EventId,
    pub odds: Decimal,
    pub status: BetStatus,
}

/// A single or multi-leg (parlay) bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub stake: Decimal,
    pub status: BetStatus,
    pub legs: Vec<BetOption>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bet {} | stake={} | legs={} | odds={} | {}",
            self.id,
            self.stake,
            self.legs.len(),
            self.combined_odds()
                .map_or_else(|| "overflow".to_string(), |odds| odds.to_string()),
            self.status
        )
    }
}

impl Bet {
    /// Product of the snapshot odds across all legs, or `None` if it does
    /// not fit in a `Decimal`.
    pub fn combined_odds(&self) -> Option<Decimal> {
        self.legs
            .iter()
            .try_fold(Decimal::ONE, |acc, leg| acc.checked_mul(leg.odds))
    }

    /// `stake × Π odds`, truncated to the money scale. Informational until
    /// the bet is won. `None` on overflow.
    pub fn potential_payout(&self) -> Option<Decimal> {
        self.combined_odds()
            .and_then(|odds| self.stake.checked_mul(odds))
            .map(round_money)
    }

    /// Aggregate status implied by the legs.
    ///
    /// Any lost leg loses the bet outright. Otherwise the bet waits while
    /// a leg is undecided, is canceled if a leg was voided, and wins only
    /// when every leg won.
    pub fn rollup(&self) -> BetStatus {
        let any = |s: BetStatus| self.legs.iter().any(|leg| leg.status == s);
        if any(BetStatus::Lost) {
            BetStatus::Lost
        } else if any(BetStatus::Pending) {
            BetStatus::Pending
        } else if any(BetStatus::Canceled) {
            BetStatus::Canceled
        } else {
            BetStatus::Won
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain error type shared by the feed, storage and engine modules.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookError {
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Malformed {kind} item '{key}': {reason}")]
    ItemParse {
        kind: &'static str,
        key: String,
        reason: String,
    },

    #[error("Invalid bet request: {0}")]
    InvalidBetRequest(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Integrity gap: {0}")]
    IntegrityGap(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BookError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        BookError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type BookResult<T> = std::result::Result<T, BookError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
