//! Core engine: synchronization, bets and the wallet ledger.
//!
//! Feed snapshot → `Synchronizer` → (event completed) → `bets` settlement
//! → `ledger` credit. Bet placement goes straight to `bets` → `ledger`.

pub mod bets;
pub mod ledger;
pub mod synchronizer;

pub use bets::{BetEngine, SettledBet, SettlementReport};
pub use ledger::{Ledger, LedgerAudit};
pub use synchronizer::{SyncOutcome, SyncReport, Synchronizer};
