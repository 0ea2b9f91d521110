//! Bet engine: placement and settlement.
//!
//! Placement validates the request, snapshots the current odds of every
//! selection into PENDING legs and debits the stake, all in one unit of
//! work. Settlement grades the legs sitting on a completed event, rolls the
//! leg statuses up into the bet status and credits the wallet for bets that
//! reached WON or CANCELED. Only a PENDING bet can transition, so settling
//! the same event again moves no money.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::ledger;
use crate::storage::{Repository, StoreRead, UnitOfWork};
use crate::types::{
    Bet, BetId, BetOption, BetStatus, BookError, BookResult, Event, EventId, OptionId,
    TransactionType, UserId, MONEY_SCALE,
};

// ---------------------------------------------------------------------------
// Settlement report
// ---------------------------------------------------------------------------

/// A bet that reached a terminal status in a settlement pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledBet {
    pub bet_id: BetId,
    pub status: BetStatus,
    /// Amount credited to the wallet (zero for LOST).
    pub credited: Decimal,
}

/// Outcome of settling one event.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReport {
    pub event_id: EventId,
    pub settled: Vec<SettledBet>,
    /// Bets whose legs on this event were graded but that wait on other events.
    pub still_pending: Vec<BetId>,
    /// Bets found already terminal when re-read.
    pub already_settled: Vec<BetId>,
    /// Bets left untouched because a referenced row is missing.
    pub integrity_gaps: Vec<(BetId, String)>,
}

impl SettlementReport {
    fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            settled: Vec::new(),
            still_pending: Vec::new(),
            already_settled: Vec::new(),
            integrity_gaps: Vec::new(),
        }
    }

    pub fn total_credited(&self) -> Decimal {
        self.settled.iter().map(|s| s.credited).sum()
    }

    pub fn count(&self, status: BetStatus) -> usize {
        self.settled.iter().filter(|s| s.status == status).count()
    }
}

// ---------------------------------------------------------------------------
// Settlement (inside a unit of work)
// ---------------------------------------------------------------------------

/// Settle every PENDING bet with a leg on `event_id`.
///
/// Does nothing unless the event is completed. Runs inside the caller's
/// unit of work so the synchronizer can commit the completion edge and its
/// settlement together.
pub fn settle_event_in(
    uow: &mut dyn UnitOfWork,
    event_id: EventId,
) -> BookResult<SettlementReport> {
    let event = uow
        .event(event_id)?
        .ok_or_else(|| BookError::not_found("event", event_id))?;

    let mut report = SettlementReport::new(event_id);
    if !event.completed {
        debug!(event = %event.external_id, "Event not completed, nothing to settle");
        return Ok(report);
    }

    for candidate in uow.pending_bets_on_event(event_id)? {
        // Check-and-set: act only on the current row, and only if PENDING
        let Some(mut bet) = uow.bet(candidate.id)? else {
            continue;
        };
        if bet.status.is_terminal() {
            report.already_settled.push(bet.id);
            continue;
        }

        match grade_legs(&*uow, &event, &mut bet) {
            Ok(()) => {}
            Err(BookError::IntegrityGap(reason)) => {
                warn!(bet = %bet.id, event = %event.external_id, reason = %reason, "Bet left pending");
                report.integrity_gaps.push((bet.id, reason));
                continue;
            }
            Err(e) => return Err(e),
        }

        let status = bet.rollup();
        if status == BetStatus::Pending {
            uow.save_bet(bet.clone())?;
            report.still_pending.push(bet.id);
            continue;
        }

        let credited = match pay_out(uow, &bet, status) {
            Ok(amount) => amount,
            Err(BookError::IntegrityGap(reason)) => {
                warn!(bet = %bet.id, event = %event.external_id, reason = %reason, "Bet left pending");
                report.integrity_gaps.push((bet.id, reason));
                continue;
            }
            Err(e) => return Err(e),
        };

        bet.status = status;
        bet.settled_at = Some(Utc::now());
        uow.save_bet(bet.clone())?;

        debug!(bet = %bet.id, status = %status, credited = %credited, "Bet settled");
        report.settled.push(SettledBet {
            bet_id: bet.id,
            status,
            credited,
        });
    }

    if !report.settled.is_empty() || !report.integrity_gaps.is_empty() {
        info!(
            event = %event.external_id,
            result = ?event.result,
            won = report.count(BetStatus::Won),
            lost = report.count(BetStatus::Lost),
            canceled = report.count(BetStatus::Canceled),
            pending = report.still_pending.len(),
            gaps = report.integrity_gaps.len(),
            credited = %report.total_credited(),
            "Event settled"
        );
    }

    Ok(report)
}

/// Credit the wallet for a bet reaching `status`. Returns the amount
/// credited; an amount the ledger cannot hold is an integrity gap.
fn pay_out(uow: &mut dyn UnitOfWork, bet: &Bet, status: BetStatus) -> BookResult<Decimal> {
    let (amount, kind) = match status {
        BetStatus::Won => {
            let payout = bet.potential_payout().ok_or_else(|| {
                BookError::IntegrityGap(format!("payout of bet {} overflows", bet.id))
            })?;
            (payout, TransactionType::BetWon)
        }
        BetStatus::Canceled => (bet.stake, TransactionType::BetRefunded),
        BetStatus::Lost | BetStatus::Pending => return Ok(Decimal::ZERO),
    };

    ledger::credit(uow, bet.wallet_id, amount, kind, Some(bet.id)).map_err(|e| match e {
        BookError::InvalidAmount(reason) => BookError::IntegrityGap(reason),
        other => other,
    })?;
    Ok(amount)
}

/// Grade the PENDING legs of `bet` that sit on `event`.
///
/// Nothing is written: on an integrity gap the caller drops `bet` and the
/// stored row keeps its previous legs.
fn grade_legs<S: StoreRead + ?Sized>(store: &S, event: &Event, bet: &mut Bet) -> BookResult<()> {
    if store.wallet(bet.wallet_id)?.is_none() {
        return Err(BookError::IntegrityGap(format!(
            "wallet {} of bet {} is missing",
            bet.wallet_id, bet.id
        )));
    }

    for leg in bet.legs.iter_mut() {
        if leg.event_id != event.id || leg.status.is_terminal() {
            continue;
        }

        let Some(result) = event.result else {
            leg.status = BetStatus::Canceled;
            continue;
        };

        let option = store.option(leg.market_option_id)?.ok_or_else(|| {
            BookError::IntegrityGap(format!("market option {} is missing", leg.market_option_id))
        })?;
        let selection = event.selection_for(&option.name).ok_or_else(|| {
            BookError::IntegrityGap(format!(
                "option '{}' does not map to a result of {}",
                option.name,
                event.name()
            ))
        })?;

        leg.status = if selection == result {
            BetStatus::Won
        } else {
            BetStatus::Lost
        };
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bet engine
// ---------------------------------------------------------------------------

pub struct BetEngine<R: Repository> {
    store: Arc<R>,
    max_selections: usize,
}

impl<R: Repository> BetEngine<R> {
    pub fn new(store: Arc<R>, max_selections: usize) -> Self {
        Self {
            store,
            max_selections,
        }
    }

    /// Place a single (one selection) or multi-leg bet.
    ///
    /// The stake is debited and the bet stored in the same unit of work;
    /// on `InsufficientFunds` neither happens.
    pub fn place_bet(
        &self,
        user_id: UserId,
        stake: Decimal,
        selections: &[OptionId],
    ) -> BookResult<Bet> {
        validate_request(stake, selections, self.max_selections)?;

        let result = self.store.transaction(|uow| {
            let user = uow
                .user(user_id)?
                .ok_or_else(|| BookError::not_found("user", user_id))?;

            let mut legs = Vec::with_capacity(selections.len());
            for &option_id in selections {
                let option = uow.option(option_id)?.ok_or_else(|| {
                    BookError::InvalidBetRequest(format!("unknown selection {option_id}"))
                })?;
                let market = uow.market(option.market_id)?.ok_or_else(|| {
                    BookError::IntegrityGap(format!("market {} is missing", option.market_id))
                })?;
                let event = uow.event(market.event_id)?.ok_or_else(|| {
                    BookError::IntegrityGap(format!("event {} is missing", market.event_id))
                })?;
                if event.completed {
                    return Err(BookError::InvalidBetRequest(format!(
                        "{} is already completed",
                        event.name()
                    )));
                }

                legs.push(BetOption {
                    market_option_id: option_id,
                    event_id: event.id,
                    odds: option.odds,
                    status: BetStatus::Pending,
                });
            }

            let bet = Bet {
                id: BetId::new(),
                user_id,
                wallet_id: user.wallet_id,
                stake,
                status: BetStatus::Pending,
                legs,
                created_at: Utc::now(),
                settled_at: None,
            };
            let payout = bet.potential_payout().ok_or_else(|| {
                BookError::InvalidBetRequest(format!(
                    "potential payout of {stake} across {} selections is too large",
                    bet.legs.len()
                ))
            })?;

            ledger::debit(
                uow,
                user.wallet_id,
                stake,
                TransactionType::BetPlaced,
                Some(bet.id),
            )?;
            uow.save_bet(bet.clone())?;
            Ok((bet, payout))
        });

        match result {
            Ok((bet, payout)) => {
                info!(
                    bet = %bet.id,
                    user = %user_id,
                    stake = %bet.stake,
                    legs = bet.legs.len(),
                    potential_payout = %payout,
                    "Bet placed"
                );
                Ok(bet)
            }
            Err(e) => {
                warn!(user = %user_id, stake = %stake, error = %e, "Bet rejected");
                Err(e)
            }
        }
    }

    /// Settle an event in its own unit of work. Safe to repeat.
    pub fn settle_event(&self, event_id: EventId) -> BookResult<SettlementReport> {
        self.store
            .transaction(|uow| settle_event_in(uow, event_id))
    }

    pub fn bet(&self, bet_id: BetId) -> BookResult<Bet> {
        self.store.read(|r| {
            r.bet(bet_id)?
                .ok_or_else(|| BookError::not_found("bet", bet_id))
        })
    }

    /// A user's bets, oldest first.
    pub fn bets_for_user(&self, user_id: UserId) -> BookResult<Vec<Bet>> {
        let mut bets = self.store.read(|r| r.bets_for_user(user_id))?;
        bets.sort_by_key(|b| b.created_at);
        Ok(bets)
    }

    /// `stake × Π snapshot odds` for a stored bet.
    pub fn potential_payout(&self, bet_id: BetId) -> BookResult<Decimal> {
        self.bet(bet_id)?.potential_payout().ok_or_else(|| {
            BookError::IntegrityGap(format!("payout of bet {bet_id} overflows"))
        })
    }
}

/// Stateless checks done before any store access.
fn validate_request(
    stake: Decimal,
    selections: &[OptionId],
    max_selections: usize,
) -> BookResult<()> {
    if stake <= Decimal::ZERO {
        return Err(BookError::InvalidBetRequest(format!(
            "stake must be positive, got {stake}"
        )));
    }
    if stake.normalize().scale() > MONEY_SCALE {
        return Err(BookError::InvalidBetRequest(format!(
            "stake {stake} has more than {MONEY_SCALE} decimal places"
        )));
    }
    if selections.is_empty() {
        return Err(BookError::InvalidBetRequest("no selections".into()));
    }
    if selections.len() > max_selections {
        return Err(BookError::InvalidBetRequest(format!(
            "{} selections exceeds the limit of {max_selections}",
            selections.len()
        )));
    }
    let mut seen = HashSet::with_capacity(selections.len());
    if let Some(dup) = selections.iter().find(|id| !seen.insert(**id)) {
        return Err(BookError::InvalidBetRequest(format!(
            "selection {dup} appears more than once"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
