//! Wallet ledger: balances, the transaction log, and account management.
//!
//! Every balance change goes through [`debit`] or [`credit`], which append
//! one signed [`Transaction`] and move the balance by the same amount inside
//! the caller's unit of work. A debit that would take the balance below
//! zero fails without touching the wallet.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::storage::{Repository, UnitOfWork};
use crate::types::{
    BetId, BookError, BookResult, Transaction, TransactionId, TransactionType, User, UserId,
    Wallet, WalletId, MONEY_SCALE,
};

// ---------------------------------------------------------------------------
// Postings (inside a unit of work)
// ---------------------------------------------------------------------------

/// Check that an amount is positive and fits the money scale.
pub fn validate_amount(amount: Decimal) -> BookResult<()> {
    if amount <= Decimal::ZERO {
        return Err(BookError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(BookError::InvalidAmount(format!(
            "amount {amount} has more than {MONEY_SCALE} decimal places"
        )));
    }
    Ok(())
}

/// Take `amount` out of a wallet. Fails with `InsufficientFunds` if the
/// balance would go negative.
pub fn debit(
    uow: &mut dyn UnitOfWork,
    wallet_id: WalletId,
    amount: Decimal,
    kind: TransactionType,
    bet_id: Option<BetId>,
) -> BookResult<Transaction> {
    if kind.is_credit() {
        return Err(BookError::InvalidAmount(format!("{kind} is not a debit")));
    }
    post(uow, wallet_id, amount, kind, bet_id)
}

/// Add `amount` to a wallet.
pub fn credit(
    uow: &mut dyn UnitOfWork,
    wallet_id: WalletId,
    amount: Decimal,
    kind: TransactionType,
    bet_id: Option<BetId>,
) -> BookResult<Transaction> {
    if !kind.is_credit() {
        return Err(BookError::InvalidAmount(format!("{kind} is not a credit")));
    }
    post(uow, wallet_id, amount, kind, bet_id)
}

fn post(
    uow: &mut dyn UnitOfWork,
    wallet_id: WalletId,
    amount: Decimal,
    kind: TransactionType,
    bet_id: Option<BetId>,
) -> BookResult<Transaction> {
    validate_amount(amount)?;

    let mut wallet = uow
        .wallet(wallet_id)?
        .ok_or_else(|| BookError::not_found("wallet", wallet_id))?;

    let signed = kind.signed(amount);
    let new_balance = wallet.balance.checked_add(signed).ok_or_else(|| {
        BookError::InvalidAmount(format!("{amount} would overflow wallet {wallet_id}"))
    })?;
    if new_balance < Decimal::ZERO {
        return Err(BookError::InsufficientFunds {
            needed: amount,
            available: wallet.balance,
        });
    }

    let tx = Transaction {
        id: TransactionId::new(),
        wallet_id,
        amount: signed,
        kind,
        bet_id,
        created_at: Utc::now(),
    };
    wallet.transactions.push(tx.clone());
    wallet.balance = new_balance;
    uow.save_wallet(wallet)?;

    debug!(
        wallet = %wallet_id,
        kind = %kind,
        amount = %signed,
        balance = %new_balance,
        "Ledger posting"
    );
    Ok(tx)
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Result of recomputing a wallet's balance from its log.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerAudit {
    pub wallet_id: WalletId,
    pub balance: Decimal,
    pub ledger_sum: Decimal,
    pub entries: usize,
}

impl LedgerAudit {
    pub fn drift(&self) -> Decimal {
        self.balance - self.ledger_sum
    }

    pub fn is_consistent(&self) -> bool {
        self.drift().is_zero() && self.balance >= Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Account-level operations, each in its own unit of work.
pub struct Ledger<R: Repository> {
    store: Arc<R>,
}

impl<R: Repository> Ledger<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }

    /// Create a user with an empty wallet. Calling again with the same
    /// external id returns the existing user unchanged.
    pub fn open_wallet(
        &self,
        external_id: &str,
        username: Option<String>,
        email: Option<String>,
    ) -> BookResult<User> {
        self.store.transaction(|uow| {
            if let Some(existing) = uow.user_by_external_id(external_id)? {
                return Ok(existing);
            }

            let user_id = UserId::new();
            let wallet = Wallet::new(user_id);
            let user = User {
                id: user_id,
                external_id: external_id.to_string(),
                username,
                email,
                wallet_id: wallet.id,
            };
            uow.save_wallet(wallet)?;
            uow.save_user(user.clone())?;

            info!(user = %user.id, wallet = %user.wallet_id, external_id, "Wallet opened");
            Ok(user)
        })
    }

    pub fn deposit(&self, wallet_id: WalletId, amount: Decimal) -> BookResult<Transaction> {
        let tx = self.store.transaction(|uow| {
            credit(uow, wallet_id, amount, TransactionType::Deposit, None)
        })?;
        info!(wallet = %wallet_id, amount = %amount, "Deposit");
        Ok(tx)
    }

    pub fn withdraw(&self, wallet_id: WalletId, amount: Decimal) -> BookResult<Transaction> {
        let result = self.store.transaction(|uow| {
            debit(uow, wallet_id, amount, TransactionType::Withdrawal, None)
        });
        match &result {
            Ok(_) => info!(wallet = %wallet_id, amount = %amount, "Withdrawal"),
            Err(e) => warn!(wallet = %wallet_id, amount = %amount, error = %e, "Withdrawal rejected"),
        }
        result
    }

    pub fn wallet(&self, wallet_id: WalletId) -> BookResult<Wallet> {
        self.store.read(|r| {
            r.wallet(wallet_id)?
                .ok_or_else(|| BookError::not_found("wallet", wallet_id))
        })
    }

    pub fn balance(&self, wallet_id: WalletId) -> BookResult<Decimal> {
        Ok(self.wallet(wallet_id)?.balance)
    }

    /// The wallet's log, oldest first.
    pub fn transactions(&self, wallet_id: WalletId) -> BookResult<Vec<Transaction>> {
        Ok(self.wallet(wallet_id)?.transactions)
    }

    /// Recompute the balance from the log.
    pub fn audit(&self, wallet_id: WalletId) -> BookResult<LedgerAudit> {
        let wallet = self.wallet(wallet_id)?;
        let audit = LedgerAudit {
            wallet_id,
            balance: wallet.balance,
            ledger_sum: wallet.ledger_sum(),
            entries: wallet.transactions.len(),
        };
        if !audit.is_consistent() {
            warn!(
                wallet = %wallet_id,
                balance = %audit.balance,
                ledger_sum = %audit.ledger_sum,
                "Ledger drift detected"
            );
        }
        Ok(audit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
