//! Per-(user, currency) balances with a reserved/available split.
//!
//! Every operation on a single (user, currency) key is linearized behind that
//! key's own mutex; operations on different keys proceed concurrently, so the
//! ledger is safe to share across all pair engines. [`Ledger::post_many`]
//! applies a batch of postings all-or-nothing, which is how settlement spans
//! the base leg, the quote leg, and fee retention in one atomic step.
//!
//! Lock order for multi-key operations is the sorted (user, currency) key
//! order; single-key operations take one lock. No operation performs I/O
//! while holding a lock.

use crate::error::EngineError;
use crate::types::{Currency, UserId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Balance for one (user, currency) key. `available = total - reserved`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub reserved: Decimal,
}

impl Balance {
    pub fn available(&self) -> Decimal {
        self.total - self.reserved
    }
}

/// Balance snapshot returned to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BalanceView {
    pub total: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

impl From<Balance> for BalanceView {
    fn from(b: Balance) -> Self {
        BalanceView {
            total: b.total,
            reserved: b.reserved,
            available: b.available(),
        }
    }
}

/// One persisted ledger row.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub currency: Currency,
    pub total: Decimal,
    pub reserved: Decimal,
}

/// A single value movement between two accounts in one currency.
///
/// Debits `debit`'s total (and reserved, when `from_reserved`) and credits
/// `credit`'s total. This is the only way value moves between users.
#[derive(Clone, Debug)]
pub struct Posting {
    pub debit: UserId,
    pub credit: UserId,
    pub currency: Currency,
    pub amount: Decimal,
    pub from_reserved: bool,
}

type AccountKey = (UserId, Currency);

/// Concurrent balance store.
pub struct Ledger {
    accounts: RwLock<HashMap<AccountKey, Arc<Mutex<Balance>>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the shared cell for a key, creating a zero balance if absent.
    fn account(&self, user: UserId, currency: &Currency) -> Arc<Mutex<Balance>> {
        if let Some(cell) = self
            .accounts
            .read()
            .expect("lock")
            .get(&(user, currency.clone()))
        {
            return cell.clone();
        }
        let mut accounts = self.accounts.write().expect("lock");
        accounts
            .entry((user, currency.clone()))
            .or_default()
            .clone()
    }

    /// Credits `amount` to the user's total. Funding entry point (deposits).
    pub fn deposit(
        &self,
        user: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity(format!(
                "deposit amount must be positive, got {amount}"
            )));
        }
        let cell = self.account(user, currency);
        let mut balance = cell.lock().expect("lock");
        balance.total += amount;
        Ok(())
    }

    /// Moves `amount` from available to reserved for the given key.
    pub fn reserve(
        &self,
        user: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidQuantity(format!(
                "reserve amount must be positive, got {amount}"
            )));
        }
        let cell = self.account(user, currency);
        let mut balance = cell.lock().expect("lock");
        if balance.available() < amount {
            return Err(EngineError::InsufficientBalance {
                user,
                currency: currency.0.clone(),
                needed: amount,
                available: balance.available(),
            });
        }
        balance.reserved += amount;
        Ok(())
    }

    /// Returns `amount` from reserved back to available. Over-release is a
    /// caller bug and fails with `InvalidState` without touching the balance.
    pub fn release(
        &self,
        user: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        if amount < Decimal::ZERO {
            return Err(EngineError::InvalidState(format!(
                "release amount must be non-negative, got {amount}"
            )));
        }
        if amount == Decimal::ZERO {
            return Ok(());
        }
        let cell = self.account(user, currency);
        let mut balance = cell.lock().expect("lock");
        if balance.reserved < amount {
            return Err(EngineError::InvalidState(format!(
                "release of {amount} {currency} exceeds reserved {} for user {:?}",
                balance.reserved, user
            )));
        }
        balance.reserved -= amount;
        Ok(())
    }

    /// Applies a single posting atomically. See [`Ledger::post_many`].
    pub fn post(&self, posting: &Posting) -> Result<(), EngineError> {
        self.post_many(std::slice::from_ref(posting))
    }

    /// Applies a batch of postings all-or-nothing.
    ///
    /// All involved accounts are locked in sorted key order, the postings are
    /// staged in sequence against copies (so later postings see earlier
    /// credits), every precondition is checked, and only then are the staged
    /// balances committed. On any failure nothing is observably applied.
    pub fn post_many(&self, postings: &[Posting]) -> Result<(), EngineError> {
        if postings.is_empty() {
            return Ok(());
        }
        for p in postings {
            if p.amount < Decimal::ZERO {
                return Err(EngineError::InvalidState(format!(
                    "posting amount must be non-negative, got {}",
                    p.amount
                )));
            }
        }

        let mut keys: Vec<AccountKey> = Vec::with_capacity(postings.len() * 2);
        for p in postings {
            keys.push((p.debit, p.currency.clone()));
            keys.push((p.credit, p.currency.clone()));
        }
        keys.sort();
        keys.dedup();

        let cells: Vec<Arc<Mutex<Balance>>> = keys
            .iter()
            .map(|(user, currency)| self.account(*user, currency))
            .collect();
        let mut guards: Vec<std::sync::MutexGuard<'_, Balance>> =
            cells.iter().map(|c| c.lock().expect("lock")).collect();

        let index: HashMap<&AccountKey, usize> =
            keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let mut staged: Vec<Balance> = guards.iter().map(|g| **g).collect();

        for p in postings {
            if p.amount == Decimal::ZERO {
                continue;
            }
            let di = index[&(p.debit, p.currency.clone())];
            let debit = &mut staged[di];
            let covered = if p.from_reserved {
                debit.reserved >= p.amount && debit.total >= p.amount
            } else {
                debit.available() >= p.amount
            };
            if !covered {
                return Err(EngineError::InsufficientBalance {
                    user: p.debit,
                    currency: p.currency.0.clone(),
                    needed: p.amount,
                    available: if p.from_reserved {
                        debit.reserved
                    } else {
                        debit.available()
                    },
                });
            }
            debit.total -= p.amount;
            if p.from_reserved {
                debit.reserved -= p.amount;
            }
            let ci = index[&(p.credit, p.currency.clone())];
            staged[ci].total += p.amount;
        }

        for (guard, value) in guards.iter_mut().zip(staged) {
            **guard = value;
        }
        Ok(())
    }

    /// Balance snapshot for one key (zero if the key is unknown).
    pub fn balance(&self, user: UserId, currency: &Currency) -> BalanceView {
        let cell = self.account(user, currency);
        let balance = *cell.lock().expect("lock");
        balance.into()
    }

    /// All non-zero rows, for persistence. Sorted for deterministic output.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let accounts = self.accounts.read().expect("lock");
        let mut out: Vec<LedgerEntry> = accounts
            .iter()
            .filter_map(|((user, currency), cell)| {
                let b = *cell.lock().expect("lock");
                if b.total == Decimal::ZERO && b.reserved == Decimal::ZERO {
                    return None;
                }
                Some(LedgerEntry {
                    user_id: *user,
                    currency: currency.clone(),
                    total: b.total,
                    reserved: b.reserved,
                })
            })
            .collect();
        out.sort_by(|a, b| (a.user_id, &a.currency).cmp(&(b.user_id, &b.currency)));
        out
    }

    /// Rebuilds a ledger from persisted rows.
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        let ledger = Ledger::new();
        {
            let mut accounts = ledger.accounts.write().expect("lock");
            for e in entries {
                accounts.insert(
                    (e.user_id, e.currency.clone()),
                    Arc::new(Mutex::new(Balance {
                        total: e.total,
                        reserved: e.reserved,
                    })),
                );
            }
        }
        ledger
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
