use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{AccountSnapshot, Amount, CommitOutcome, CreditOutcome, Hold, HoldId, HoldState, Ledger, LedgerError};

/// Settled holds remembered per tenant for idempotent retries
pub const DEFAULT_SETTLED_RETENTION: usize = 4096;

#[derive(Default)]
struct Account {
    balance: Amount,
    committed_total: Amount,
    reserved_total: Amount,
    /// Reserved amount of every hold still awaiting commit or release
    open: HashMap<HoldId, Amount>,
    /// Terminal state of recently settled holds
    settled: HashMap<HoldId, HoldState>,
    /// Settlement order of `settled`, oldest first
    settled_order: VecDeque<HoldId>,
}

impl Account {
    fn state_of(&self, id: HoldId) -> Option<HoldState> {
        if self.open.contains_key(&id) {
            return Some(HoldState::Acquired);
        }
        self.settled.get(&id).copied()
    }

    /// Move an open hold to the settled set, evicting the oldest tombstones
    fn settle(&mut self, id: HoldId, state: HoldState, retention: usize) {
        self.open.remove(&id);
        self.settled.insert(id, state);
        self.settled_order.push_back(id);

        while self.settled_order.len() > retention {
            if let Some(evicted) = self.settled_order.pop_front() {
                self.settled.remove(&evicted);
            }
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
struct AppliedCredit {
    tenant_id: String,
    amount: Amount,
}

/// In-process ledger with per-tenant mutual exclusion
///
/// Each tenant's account sits behind its own mutex, so operations on
/// different tenants never contend. Critical sections are short and
/// never span an `.await`. Only outstanding holds are kept in full;
/// settled holds leave a bounded trail of tombstones so a retried commit
/// or release still gets an idempotent answer.
pub struct MemoryLedger {
    accounts: DashMap<String, Arc<Mutex<Account>>>,
    transactions: DashMap<String, AppliedCredit>,
    settled_retention: usize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self {
            accounts: DashMap::new(),
            transactions: DashMap::new(),
            settled_retention: DEFAULT_SETTLED_RETENTION,
        }
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with opening balances
    pub fn with_balances<I, S>(balances: I) -> Self
    where
        I: IntoIterator<Item = (S, Amount)>,
        S: Into<String>,
    {
        let ledger = Self::new();

        for (tenant_id, balance) in balances {
            let tenant_id: String = tenant_id.into();
            let account = ledger.account_handle(&tenant_id);
            lock(&account).balance = balance;
        }

        ledger
    }

    /// Keep at most `retention` settled holds per tenant
    #[must_use]
    pub fn with_settled_retention(mut self, retention: usize) -> Self {
        self.settled_retention = retention;
        self
    }

    fn account_handle(&self, tenant_id: &str) -> Arc<Mutex<Account>> {
        if let Some(account) = self.accounts.get(tenant_id) {
            return Arc::clone(&account);
        }

        Arc::clone(&self.accounts.entry(tenant_id.to_owned()).or_default())
    }

    fn apply_credit(&self, tenant_id: &str, amount: Amount) -> Result<Amount, LedgerError> {
        let account = self.account_handle(tenant_id);
        let mut account = lock(&account);
        account.balance = account.balance.checked_add(amount).ok_or_else(|| overflow(tenant_id))?;
        Ok(account.balance)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn reserve(&self, tenant_id: &str, amount: Amount) -> Result<Hold, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let handle = self.account_handle(tenant_id);
        let mut account = lock(&handle);

        if account.balance < amount {
            tracing::debug!(tenant_id, requested = amount, available = account.balance, "reservation refused");
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: account.balance,
            });
        }

        let reserved_total = account
            .reserved_total
            .checked_add(amount)
            .ok_or_else(|| overflow(tenant_id))?;

        let hold = Hold {
            id: HoldId::new(),
            tenant_id: tenant_id.to_owned(),
            amount,
            acquired_at: SystemTime::now(),
        };

        // balance >= amount >= 0, so this cannot wrap
        account.balance -= amount;
        account.reserved_total = reserved_total;
        account.open.insert(hold.id, amount);

        tracing::debug!(tenant_id, hold_id = %hold.id, amount, "hold acquired");
        Ok(hold)
    }

    async fn commit(&self, hold: &Hold, actual: Amount) -> Result<CommitOutcome, LedgerError> {
        if actual < 0 {
            return Err(LedgerError::InvalidAmount(actual));
        }

        let handle = self.account_handle(&hold.tenant_id);
        let mut account = lock(&handle);

        let reserved = match account.state_of(hold.id) {
            None => return Err(LedgerError::UnknownHold(hold.id)),
            Some(HoldState::Committed { amount }) => return Ok(CommitOutcome::AlreadyCommitted { amount }),
            Some(HoldState::Released) => return Err(LedgerError::HoldReleased(hold.id)),
            Some(HoldState::Acquired) => account.open.get(&hold.id).copied().unwrap_or_default(),
        };

        // Settle the estimate against the actual charge; may go negative
        let settled = account
            .balance
            .checked_add(reserved)
            .and_then(|balance| balance.checked_sub(actual))
            .zip(account.committed_total.checked_add(actual))
            .zip(account.reserved_total.checked_sub(reserved));
        let Some(((balance, committed_total), reserved_total)) = settled else {
            return Err(overflow(&hold.tenant_id));
        };

        account.balance = balance;
        account.committed_total = committed_total;
        account.reserved_total = reserved_total;
        account.settle(hold.id, HoldState::Committed { amount: actual }, self.settled_retention);

        tracing::debug!(
            tenant_id = %hold.tenant_id,
            hold_id = %hold.id,
            reserved,
            actual,
            balance,
            "hold committed"
        );

        Ok(CommitOutcome::Committed { amount: actual })
    }

    async fn release(&self, hold: &Hold) -> Result<(), LedgerError> {
        let handle = self.account_handle(&hold.tenant_id);
        let mut account = lock(&handle);

        let reserved = match account.state_of(hold.id) {
            None => return Err(LedgerError::UnknownHold(hold.id)),
            Some(HoldState::Released) => return Ok(()),
            Some(HoldState::Committed { .. }) => return Err(LedgerError::HoldCommitted(hold.id)),
            Some(HoldState::Acquired) => account.open.get(&hold.id).copied().unwrap_or_default(),
        };

        let released = account
            .balance
            .checked_add(reserved)
            .zip(account.reserved_total.checked_sub(reserved));
        let Some((balance, reserved_total)) = released else {
            return Err(overflow(&hold.tenant_id));
        };

        account.balance = balance;
        account.reserved_total = reserved_total;
        account.settle(hold.id, HoldState::Released, self.settled_retention);

        tracing::debug!(tenant_id = %hold.tenant_id, hold_id = %hold.id, reserved, "hold released");
        Ok(())
    }

    async fn credit(
        &self,
        tenant_id: &str,
        amount: Amount,
        transaction_id: Option<&str>,
    ) -> Result<CreditOutcome, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let Some(transaction_id) = transaction_id else {
            let balance = self.apply_credit(tenant_id, amount)?;
            tracing::info!(tenant_id, amount, balance, "tenant credited");
            return Ok(CreditOutcome::Applied { balance });
        };

        let applied = AppliedCredit {
            tenant_id: tenant_id.to_owned(),
            amount,
        };

        // The entry guard serializes concurrent deliveries of one transaction
        match self.transactions.entry(transaction_id.to_owned()) {
            Entry::Occupied(existing) => {
                if *existing.get() != applied {
                    return Err(LedgerError::IdempotencyConflict(transaction_id.to_owned()));
                }

                tracing::info!(tenant_id, transaction_id, "duplicate credit ignored");
                Ok(CreditOutcome::Duplicate)
            }
            Entry::Vacant(slot) => {
                // A refused credit leaves no record, so a corrected redelivery can apply
                let balance = self.apply_credit(tenant_id, amount)?;
                slot.insert(applied);

                tracing::info!(tenant_id, transaction_id, amount, balance, "tenant credited");
                Ok(CreditOutcome::Applied { balance })
            }
        }
    }

    async fn account(&self, tenant_id: &str) -> Result<AccountSnapshot, LedgerError> {
        let Some(handle) = self.accounts.get(tenant_id).map(|a| Arc::clone(&a)) else {
            return Ok(AccountSnapshot {
                tenant_id: tenant_id.to_owned(),
                balance: 0,
                committed_total: 0,
                reserved_total: 0,
            });
        };

        let account = lock(&handle);
        Ok(AccountSnapshot {
            tenant_id: tenant_id.to_owned(),
            balance: account.balance,
            committed_total: account.committed_total,
            reserved_total: account.reserved_total,
        })
    }

    async fn hold_state(&self, hold: &Hold) -> Option<HoldState> {
        let handle = self.accounts.get(&hold.tenant_id).map(|a| Arc::clone(&a))?;
        let account = lock(&handle);
        account.state_of(hold.id)
    }
}

fn overflow(tenant_id: &str) -> LedgerError {
    LedgerError::Overflow(tenant_id.to_owned())
}

fn lock(account: &Mutex<Account>) -> MutexGuard<'_, Account> {
    account.lock().unwrap_or_else(PoisonError::into_inner)
}
