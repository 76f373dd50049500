use async_trait::async_trait;

use crate::{AccountSnapshot, Amount, CommitOutcome, CreditOutcome, Hold, HoldState, LedgerError};

/// Tenant quota accounting
///
/// Operations on the same tenant are linearizable. Implementations must
/// never hold a tenant lock across an `.await` on anything outside the
/// ledger itself.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Withhold `amount` from the tenant's spendable balance
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] when the balance cannot
    /// cover the amount; no hold is created in that case
    async fn reserve(&self, tenant_id: &str, amount: Amount) -> Result<Hold, LedgerError>;

    /// Convert a hold into a permanent charge of `actual`
    ///
    /// The difference between `actual` and the reserved amount is settled
    /// against the balance in the same step. Committing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the hold was released or is unknown
    async fn commit(&self, hold: &Hold, actual: Amount) -> Result<CommitOutcome, LedgerError>;

    /// Cancel a hold without charging; releasing twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::HoldCommitted`] if the hold was already committed
    async fn release(&self, hold: &Hold) -> Result<(), LedgerError>;

    /// Add `amount` to the tenant's balance
    ///
    /// When `transaction_id` is set, repeated deliveries of the same
    /// transaction credit exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if the amount is negative or the transaction id was
    /// used with different parameters
    async fn credit(
        &self,
        tenant_id: &str,
        amount: Amount,
        transaction_id: Option<&str>,
    ) -> Result<CreditOutcome, LedgerError>;

    /// Current account totals
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store is unavailable
    async fn account(&self, tenant_id: &str) -> Result<AccountSnapshot, LedgerError>;

    /// Current state of a hold, if known
    async fn hold_state(&self, hold: &Hold) -> Option<HoldState>;
}
