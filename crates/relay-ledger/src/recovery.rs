//! Recovery obligations
//!
//! An obligation is raised when a request produced billable work but its
//! hold could not be committed. It stays pending until an operator marks
//! the tenant's debt as recovered out of band. Recovered amounts are
//! tracked separately from the ledger's committed total.

use std::time::SystemTime;

use dashmap::DashMap;
use serde::Serialize;

use crate::Amount;

/// Settlement status of one obligation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    RecoveryRequired,
    ExternallyRecovered,
    /// The hold turned out to be committed after all
    Withdrawn,
}

/// Unsettled debt from one request
#[derive(Debug, Clone, Serialize)]
pub struct Obligation {
    pub request_id: String,
    pub amount: Amount,
    pub raised_at: SystemTime,
    pub status: ObligationStatus,
}

/// Outcome of resolving a tenant's obligations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub obligations: usize,
    pub amount: Amount,
}

/// Per-tenant recovery totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    pub recovery_required: bool,
    pub pending_amount: Amount,
    pub pending_count: usize,
    pub externally_recovered_total: Amount,
}

#[derive(Default)]
struct TenantRecovery {
    obligations: Vec<Obligation>,
    externally_recovered_total: Amount,
}

impl TenantRecovery {
    fn pending(&self) -> impl Iterator<Item = &Obligation> {
        self.obligations
            .iter()
            .filter(|o| o.status == ObligationStatus::RecoveryRequired)
    }
}

/// Registry of recovery obligations keyed by tenant
#[derive(Default)]
pub struct RecoveryBook {
    tenants: DashMap<String, TenantRecovery>,
    requests: DashMap<String, String>,
}

impl RecoveryBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `request_id` owes `amount` which could not be settled locally
    pub fn raise(&self, tenant_id: &str, request_id: &str, amount: Amount) {
        self.tenants
            .entry(tenant_id.to_owned())
            .or_default()
            .obligations
            .push(Obligation {
                request_id: request_id.to_owned(),
                amount,
                raised_at: SystemTime::now(),
                status: ObligationStatus::RecoveryRequired,
            });

        self.requests.insert(request_id.to_owned(), tenant_id.to_owned());

        tracing::error!(tenant_id, request_id, amount, "recovery obligation raised");
    }

    /// Whether the tenant has any unresolved obligation
    pub fn is_pending(&self, tenant_id: &str) -> bool {
        self.tenants
            .get(tenant_id)
            .is_some_and(|t| t.pending().next().is_some())
    }

    /// Sum of unresolved obligations for the tenant
    pub fn pending_amount(&self, tenant_id: &str) -> Amount {
        self.tenants
            .get(tenant_id)
            .map_or(0, |t| t.pending().map(|o| o.amount).sum())
    }

    /// Mark every pending obligation of the tenant as externally recovered
    pub fn resolve(&self, tenant_id: &str) -> Resolution {
        let Some(mut tenant) = self.tenants.get_mut(tenant_id) else {
            return Resolution {
                obligations: 0,
                amount: 0,
            };
        };

        let mut resolution = Resolution {
            obligations: 0,
            amount: 0,
        };

        for obligation in &mut tenant.obligations {
            if obligation.status == ObligationStatus::RecoveryRequired {
                obligation.status = ObligationStatus::ExternallyRecovered;
                resolution.obligations += 1;
                resolution.amount += obligation.amount;
            }
        }

        tenant.externally_recovered_total += resolution.amount;
        drop(tenant);

        if resolution.obligations > 0 {
            tracing::info!(
                tenant_id,
                obligations = resolution.obligations,
                amount = resolution.amount,
                "recovery obligations resolved"
            );
        }

        resolution
    }

    /// Withdraw the pending obligation of a request whose charge landed
    ///
    /// Returns `false` when the request has no pending obligation.
    pub fn withdraw(&self, request_id: &str) -> bool {
        let Some(tenant_id) = self.requests.get(request_id).map(|t| t.value().clone()) else {
            return false;
        };
        let Some(mut tenant) = self.tenants.get_mut(&tenant_id) else {
            return false;
        };

        let Some(obligation) = tenant
            .obligations
            .iter_mut()
            .find(|o| o.request_id == request_id && o.status == ObligationStatus::RecoveryRequired)
        else {
            return false;
        };

        obligation.status = ObligationStatus::Withdrawn;
        let amount = obligation.amount;
        drop(tenant);

        tracing::info!(tenant_id, request_id, amount, "recovery obligation withdrawn");
        true
    }

    /// Status of the obligation raised for a request, if any
    pub fn status(&self, request_id: &str) -> Option<ObligationStatus> {
        let tenant_id = self.requests.get(request_id)?.value().clone();
        let tenant = self.tenants.get(&tenant_id)?;

        tenant
            .obligations
            .iter()
            .find(|o| o.request_id == request_id)
            .map(|o| o.status)
    }

    /// Totals for the tenant
    pub fn summary(&self, tenant_id: &str) -> RecoverySummary {
        let Some(tenant) = self.tenants.get(tenant_id) else {
            return RecoverySummary::default();
        };

        let pending_count = tenant.pending().count();
        RecoverySummary {
            recovery_required: pending_count > 0,
            pending_amount: tenant.pending().map(|o| o.amount).sum(),
            pending_count,
            externally_recovered_total: tenant.externally_recovered_total,
        }
    }

    /// Every obligation recorded for the tenant, oldest first
    pub fn obligations(&self, tenant_id: &str) -> Vec<Obligation> {
        self.tenants
            .get(tenant_id)
            .map(|t| t.obligations.clone())
            .unwrap_or_default()
    }
}
