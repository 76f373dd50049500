//! Payment provider callbacks

use axum::{Json, extract::State};
use relay_ledger::{Amount, CreditOutcome};
use serde::Deserialize;

use crate::{ApiError, state::AppState};

/// Completed top-up reported by the payment provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopUp {
    /// Provider transaction id; redeliveries carry the same id
    pub transaction_id: String,
    pub tenant_id: String,
    pub amount: Amount,
}

/// Credit a tenant once per transaction id
pub async fn topup_handler(
    State(state): State<AppState>,
    Json(body): Json<TopUp>,
) -> Result<Json<CreditOutcome>, ApiError> {
    if body.transaction_id.trim().is_empty() {
        return Err(ApiError::BadRequest("transaction_id is required".to_owned()));
    }

    let outcome = state
        .orchestrator
        .ledger()
        .credit(&body.tenant_id, body.amount, Some(&body.transaction_id))
        .await?;

    match outcome {
        CreditOutcome::Applied { balance } => tracing::info!(
            tenant_id = %body.tenant_id,
            transaction_id = %body.transaction_id,
            amount = body.amount,
            balance,
            "top-up applied"
        ),
        CreditOutcome::Duplicate => tracing::debug!(
            transaction_id = %body.transaction_id,
            "duplicate top-up delivery ignored"
        ),
    }

    Ok(Json(outcome))
}
