//! Operator endpoints for channels, tenants and asynchronous jobs

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing,
};
use http::StatusCode;
use relay_channel::{Ability, Channel, ChannelError, ChannelId, ChannelView, TagUpdate};
use relay_config::ChannelConfig;
use relay_ledger::{AccountSnapshot, Amount, DeferredRelease, RecoverySummary, Resolution};
use relay_reconcile::{JobView, ReconcileError, Reconciler, TrackedJob};
use serde::{Deserialize, Serialize};

use crate::{ApiError, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/channels", routing::get(list_channels))
        .route(
            "/admin/channels/{id}",
            routing::get(get_channel).put(put_channel).delete(delete_channel),
        )
        .route("/admin/channels/{id}/enabled", routing::post(set_enabled))
        .route("/admin/tags/{tag}", routing::post(update_tag))
        .route("/admin/abilities", routing::get(abilities))
        .route("/admin/tenants/{tenant}", routing::get(tenant))
        .route("/admin/tenants/{tenant}/recovery-resolved", routing::post(resolve_recovery))
        .route("/admin/jobs", routing::post(begin_job))
        .route("/admin/jobs/{job_id}", routing::get(job))
}

async fn list_channels(State(state): State<AppState>) -> Json<Vec<ChannelView>> {
    let registry = state.orchestrator.selector().registry();
    Json(registry.list().iter().map(|c| c.view()).collect())
}

async fn get_channel(State(state): State<AppState>, Path(id): Path<ChannelId>) -> Result<Json<ChannelView>, ApiError> {
    let channel = state
        .orchestrator
        .selector()
        .registry()
        .get(id)
        .ok_or(ChannelError::UnknownChannel(id))?;

    Ok(Json(channel.view()))
}

/// Create or replace a channel
async fn put_channel(
    State(state): State<AppState>,
    Path(id): Path<ChannelId>,
    Json(config): Json<ChannelConfig>,
) -> Result<Response, ApiError> {
    if config.id != id {
        return Err(ApiError::BadRequest(format!(
            "channel id {} does not match path id {id}",
            config.id
        )));
    }

    if config.groups.is_empty() || config.models.is_empty() {
        return Err(ApiError::BadRequest(
            "a channel must serve at least one group and one model".to_owned(),
        ));
    }

    let channel = Channel::from(config);
    let view = channel.view();
    let previous = state.orchestrator.selector().registry().upsert(channel);

    // A replaced channel starts with a clean error history
    state.orchestrator.selector().health().reset(id);

    tracing::info!(channel_id = id, replaced = previous.is_some(), "channel upserted");

    let status = if previous.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((status, Json(view)).into_response())
}

async fn delete_channel(State(state): State<AppState>, Path(id): Path<ChannelId>) -> Result<StatusCode, ApiError> {
    state.orchestrator.selector().registry().remove(id)?;
    state.orchestrator.selector().health().reset(id);

    tracing::info!(channel_id = id, "channel removed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnabledBody {
    enabled: bool,
}

async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<ChannelId>,
    Json(body): Json<EnabledBody>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .selector()
        .registry()
        .set_enabled(id, body.enabled)?;

    if body.enabled {
        state.orchestrator.selector().health().reset(id);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct TagUpdated {
    tag: String,
    updated: usize,
}

async fn update_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Json(update): Json<TagUpdate>,
) -> Result<Json<TagUpdated>, ApiError> {
    let updated = state.orchestrator.selector().registry().update_tag(&tag, &update)?;
    Ok(Json(TagUpdated { tag, updated }))
}

async fn abilities(State(state): State<AppState>) -> Json<Vec<Ability>> {
    Json(state.orchestrator.selector().registry().abilities())
}

#[derive(Debug, Serialize)]
struct TenantView {
    #[serde(flatten)]
    account: AccountSnapshot,
    recovery: RecoverySummary,
    /// Holds still waiting for their release to go through
    deferred_releases: Vec<DeferredRelease>,
}

async fn tenant(State(state): State<AppState>, Path(tenant): Path<String>) -> Result<Json<TenantView>, ApiError> {
    let account = state.orchestrator.ledger().account(&tenant).await?;
    let recovery = state.orchestrator.recovery().summary(&tenant);
    let deferred_releases = state.orchestrator.releases().pending(&tenant);

    Ok(Json(TenantView {
        account,
        recovery,
        deferred_releases,
    }))
}

/// Mark every pending obligation of a tenant as recovered out of band
async fn resolve_recovery(State(state): State<AppState>, Path(tenant): Path<String>) -> Json<Resolution> {
    let resolution = state.orchestrator.recovery().resolve(&tenant);

    tracing::info!(
        tenant_id = %tenant,
        obligations = resolution.obligations,
        amount = resolution.amount,
        "recovery obligations resolved"
    );

    Json(resolution)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BeginJob {
    job_id: String,
    tenant_id: String,
    channel_id: ChannelId,
    amount: Amount,
}

async fn begin_job(
    State(state): State<AppState>,
    Json(body): Json<BeginJob>,
) -> Result<(StatusCode, Json<TrackedJob>), ApiError> {
    let reconciler = reconciler(&state)?;

    if state.orchestrator.selector().registry().get(body.channel_id).is_none() {
        return Err(ChannelError::UnknownChannel(body.channel_id).into());
    }

    let job = reconciler
        .begin_job(&body.tenant_id, &body.job_id, body.channel_id, body.amount)
        .await?;

    Ok((StatusCode::CREATED, Json(job)))
}

async fn job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Json<JobView>, ApiError> {
    let reconciler = reconciler(&state)?;
    let job = reconciler
        .job(&job_id)
        .ok_or(ReconcileError::UnknownJob(job_id))?;

    Ok(Json(job))
}

fn reconciler(state: &AppState) -> Result<&Reconciler, ApiError> {
    state.reconciler.as_ref().ok_or(ApiError::ReconcilerDisabled)
}
