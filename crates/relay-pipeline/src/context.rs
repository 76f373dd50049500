use relay_channel::ChannelId;
use relay_ledger::{Hold, RecoveryBook};
use uuid::Uuid;

use crate::{PipelineError, Stage};

/// Mutable state of one request, owned by its lifecycle task
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub tenant_id: String,
    pub group: String,
    pub model: String,
    pub channel_id: Option<ChannelId>,
    /// Prompt tokens, estimated locally and replaced by upstream usage when reported
    pub prompt_tokens: u64,
    /// Output tokens produced so far
    pub billable_tokens: u64,
    pub client_connected: bool,
    /// Channel retries consumed
    pub retries: u32,
    stage: Stage,
    hold: Option<Hold>,
    billing: bool,
}

impl RequestContext {
    pub fn new(tenant_id: impl Into<String>, group: impl Into<String>, model: impl Into<String>, billing: bool) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            group: group.into(),
            model: model.into(),
            channel_id: None,
            prompt_tokens: 0,
            billable_tokens: 0,
            client_connected: true,
            retries: 0,
            stage: Stage::Idle,
            hold: None,
            billing,
        }
    }

    pub const fn stage(&self) -> Stage {
        self.stage
    }

    pub const fn billing(&self) -> bool {
        self.billing
    }

    /// Terminal stage, once reached
    pub const fn terminal(&self) -> Option<Stage> {
        if self.stage.is_terminal() { Some(self.stage) } else { None }
    }

    /// Hold currently owned by this request
    pub const fn hold(&self) -> Option<&Hold> {
        self.hold.as_ref()
    }

    pub(crate) fn attach_hold(&mut self, hold: Hold) {
        debug_assert!(self.hold.is_none(), "request already owns a hold");
        self.hold = Some(hold);
    }

    /// Hand the hold over for commit or release
    pub(crate) fn take_hold(&mut self) -> Option<Hold> {
        self.hold.take()
    }

    /// Move to `to`, enforcing the stage graph and settlement invariants
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidTransition`] when the edge does not
    /// exist, when partial billable output would fail without settlement,
    /// or when a terminal stage would be entered while a hold is owned
    pub fn advance(&mut self, to: Stage) -> Result<(), PipelineError> {
        let from = self.stage;
        let invalid = PipelineError::InvalidTransition { from, to };

        if to == Stage::Idle || !from.can_transition(to, self.billing) {
            return Err(invalid);
        }

        if self.billing && from == Stage::Generate && to == Stage::Failed && self.billable_tokens > 0 {
            return Err(invalid);
        }

        if to.is_terminal() && self.hold.is_some() {
            return Err(invalid);
        }

        if from != to {
            tracing::debug!(request_id = %self.request_id, %from, %to, "stage transition");
        }

        self.stage = to;
        Ok(())
    }

    /// Return a terminal context to `idle` for another attempt
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RecoveryPending`] while the tenant has an
    /// unresolved recovery obligation, or `InvalidTransition` when the
    /// context is not terminal
    pub fn reset(&mut self, recovery: &RecoveryBook) -> Result<(), PipelineError> {
        if !self.stage.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                from: self.stage,
                to: Stage::Idle,
            });
        }

        if recovery.is_pending(&self.tenant_id) {
            return Err(PipelineError::RecoveryPending(self.tenant_id.clone()));
        }

        self.stage = Stage::Idle;
        self.channel_id = None;
        self.prompt_tokens = 0;
        self.billable_tokens = 0;
        self.client_connected = true;
        self.retries = 0;

        Ok(())
    }
}
