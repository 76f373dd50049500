//! Lifecycle orchestration
//!
//! Drives one request through `ingest -> tokenize -> hold -> generate ->
//! finalize` and guarantees every acquired hold ends up committed or
//! released before the request reaches a terminal stage.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use relay_channel::{Channel, ChannelError, ChannelId, ChannelSelector};
use relay_config::{BillingConfig, ChannelsConfig, PipelineConfig};
use relay_ledger::{Amount, Hold, HoldState, Ledger, LedgerError, RecoveryBook, ReleaseQueue, ReleaseRetry};
use relay_telemetry::{KeyValue, metrics};
use serde::Serialize;
use serde_json::Value;
use tokio::{task::JoinHandle, time::Instant};
use tracing::Instrument;

use crate::{
    ClientEvent, ClientLink, PipelineError, Pricing, RequestContext, Stage, UpstreamError, tokenize,
    upstream::{GenerateRequest, Upstream, UpstreamEvent, Usage},
};

/// Pipeline policy values
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Whether the hold and finalize stages run
    pub billing: bool,
    /// Channel retries after the first attempt
    pub max_retries: u32,
    /// Completion tokens reserved when the payload sets no budget
    pub estimated_completion_tokens: u64,
    /// Longest allowed silence between upstream events
    pub chunk_timeout: Duration,
    /// Upper bound for one upstream attempt
    pub request_timeout: Duration,
    /// In-line retry for hold releases before they are deferred
    pub release_retry: ReleaseRetry,
}

impl PipelineSettings {
    /// Build settings from the relevant configuration sections
    ///
    /// # Errors
    ///
    /// Returns an error if a duration string is invalid
    pub fn from_config(
        billing: &BillingConfig,
        channels: &ChannelsConfig,
        pipeline: &PipelineConfig,
    ) -> Result<Self, String> {
        Ok(Self {
            billing: billing.enabled,
            max_retries: channels.max_retries,
            estimated_completion_tokens: billing.estimated_completion_tokens,
            chunk_timeout: pipeline.chunk_timeout()?,
            request_timeout: pipeline.request_timeout()?,
            release_retry: ReleaseRetry {
                attempts: pipeline.release_attempts.max(1),
                initial_backoff: pipeline.release_backoff()?,
            },
        })
    }
}

/// A request admitted by the transport layer
#[derive(Debug, Clone)]
pub struct Admission {
    pub tenant_id: String,
    pub group: String,
    pub model: String,
    pub payload: Value,
    pub stream: bool,
}

/// Ledger effect of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Settlement {
    /// No hold was acquired
    None,
    Committed { amount: Amount },
    Released,
    /// Work was done but could not be committed; an obligation was raised
    RecoveryRequired { amount: Amount },
    /// The hold could not be released yet and was handed to the release queue
    ReleaseDeferred { amount: Amount },
}

impl Settlement {
    const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Committed { .. } => "committed",
            Self::Released => "released",
            Self::RecoveryRequired { .. } => "recovery_required",
            Self::ReleaseDeferred { .. } => "release_deferred",
        }
    }
}

/// Summary of a finished request
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub request_id: String,
    pub tenant_id: String,
    /// `done` or `failed`
    pub terminal: Stage,
    /// Stage the request was in when it terminated
    pub last_stage: Stage,
    pub channel_id: Option<ChannelId>,
    pub retries: u32,
    pub prompt_tokens: u64,
    pub billable_tokens: u64,
    pub settlement: Settlement,
    pub client_connected: bool,
    /// Output reached the client before generation or settlement failed
    pub interrupted: bool,
    #[serde(skip)]
    pub error: Option<PipelineError>,
}

/// Runs request lifecycles against shared channel and ledger state
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    selector: Arc<ChannelSelector>,
    ledger: Arc<dyn Ledger>,
    recovery: Arc<RecoveryBook>,
    releases: Arc<ReleaseQueue>,
    upstream: Arc<dyn Upstream>,
    pricing: Pricing,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        selector: Arc<ChannelSelector>,
        ledger: Arc<dyn Ledger>,
        recovery: Arc<RecoveryBook>,
        releases: Arc<ReleaseQueue>,
        upstream: Arc<dyn Upstream>,
        pricing: Pricing,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                selector,
                ledger,
                recovery,
                releases,
                upstream,
                pricing,
                settings,
            }),
        }
    }

    pub fn selector(&self) -> &Arc<ChannelSelector> {
        &self.inner.selector
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.inner.ledger
    }

    pub fn recovery(&self) -> &Arc<RecoveryBook> {
        &self.inner.recovery
    }

    /// Holds whose release is still outstanding
    pub fn releases(&self) -> &Arc<ReleaseQueue> {
        &self.inner.releases
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// Run the lifecycle on its own task
    ///
    /// The task is detached from the caller: dropping the handle (or the
    /// HTTP handler awaiting it) never interrupts settlement.
    pub fn spawn(&self, admission: Admission, client: ClientLink) -> JoinHandle<ExecutionReport> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.execute(admission, client).await })
    }

    /// Run one request to a terminal stage
    pub async fn execute(&self, admission: Admission, client: ClientLink) -> ExecutionReport {
        let started = Instant::now();
        let ctx = RequestContext::new(
            admission.tenant_id,
            admission.group,
            admission.model,
            self.inner.settings.billing,
        );

        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id,
            tenant_id = %ctx.tenant_id,
            model = %ctx.model,
            stream = admission.stream,
        );

        let mut execution = Execution {
            inner: &self.inner,
            ctx,
            client,
            payload: admission.payload,
            channel: None,
            settlement: Settlement::None,
            interrupted: false,
            last_stage: Stage::Idle,
            error: None,
        };

        execution.run().instrument(span).await;

        let report = execution.into_report();
        record_metrics(&report, started);
        report
    }
}

fn record_metrics(report: &ExecutionReport, started: Instant) {
    let instruments = metrics::instruments();

    let attributes = [
        KeyValue::new("outcome", report.terminal.as_str()),
        KeyValue::new("stage", report.last_stage.as_str()),
    ];
    instruments.request_count.add(1, &attributes);
    instruments
        .request_duration
        .record(started.elapsed().as_secs_f64(), &attributes);

    if report.settlement != Settlement::None {
        instruments
            .settlement_count
            .add(1, &[KeyValue::new("result", report.settlement.as_str())]);
    }
}

struct Execution<'a> {
    inner: &'a Inner,
    ctx: RequestContext,
    client: ClientLink,
    payload: Value,
    channel: Option<Arc<Channel>>,
    settlement: Settlement,
    interrupted: bool,
    last_stage: Stage,
    error: Option<PipelineError>,
}

impl Execution<'_> {
    async fn run(&mut self) {
        match self.stages().await {
            Ok(()) => self.complete().await,
            Err(error) => self.fail(error).await,
        }

        tracing::info!(
            terminal = %self.ctx.stage(),
            last_stage = %self.last_stage,
            channel_id = self.ctx.channel_id,
            retries = self.ctx.retries,
            billable_tokens = self.ctx.billable_tokens,
            settlement = self.settlement.as_str(),
            client_connected = self.ctx.client_connected,
            "request finished"
        );
    }

    async fn stages(&mut self) -> Result<(), PipelineError> {
        self.ingest()?;
        self.tokenize()?;

        if self.ctx.billing() {
            self.hold().await?;
        }

        if let Err(error) = self.generate().await {
            if self.ctx.billable_tokens == 0 {
                return Err(error);
            }

            // Partial output is settled like a completed generation
            tracing::warn!(
                billable_tokens = self.ctx.billable_tokens,
                error = %error,
                "generation interrupted after partial output"
            );
            self.interrupted = true;
        }

        if self.ctx.billing() {
            self.finalize().await?;
        }

        Ok(())
    }

    fn ingest(&mut self) -> Result<(), PipelineError> {
        self.ctx.advance(Stage::Ingest)?;

        if self.ctx.tenant_id.trim().is_empty() {
            return Err(PipelineError::Admission("tenant id is required".to_owned()));
        }

        if self.ctx.model.trim().is_empty() {
            return Err(PipelineError::Admission("model is required".to_owned()));
        }

        if !self.payload.is_object() {
            return Err(PipelineError::Admission("payload must be a JSON object".to_owned()));
        }

        let has_input =
            self.payload.get("messages").is_some_and(Value::is_array) || self.payload.get("prompt").is_some();
        if !has_input {
            return Err(PipelineError::Admission("payload must contain `messages` or `prompt`".to_owned()));
        }

        let channel = self
            .inner
            .selector
            .select(&self.ctx.group, &self.ctx.model, 0)
            .map_err(PipelineError::Capacity)?;
        self.use_channel(channel);

        self.ensure_connected()
    }

    fn tokenize(&mut self) -> Result<(), PipelineError> {
        self.ctx.advance(Stage::Tokenize)?;
        self.ctx.prompt_tokens = tokenize::estimate_prompt_tokens(&self.payload);

        tracing::debug!(prompt_tokens = self.ctx.prompt_tokens, "prompt tokenized");
        self.ensure_connected()
    }

    async fn hold(&mut self) -> Result<(), PipelineError> {
        self.ctx.advance(Stage::Hold)?;

        let completion = tokenize::requested_completion_tokens(&self.payload)
            .unwrap_or(self.inner.settings.estimated_completion_tokens);
        let estimate = self
            .inner
            .pricing
            .quota(&self.ctx.model, self.ctx.prompt_tokens, completion);

        let hold = self.inner.ledger.reserve(&self.ctx.tenant_id, estimate).await?;
        tracing::debug!(hold_id = %hold.id, amount = estimate, "hold acquired");
        self.ctx.attach_hold(hold);

        self.ensure_connected()
    }

    async fn generate(&mut self) -> Result<(), PipelineError> {
        self.ctx.advance(Stage::Generate)?;

        let request = GenerateRequest {
            request_id: self.ctx.request_id.clone(),
            model: self.ctx.model.clone(),
            payload: self.payload.clone(),
        };

        loop {
            let Some(channel) = self.channel.clone() else {
                return Err(PipelineError::Capacity(ChannelError::NotFound {
                    group: self.ctx.group.clone(),
                    model: self.ctx.model.clone(),
                }));
            };

            let source = match self.attempt(&channel, &request).await {
                Ok(()) => {
                    self.inner.selector.record_success(channel.id);
                    return Ok(());
                }
                Err(source) => source,
            };

            self.inner.selector.record_failure(channel.id);
            tracing::warn!(
                channel_id = channel.id,
                retry_index = self.ctx.retries,
                billable_tokens = self.ctx.billable_tokens,
                error = %source,
                "channel attempt failed"
            );

            let error = PipelineError::Channel {
                channel_id: channel.id,
                source,
            };

            if self.ctx.billable_tokens > 0 || self.ctx.retries >= self.inner.settings.max_retries {
                return Err(error);
            }

            self.ctx.retries += 1;
            metrics::instruments().channel_retry_count.add(1, &[]);

            match self
                .inner
                .selector
                .select(&self.ctx.group, &self.ctx.model, self.ctx.retries)
            {
                Ok(next) => self.use_channel(next),
                Err(e) => {
                    tracing::warn!(error = %e, "no channel left to retry on");
                    return Err(error);
                }
            }
        }
    }

    /// Consume one upstream stream until its completion marker
    async fn attempt(&mut self, channel: &Channel, request: &GenerateRequest) -> Result<(), UpstreamError> {
        let inner = self.inner;
        let settings = &inner.settings;
        let deadline = Instant::now() + settings.request_timeout;

        let mut stream = tokio::time::timeout(settings.request_timeout, inner.upstream.generate(channel, request))
            .await
            .map_err(|_| UpstreamError::Timeout(settings.request_timeout))??;

        loop {
            let window = settings
                .chunk_timeout
                .min(deadline.saturating_duration_since(Instant::now()));

            let event = tokio::time::timeout(window, stream.next())
                .await
                .map_err(|_| UpstreamError::Timeout(window))?
                .ok_or(UpstreamError::Truncated)??;

            match event {
                UpstreamEvent::Chunk(chunk) => {
                    self.ctx.billable_tokens += tokenize::count_tokens(&chunk.text);
                    self.ctx
                        .advance(Stage::Generate)
                        .map_err(|e| UpstreamError::Decode(e.to_string()))?;
                    self.deliver(ClientEvent::Chunk(chunk)).await;
                }
                UpstreamEvent::Usage(usage) => self.apply_usage(usage),
                UpstreamEvent::Done => return Ok(()),
            }
        }
    }

    /// Reported usage wins over local counts when it is larger
    fn apply_usage(&mut self, usage: Usage) {
        self.ctx.billable_tokens = self.ctx.billable_tokens.max(usage.completion_tokens);

        if usage.prompt_tokens > 0 {
            self.ctx.prompt_tokens = usage.prompt_tokens;
        }
    }

    async fn finalize(&mut self) -> Result<(), PipelineError> {
        self.ctx.advance(Stage::Finalize)?;

        let amount = self
            .inner
            .pricing
            .quota(&self.ctx.model, self.ctx.prompt_tokens, self.ctx.billable_tokens);

        let Some(hold) = self.ctx.take_hold() else {
            return Err(PipelineError::InvalidTransition {
                from: Stage::Finalize,
                to: Stage::Done,
            });
        };

        let commit_error = match self.inner.ledger.commit(&hold, amount).await {
            Ok(outcome) => {
                self.settlement = Settlement::Committed {
                    amount: outcome.amount(),
                };
                return Ok(());
            }
            Err(e) => e,
        };

        tracing::error!(hold_id = %hold.id, amount, error = %commit_error, "commit failed");

        let released = self.inner.settings.release_retry.release(self.inner.ledger.as_ref(), &hold).await;
        // The commit landed even though its acknowledgement was lost
        if let Err(LedgerError::HoldCommitted(_)) = released {
            self.settlement = Settlement::Committed { amount };
            return Ok(());
        }

        self.inner
            .recovery
            .raise(&self.ctx.tenant_id, &self.ctx.request_id, amount);
        self.settlement = Settlement::RecoveryRequired { amount };

        // Whether the commit landed is only known once the release goes through
        if let Err(e) = released {
            tracing::error!(hold_id = %hold.id, error = %e, "hold release failed after commit failure");
            self.inner.releases.defer(hold, Some(&self.ctx.request_id));
        }

        Err(PipelineError::Settlement {
            amount,
            reason: commit_error.to_string(),
        })
    }

    async fn complete(&mut self) {
        self.last_stage = self.ctx.stage();

        if let Err(e) = self.ctx.advance(Stage::Done) {
            tracing::error!(error = %e, "could not enter done stage");
            self.error = Some(e);
            return;
        }

        let usage = Usage {
            prompt_tokens: self.ctx.prompt_tokens,
            completion_tokens: self.ctx.billable_tokens,
        };
        let interrupted = self.interrupted;
        self.deliver(ClientEvent::Completed { usage, interrupted }).await;
    }

    async fn fail(&mut self, error: PipelineError) {
        self.last_stage = self.ctx.stage();

        if let Some(hold) = self.ctx.take_hold() {
            self.settlement = self.release(hold).await;
        }

        if let Err(e) = self.ctx.advance(Stage::Failed) {
            tracing::error!(error = %e, "could not enter failed stage");
        }

        tracing::warn!(stage = %self.last_stage, error = %error, "request failed");

        // A client that already received output gets a completion signal;
        // the failure itself is carried by the report and any obligation
        if self.ctx.billable_tokens > 0 {
            self.interrupted = true;
            let usage = Usage {
                prompt_tokens: self.ctx.prompt_tokens,
                completion_tokens: self.ctx.billable_tokens,
            };
            self.deliver(ClientEvent::Completed {
                usage,
                interrupted: true,
            })
            .await;
        } else {
            self.deliver(ClientEvent::Failed(error.clone())).await;
        }

        self.error = Some(error);
    }

    /// Return an unused hold, deferring it when the ledger keeps refusing
    async fn release(&self, hold: Hold) -> Settlement {
        let ledger = self.inner.ledger.as_ref();

        match self.inner.settings.release_retry.release(ledger, &hold).await {
            Ok(()) => Settlement::Released,
            Err(LedgerError::HoldCommitted(_)) => {
                let amount = match ledger.hold_state(&hold).await {
                    Some(HoldState::Committed { amount }) => amount,
                    _ => hold.amount,
                };
                Settlement::Committed { amount }
            }
            Err(e) => {
                tracing::error!(hold_id = %hold.id, error = %e, "hold release failed");
                let amount = hold.amount;
                self.inner.releases.defer(hold, None);
                Settlement::ReleaseDeferred { amount }
            }
        }
    }

    fn use_channel(&mut self, channel: Arc<Channel>) {
        self.ctx.channel_id = Some(channel.id);
        self.channel = Some(channel);
    }

    fn ensure_connected(&mut self) -> Result<(), PipelineError> {
        if self.client.is_connected() {
            return Ok(());
        }

        self.ctx.client_connected = false;
        Err(PipelineError::Disconnected(self.ctx.stage()))
    }

    async fn deliver(&mut self, event: ClientEvent) {
        if !self.ctx.client_connected {
            return;
        }

        if !self.client.deliver(event).await {
            self.ctx.client_connected = false;
            tracing::info!(stage = %self.ctx.stage(), "client disconnected, settlement continues");
        }
    }

    fn into_report(self) -> ExecutionReport {
        ExecutionReport {
            request_id: self.ctx.request_id.clone(),
            tenant_id: self.ctx.tenant_id.clone(),
            terminal: self.ctx.stage(),
            last_stage: self.last_stage,
            channel_id: self.ctx.channel_id,
            retries: self.ctx.retries,
            prompt_tokens: self.ctx.prompt_tokens,
            billable_tokens: self.ctx.billable_tokens,
            settlement: self.settlement,
            client_connected: self.ctx.client_connected,
            interrupted: self.interrupted,
            error: self.error,
        }
    }
}
