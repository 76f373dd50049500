//! Test doubles for the orchestrator

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::stream;
use relay_channel::{Channel, ChannelHealth, ChannelId, ChannelRegistry, ChannelSelector};
use relay_config::{CircuitBreakerConfig, PricingConfig};
use relay_ledger::{
    AccountSnapshot, Amount, CommitOutcome, CreditOutcome, Hold, HoldState, Ledger, LedgerError, MemoryLedger,
    RecoveryBook, ReleaseQueue, ReleaseRetry,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;

use crate::{
    Orchestrator, PipelineSettings, Pricing, UpstreamError,
    upstream::{Chunk, GenerateRequest, Upstream, UpstreamEvent, UpstreamStream, Usage},
};

pub type Event = Result<UpstreamEvent, UpstreamError>;

/// Behaviour of one upstream call
pub enum Script {
    /// Refuse before streaming
    Reject(UpstreamError),
    /// Stream a fixed sequence of events
    Events(Vec<Event>),
    /// Stream whatever the test sends
    Live(mpsc::UnboundedReceiver<Event>),
    /// Accept the call and never produce anything
    Silent,
}

/// Upstream whose behaviour is scripted per channel
#[derive(Default)]
pub struct ScriptedUpstream {
    scripts: Mutex<HashMap<ChannelId, VecDeque<Script>>>,
    calls: Mutex<Vec<ChannelId>>,
}

impl ScriptedUpstream {
    pub fn push(&self, channel: ChannelId, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(channel)
            .or_default()
            .push_back(script);
    }

    /// Open a live stream on `channel` and return its feeding end
    pub fn live(&self, channel: ChannelId) -> mpsc::UnboundedSender<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(channel, Script::Live(rx));
        tx
    }

    pub fn calls(&self) -> Vec<ChannelId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn generate(&self, channel: &Channel, _request: &GenerateRequest) -> Result<UpstreamStream, UpstreamError> {
        self.calls.lock().unwrap().push(channel.id);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&channel.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Script::Reject(UpstreamError::Status {
                    status: 500,
                    body: "unscripted".into(),
                })
            });

        match script {
            Script::Reject(error) => Err(error),
            Script::Events(events) => Ok(Box::pin(stream::iter(events))),
            Script::Live(rx) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            }))),
            Script::Silent => Ok(Box::pin(stream::pending::<Event>())),
        }
    }
}

pub fn chunk(text: &str) -> Event {
    Ok(UpstreamEvent::Chunk(Chunk {
        text: text.to_owned(),
        raw: json!({"choices": [{"index": 0, "delta": {"content": text}}]}),
    }))
}

pub fn usage(prompt_tokens: u64, completion_tokens: u64) -> Event {
    Ok(UpstreamEvent::Usage(Usage {
        prompt_tokens,
        completion_tokens,
    }))
}

pub const fn done() -> Event {
    Ok(UpstreamEvent::Done)
}

/// Ledger whose commits and releases can be made to fail
pub struct FlakyLedger {
    inner: MemoryLedger,
    fail_commits: AtomicBool,
    /// Apply the commit before reporting the failure
    lose_acknowledgement: AtomicBool,
    refuse_releases: AtomicBool,
}

impl FlakyLedger {
    pub fn new(balance: Amount) -> Self {
        Self {
            inner: MemoryLedger::with_balances([("tenant", balance)]),
            fail_commits: AtomicBool::new(false),
            lose_acknowledgement: AtomicBool::new(false),
            refuse_releases: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self) {
        self.fail_commits.store(true, Ordering::SeqCst);
    }

    pub fn lose_acknowledgements(&self) {
        self.fail_commits.store(true, Ordering::SeqCst);
        self.lose_acknowledgement.store(true, Ordering::SeqCst);
    }

    /// Make every release fail as unavailable, or stop doing so
    pub fn refuse_releases(&self, refuse: bool) {
        self.refuse_releases.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn reserve(&self, tenant_id: &str, amount: Amount) -> Result<Hold, LedgerError> {
        self.inner.reserve(tenant_id, amount).await
    }

    async fn commit(&self, hold: &Hold, actual: Amount) -> Result<CommitOutcome, LedgerError> {
        if !self.fail_commits.load(Ordering::SeqCst) {
            return self.inner.commit(hold, actual).await;
        }

        if self.lose_acknowledgement.load(Ordering::SeqCst) {
            self.inner.commit(hold, actual).await?;
        }

        Err(LedgerError::Unavailable("connection reset".into()))
    }

    async fn release(&self, hold: &Hold) -> Result<(), LedgerError> {
        if self.refuse_releases.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".into()));
        }
        self.inner.release(hold).await
    }

    async fn credit(
        &self,
        tenant_id: &str,
        amount: Amount,
        transaction_id: Option<&str>,
    ) -> Result<CreditOutcome, LedgerError> {
        self.inner.credit(tenant_id, amount, transaction_id).await
    }

    async fn account(&self, tenant_id: &str) -> Result<AccountSnapshot, LedgerError> {
        self.inner.account(tenant_id).await
    }

    async fn hold_state(&self, hold: &Hold) -> Option<HoldState> {
        self.inner.hold_state(hold).await
    }
}

pub fn channel(id: ChannelId, priority: i64) -> Channel {
    Channel {
        id,
        name: None,
        base_url: Url::parse("https://upstream.example.com/v1").unwrap(),
        credential: None,
        enabled: true,
        priority,
        weight: 1,
        groups: BTreeSet::from(["default".to_owned()]),
        models: BTreeSet::from(["test-model".to_owned()]),
        tag: None,
    }
}

pub fn payload() -> Value {
    json!({"messages": [{"role": "user", "content": "Say hello"}], "max_tokens": 20})
}

pub struct Fixture {
    pub orchestrator: Orchestrator,
    pub upstream: Arc<ScriptedUpstream>,
    pub ledger: Arc<FlakyLedger>,
    pub recovery: Arc<RecoveryBook>,
}

pub fn fixture(channels: impl IntoIterator<Item = Channel>, billing: bool, balance: Amount) -> Fixture {
    let selector = Arc::new(ChannelSelector::new(
        Arc::new(ChannelRegistry::new(channels)),
        Arc::new(ChannelHealth::new(CircuitBreakerConfig::default())),
        10,
    ));
    let upstream = Arc::new(ScriptedUpstream::default());
    let ledger = Arc::new(FlakyLedger::new(balance));
    let recovery = Arc::new(RecoveryBook::new());

    let settings = PipelineSettings {
        billing,
        max_retries: 2,
        estimated_completion_tokens: 50,
        chunk_timeout: Duration::from_secs(1),
        request_timeout: Duration::from_secs(30),
        release_retry: ReleaseRetry {
            attempts: 2,
            initial_backoff: Duration::from_millis(1),
        },
    };

    let orchestrator = Orchestrator::new(
        selector,
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        Arc::clone(&recovery),
        Arc::new(ReleaseQueue::new()),
        Arc::clone(&upstream) as Arc<dyn Upstream>,
        Pricing::new(PricingConfig::default()),
        settings,
    );

    Fixture {
        orchestrator,
        upstream,
        ledger,
        recovery,
    }
}
