mod admin;
mod auth;
mod callbacks;
mod error;
mod generate;
mod health;
mod state;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{Router, routing};
use relay_channel::{Channel, ChannelHealth, ChannelRegistry, ChannelSelector};
use relay_config::Config;
use relay_ledger::{Ledger, MemoryLedger, RecoveryBook, ReleaseQueue};
use relay_pipeline::{Orchestrator, PipelineSettings, Pricing, upstream::HttpUpstream};
use relay_reconcile::{HttpJobStatusSource, Reconciler, ReconcilerSettings};
use secrecy::ExposeSecret;
use tower_http::trace::TraceLayer;

pub use auth::ADMIN_SECRET_HEADER;
pub use error::ApiError;
pub use state::AppState;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    reconciler: Option<Reconciler>,
    releases: ReleaseSweeper,
}

/// Background retry of deferred hold releases
struct ReleaseSweeper {
    queue: Arc<ReleaseQueue>,
    ledger: Arc<dyn Ledger>,
    recovery: Arc<RecoveryBook>,
    interval: Duration,
}

impl Server {
    /// Build the server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a duration setting cannot be parsed
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let settings = PipelineSettings::from_config(&config.billing, &config.channels, &config.pipeline)
            .map_err(anyhow::Error::msg)
            .context("invalid pipeline settings")?;

        let registry = Arc::new(ChannelRegistry::new(config.channels.list.into_iter().map(Channel::from)));
        let health = Arc::new(ChannelHealth::new(config.channels.circuit_breaker));
        let selector = Arc::new(ChannelSelector::new(
            Arc::clone(&registry),
            health,
            config.channels.weight_bias,
        ));

        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::with_balances(
            config.billing.tenants.into_iter().map(|t| (t.id, t.balance)),
        ));
        let recovery = Arc::new(RecoveryBook::new());
        let releases = Arc::new(ReleaseQueue::new());

        let sweep_interval = config
            .pipeline
            .release_sweep_interval()
            .map_err(anyhow::Error::msg)
            .context("invalid release sweep interval")?;

        let orchestrator = Orchestrator::new(
            selector,
            Arc::clone(&ledger),
            Arc::clone(&recovery),
            Arc::clone(&releases),
            Arc::new(HttpUpstream::default()),
            Pricing::new(config.billing.pricing),
            settings,
        );

        let reconciler = if config.reconciler.enabled {
            let poll_interval = config
                .reconciler
                .poll_interval()
                .map_err(anyhow::Error::msg)
                .context("invalid reconciler poll interval")?;
            let abandon_after = config
                .reconciler
                .abandon_after()
                .map_err(anyhow::Error::msg)
                .context("invalid reconciler abandon deadline")?;
            let settled_retention = config
                .reconciler
                .settled_retention()
                .map_err(anyhow::Error::msg)
                .context("invalid reconciler settled retention")?;

            Some(Reconciler::new(
                Arc::clone(&ledger),
                Arc::new(HttpJobStatusSource::new(registry)),
                Arc::clone(&releases),
                ReconcilerSettings {
                    poll_interval,
                    abandon_after,
                    settled_retention,
                },
            ))
        } else {
            None
        };

        let admin_secret = config
            .server
            .admin_secret
            .filter(|secret| !secret.expose_secret().is_empty());

        let state = AppState {
            orchestrator,
            reconciler: reconciler.clone(),
            admin_secret,
        };

        let mut app = Router::new().route("/v1/generate", routing::post(generate::generate_handler));

        // Operator and callback routes exist only with a secret to guard them
        if state.admin_secret.is_some() {
            let guarded = admin::router()
                .route("/callbacks/topup", routing::post(callbacks::topup_handler))
                .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_admin));
            app = app.merge(guarded);
        } else {
            tracing::warn!("no admin secret configured, admin and callback routes are disabled");
        }

        let mut app = app.with_state(state);

        if config.server.health.enabled {
            app = app.route(&config.server.health.path, routing::get(health::health_handler));
        }

        app = app.layer(TraceLayer::new_for_http());

        Ok(Self {
            router: app,
            listen_address,
            reconciler,
            releases: ReleaseSweeper {
                queue: releases,
                ledger,
                recovery,
                interval: sweep_interval,
            },
        })
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener. Neither the
    /// reconciler nor the release sweeper is started.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests, the release sweeper and, when enabled, the reconciler
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        let reconciler = self.reconciler.map(|r| r.spawn(shutdown.child_token()));
        let sweeper = self.releases.queue.spawn(
            self.releases.ledger,
            self.releases.recovery,
            self.releases.interval,
            shutdown.child_token(),
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        if let Some(handle) = reconciler {
            handle.await.context("reconciler task failed")?;
        }
        sweeper.await.context("release sweeper task failed")?;

        Ok(())
    }
}
