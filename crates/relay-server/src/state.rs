use relay_pipeline::Orchestrator;
use relay_reconcile::Reconciler;
use secrecy::SecretString;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Present when the reconciler is enabled
    pub reconciler: Option<Reconciler>,
    pub admin_secret: Option<SecretString>,
}
