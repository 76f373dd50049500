use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Header carrying the tenant identifier
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Header carrying the tenant-facing access group
pub const GROUP_HEADER: &str = "x-tenant-group";

/// Group used when the caller does not name one
pub const DEFAULT_GROUP: &str = "default";

/// Tenant identity resolved by the outer auth layer
///
/// The gateway core only needs the tenant id (whose balance is charged)
/// and the group (which filters eligible channels)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantIdentity {
    /// Tenant identifier owning the balance
    pub tenant_id: String,
    /// Access group used for channel eligibility
    pub group: String,
}

impl TenantIdentity {
    /// Create an identity for the given tenant and group
    pub fn new(tenant_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            group: group.into(),
        }
    }

    /// Extract an identity from request headers
    ///
    /// Returns `None` when the tenant header is missing or empty. A missing
    /// group header falls back to [`DEFAULT_GROUP`].
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let tenant_id = headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())?;

        let group = headers
            .get(GROUP_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_GROUP);

        Some(Self::new(tenant_id, group))
    }
}
