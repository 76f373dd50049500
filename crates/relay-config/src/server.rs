use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

use crate::health::HealthConfig;

/// HTTP server configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind (defaults to `0.0.0.0:3000`)
    pub listen_address: Option<SocketAddr>,
    /// Shared secret guarding admin and callback routes
    ///
    /// Admin routes are not mounted when this is absent
    #[serde(default)]
    pub admin_secret: Option<SecretString>,
    /// Health endpoint configuration
    #[serde(default)]
    pub health: HealthConfig,
}
