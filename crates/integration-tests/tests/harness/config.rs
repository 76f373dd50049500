//! Programmatic configuration builder for integration tests

use std::{collections::BTreeSet, net::SocketAddr};

use relay_config::{BillingConfig, ChannelConfig, Config, HealthConfig, ServerConfig, TenantSeed};
use secrecy::SecretString;

/// Secret the test server expects on admin routes
pub const ADMIN_SECRET: &str = "test-admin-secret";

/// Tenant seeded by default
pub const TENANT: &str = "tenant-a";

/// Model every test channel serves
pub const MODEL: &str = "mock-model";

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder with billing on and one funded tenant
    pub fn new() -> Self {
        Self {
            config: Config {
                server: ServerConfig {
                    listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                    admin_secret: Some(SecretString::from(ADMIN_SECRET)),
                    health: HealthConfig::default(),
                },
                billing: BillingConfig {
                    enabled: true,
                    tenants: vec![TenantSeed {
                        id: TENANT.to_owned(),
                        balance: 10_000,
                    }],
                    ..BillingConfig::default()
                },
                ..Config::default()
            },
        }
    }

    /// Add a channel pointed at a mock upstream
    pub fn with_channel(mut self, id: u64, priority: i64, base_url: &str) -> Self {
        self.config.channels.list.push(ChannelConfig {
            id,
            name: Some(format!("mock-{id}")),
            base_url: base_url.parse().expect("valid URL"),
            credential: Some(SecretString::from("test-key")),
            enabled: true,
            priority,
            weight: 1,
            groups: BTreeSet::from(["default".to_owned()]),
            models: BTreeSet::from([MODEL.to_owned()]),
            tag: Some("mock".to_owned()),
        });
        self
    }

    /// Replace the seeded balance of the default tenant
    pub fn with_balance(mut self, balance: i64) -> Self {
        for tenant in &mut self.config.billing.tenants {
            tenant.balance = balance;
        }
        self
    }

    pub fn without_billing(mut self) -> Self {
        self.config.billing.enabled = false;
        self
    }

    pub fn without_admin(mut self) -> Self {
        self.config.server.admin_secret = None;
        self
    }

    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
