//! Test server wrapper that starts the gateway on a random port

use std::{net::SocketAddr, time::Duration};

use relay_config::Config;
use relay_server::{ADMIN_SECRET_HEADER, Server};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::config::{ADMIN_SECRET, MODEL, TENANT};

/// A running test server instance
pub struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

impl TestServer {
    /// Start a test server with the given configuration
    ///
    /// Binds to port 0 for automatic port assignment
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let server = Server::new(config)?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        // Bind the listener here so we know the actual port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            axum::serve(listener, server.into_router())
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        let client = reqwest::Client::new();

        Ok(Self { addr, shutdown, client })
    }

    /// Base URL of the running test server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Get a reference to the HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Start a generation request for the default tenant
    pub fn generate(&self, stream: bool) -> reqwest::RequestBuilder {
        self.client
            .post(self.url("/v1/generate"))
            .header("x-tenant-id", TENANT)
            .json(&serde_json::json!({
                "model": MODEL,
                "payload": {"messages": [{"role": "user", "content": "Hello"}], "max_tokens": 50},
                "stream": stream,
            }))
    }

    /// Request builder carrying the admin secret
    pub fn admin(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(ADMIN_SECRET_HEADER, ADMIN_SECRET)
    }

    /// Account and recovery view of a tenant
    pub async fn tenant(&self, tenant_id: &str) -> Value {
        self.admin(reqwest::Method::GET, &format!("/admin/tenants/{tenant_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll a tenant until no hold is outstanding
    pub async fn settled(&self, tenant_id: &str) -> Value {
        for _ in 0..250 {
            let tenant = self.tenant(tenant_id).await;
            if tenant["reserved_total"] == 0 && tenant["committed_total"] != 0 {
                return tenant;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("tenant {tenant_id} never settled");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
