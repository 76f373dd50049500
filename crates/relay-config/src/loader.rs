use std::{collections::HashSet, path::Path};

use secrecy::ExposeSecret;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse configuration from TOML text, expanding placeholders and validating
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing, or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_channels()?;
        self.validate_billing()?;
        self.validate_durations()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_channels(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();

        for channel in &self.channels.list {
            if !seen.insert(channel.id) {
                anyhow::bail!("duplicate channel id {}", channel.id);
            }

            if channel.groups.is_empty() {
                anyhow::bail!("channel {} must serve at least one group", channel.id);
            }

            if channel.models.is_empty() {
                anyhow::bail!("channel {} must serve at least one model", channel.id);
            }

            if let Some(ref tag) = channel.tag
                && !is_valid_tag(tag)
            {
                anyhow::bail!("channel {} has invalid tag '{tag}'", channel.id);
            }
        }

        if self.channels.circuit_breaker.error_threshold == 0 {
            anyhow::bail!("channels.circuit_breaker.error_threshold must be greater than 0");
        }

        Ok(())
    }

    fn validate_billing(&self) -> anyhow::Result<()> {
        let pricing = &self.billing.pricing;

        if pricing.default_ratio < 0.0 || pricing.completion_ratio < 0.0 {
            anyhow::bail!("billing.pricing ratios must not be negative");
        }

        for (model, ratio) in &pricing.models {
            if *ratio < 0.0 {
                anyhow::bail!("billing.pricing ratio for model '{model}' must not be negative");
            }
        }

        let mut seen = HashSet::new();
        for tenant in &self.billing.tenants {
            if !seen.insert(tenant.id.as_str()) {
                anyhow::bail!("duplicate billing tenant '{}'", tenant.id);
            }
        }

        Ok(())
    }

    fn validate_durations(&self) -> anyhow::Result<()> {
        self.pipeline.chunk_timeout().map_err(|e| anyhow::anyhow!("pipeline.chunk_timeout: {e}"))?;
        self.pipeline.request_timeout().map_err(|e| anyhow::anyhow!("pipeline.request_timeout: {e}"))?;
        self.pipeline.release_backoff().map_err(|e| anyhow::anyhow!("pipeline.release_backoff: {e}"))?;
        self.pipeline
            .release_sweep_interval()
            .map_err(|e| anyhow::anyhow!("pipeline.release_sweep_interval: {e}"))?;
        if self.pipeline.release_attempts == 0 {
            anyhow::bail!("pipeline.release_attempts must be at least 1");
        }
        self.reconciler.poll_interval().map_err(|e| anyhow::anyhow!("reconciler.poll_interval: {e}"))?;
        self.reconciler.abandon_after().map_err(|e| anyhow::anyhow!("reconciler.abandon_after: {e}"))?;
        self.reconciler
            .settled_retention()
            .map_err(|e| anyhow::anyhow!("reconciler.settled_retention: {e}"))?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if let Some(ref secret) = self.server.admin_secret
            && secret.expose_secret().trim().is_empty()
        {
            anyhow::bail!("server.admin_secret must not be empty when set");
        }

        Ok(())
    }
}

/// Tags appear in admin URL paths, so keep them to a URL-safe alphabet
fn is_valid_tag(tag: &str) -> bool {
    use std::sync::OnceLock;

    use regex::Regex;

    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("must be valid regex"))
        .is_match(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[channels.list]]
        id = 1
        base_url = "https://api.example.com/v1"
        groups = ["default"]
        models = ["gpt-4o-mini"]
    "#;

    #[test]
    fn minimal_config_loads() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.channels.list.len(), 1);
        assert!(!config.billing.enabled);
        assert!(config.server.health.enabled);
        assert_eq!(config.pipeline.chunk_timeout().unwrap().as_secs(), 60);
        assert!(config.telemetry.is_none());
    }

    #[test]
    fn load_reads_file_and_expands_env() {
        let path = std::env::temp_dir().join(format!("relay-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            [server]
            admin_secret = "{{ env.RELAY_TEST_LOADER_SECRET }}"

            [[channels.list]]
            id = 1
            base_url = "https://api.example.com/v1"
            credential = "{{ env.RELAY_TEST_LOADER_KEY | default("sk-default") }}"
            groups = ["default"]
            models = ["m"]
            "#,
        )
        .unwrap();

        temp_env::with_vars(
            [
                ("RELAY_TEST_LOADER_SECRET", Some("hunter2")),
                ("RELAY_TEST_LOADER_KEY", None),
            ],
            || {
                let config = Config::load(&path).unwrap();
                let secret = config.server.admin_secret.as_ref().unwrap();
                assert_eq!(secret.expose_secret(), "hunter2");

                let credential = config.channels.list[0].credential.as_ref().unwrap();
                assert_eq!(credential.expose_secret(), "sk-default");
            },
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn duplicate_channel_ids_rejected() {
        let toml = format!("{MINIMAL}{MINIMAL}");
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("duplicate channel id 1"));
    }

    #[test]
    fn channel_without_models_rejected() {
        let toml = r#"
            [[channels.list]]
            id = 1
            base_url = "https://api.example.com/v1"
            groups = ["default"]
            models = []
        "#;

        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("at least one model"));
    }

    #[test]
    fn invalid_tag_rejected() {
        let toml = r#"
            [[channels.list]]
            id = 1
            base_url = "https://api.example.com/v1"
            groups = ["default"]
            models = ["m"]
            tag = "has space"
        "#;

        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("invalid tag"));
    }

    #[test]
    fn negative_pricing_rejected() {
        let toml = r#"
            [billing.pricing]
            completion_ratio = -1.0
        "#;

        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("must not be negative"));
    }

    #[test]
    fn invalid_duration_rejected() {
        let toml = r#"
            [reconciler]
            poll_interval = "soon"
        "#;

        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("reconciler.poll_interval"));
    }

    #[test]
    fn zero_release_attempts_rejected() {
        let toml = r#"
            [pipeline]
            release_attempts = 0
        "#;

        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("pipeline.release_attempts"));
    }

    #[test]
    fn empty_admin_secret_rejected() {
        let toml = r#"
            [server]
            admin_secret = "  "
        "#;

        let err = Config::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("admin_secret"));
    }

    #[test]
    fn unknown_top_level_section_rejected() {
        let err = Config::from_toml("[mcp]\nenabled = true\n").unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn full_example_parses() {
        let toml = r#"
            [server]
            listen_address = "127.0.0.1:4000"
            admin_secret = "secret"

            [server.health]
            path = "/healthz"

            [channels]
            weight_bias = 5
            max_retries = 2

            [channels.circuit_breaker]
            error_threshold = 3
            auto_disable = true

            [[channels.list]]
            id = 1
            base_url = "https://a.example.com/v1"
            priority = 10
            weight = 5
            groups = ["default"]
            models = ["gpt-4o-mini"]
            tag = "deployment-a"

            [billing]
            enabled = true
            estimated_completion_tokens = 128

            [[billing.tenants]]
            id = "tenant-a"
            balance = 100000

            [pipeline]
            chunk_timeout = "5s"
            release_attempts = 5
            release_backoff = "20ms"

            [reconciler]
            enabled = true
            poll_interval = "1s"
            abandon_after = "10m"
            settled_retention = "2h"

            [telemetry]
            service_name = "relay-test"

            [telemetry.exporter]
            endpoint = "http://localhost:4317"
            protocol = "http_proto"
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.listen_address.unwrap().port(), 4000);
        assert_eq!(config.server.health.path, "/healthz");
        assert_eq!(config.channels.weight_bias, 5);
        assert!(config.channels.circuit_breaker.auto_disable);
        assert_eq!(config.billing.tenants.len(), 1);
        assert_eq!(config.reconciler.abandon_after().unwrap().as_secs(), 600);
        assert_eq!(config.reconciler.settled_retention().unwrap().as_secs(), 7200);
        assert_eq!(config.pipeline.release_attempts, 5);
        assert_eq!(config.pipeline.release_backoff().unwrap().as_millis(), 20);

        let telemetry = config.telemetry.unwrap();
        assert_eq!(telemetry.service_name, "relay-test");
        assert_eq!(
            telemetry.exporter.unwrap().protocol,
            crate::telemetry::exporters::ExportProtocol::HttpProto
        );
    }
}
