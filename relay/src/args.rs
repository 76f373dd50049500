use std::path::PathBuf;

use clap::Parser;

/// Relay LLM gateway
#[derive(Debug, Parser)]
#[command(name = "relay", about = "Multi-provider LLM gateway with metered settlement")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml", env = "RELAY_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "RELAY_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,

    /// Default log filter when `RUST_LOG` is unset
    #[arg(long, default_value = "info", env = "RELAY_LOG")]
    pub log: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["relay"]).unwrap();
        assert_eq!(args.config, PathBuf::from("relay.toml"));
        assert!(args.listen.is_none());
        assert_eq!(args.log, "info");
    }

    #[test]
    fn overrides() {
        let args = Args::try_parse_from(["relay", "-c", "/etc/relay.toml", "--listen", "127.0.0.1:8080"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/relay.toml"));
        assert_eq!(args.listen, Some("127.0.0.1:8080".parse().unwrap()));
    }
}
