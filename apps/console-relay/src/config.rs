use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::cli::ServeArgs;
use crate::relay::RelayConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub path_prefix: String,
    pub relay: RelayConfig,
    pub viewer_url: Option<String>,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5175)),
            path_prefix: "/ws-logger".to_string(),
            relay: RelayConfig::default(),
            viewer_url: None,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;

        let path_prefix = args.path_prefix.trim_end_matches('/').to_string();
        if !path_prefix.starts_with('/') || path_prefix.len() < 2 {
            bail!("path prefix must be a non-root absolute path, got {:?}", args.path_prefix);
        }
        if args.buffer_size == 0 {
            bail!("buffer size must be greater than zero");
        }

        Ok(ServerConfig {
            listen_addr,
            path_prefix,
            relay: RelayConfig {
                buffer_capacity: args.buffer_size,
                result_delivery: args.result_delivery,
                ..RelayConfig::default()
            },
            viewer_url: args.viewer_url.filter(|url| !url.trim().is_empty()),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::relay::ResultDelivery;
    use clap::Parser;

    fn serve_args(argv: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Some(Commands::Serve(args)) => args,
            None => cli.serve,
            Some(other) => panic!("unexpected command {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn defaults_match_the_builtin_config() {
        let config = ServerConfig::try_from(serve_args(&["console-relay"])).unwrap();
        let builtin = ServerConfig::default();
        assert_eq!(config.listen_addr, builtin.listen_addr);
        assert_eq!(config.path_prefix, builtin.path_prefix);
        assert_eq!(config.relay.buffer_capacity, relay_proto::MAX_BUFFER_SIZE);
        assert_eq!(config.relay.result_delivery, ResultDelivery::Broadcast);
        assert!(config.viewer_url.is_none());
    }

    #[test_timeout::timeout]
    fn explicit_flags_are_applied() {
        let config = ServerConfig::try_from(serve_args(&[
            "console-relay",
            "serve",
            "--listen-addr",
            "0.0.0.0:9000",
            "--path-prefix",
            "/logs/",
            "--buffer-size",
            "50",
            "--result-delivery",
            "requester",
            "--viewer-url",
            "https://viewer.example",
        ]))
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.path_prefix, "/logs");
        assert_eq!(config.relay.buffer_capacity, 50);
        assert_eq!(config.relay.result_delivery, ResultDelivery::Requester);
        assert_eq!(config.viewer_url.as_deref(), Some("https://viewer.example"));
    }

    #[test_timeout::timeout]
    fn bad_values_are_rejected() {
        for argv in [
            &["console-relay", "serve", "--listen-addr", "nowhere"][..],
            &["console-relay", "serve", "--buffer-size", "0"][..],
            &["console-relay", "serve", "--path-prefix", "/"][..],
            &["console-relay", "serve", "--path-prefix", "ws"][..],
        ] {
            assert!(ServerConfig::try_from(serve_args(argv)).is_err(), "{argv:?}");
        }
    }
}
