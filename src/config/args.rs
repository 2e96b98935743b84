//! Command-line arguments.
//!
//! Every flag also reads a `CATALOG_PROXY_*` environment variable. Flags
//! that are not given leave the file (or default) value in place.

use std::path::PathBuf;

use clap::Parser;

use crate::config::schema::{ProxyConfig, Scheme};

#[derive(Debug, Default, Parser)]
#[command(name = "catalog-proxy")]
#[command(about = "Reverse proxy routing to services registered in Consul", long_about = None)]
#[command(version)]
pub struct Args {
    /// Optional TOML configuration file.
    #[arg(short, long, env = "CATALOG_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Deployment label (DEBUG, DEV, STG, PROD).
    #[arg(long, env = "CATALOG_PROXY_ENVIRONMENT")]
    pub environment: Option<String>,

    #[arg(long, env = "CATALOG_PROXY_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(short, long, env = "CATALOG_PROXY_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "CATALOG_PROXY_SERVICE_NAME")]
    pub service_name: Option<String>,

    #[arg(long, env = "CATALOG_PROXY_CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    #[arg(long, value_enum, env = "CATALOG_PROXY_SCHEME")]
    pub scheme: Option<Scheme>,

    /// Route by `<service>.<domain>` Host header instead of path.
    #[arg(long, env = "CATALOG_PROXY_DOMAIN")]
    pub domain: Option<String>,

    #[arg(long, env = "CATALOG_PROXY_MAX_IDLE_CONNS_PER_HOST")]
    pub max_idle_conns_per_host: Option<usize>,

    #[arg(long, env = "CATALOG_PROXY_DISABLE_KEEP_ALIVES")]
    pub disable_keep_alives: Option<bool>,

    /// Run leader election.
    #[arg(long, env = "CATALOG_PROXY_ELECTION")]
    pub election: Option<bool>,

    /// Prefix of the election lock key; the cluster name is appended.
    #[arg(long, env = "CATALOG_PROXY_ELECTION_KEY_PREFIX")]
    pub election_key_prefix: Option<String>,

    #[arg(long, env = "CATALOG_PROXY_CONSUL_ADDRESS")]
    pub consul_address: Option<String>,

    #[arg(long, env = "CATALOG_PROXY_CONSUL_TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    #[arg(long, env = "CATALOG_PROXY_CONSUL_DATACENTER")]
    pub consul_datacenter: Option<String>,
}

impl Args {
    /// Overlay the given flags onto `config`.
    pub fn apply(&self, config: &mut ProxyConfig) {
        if let Some(environment) = &self.environment {
            config.environment = environment.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = &self.service_name {
            config.service_name = name.clone();
        }
        if let Some(name) = &self.cluster_name {
            config.cluster_name = name.clone();
        }
        if let Some(scheme) = self.scheme {
            config.routing.scheme = scheme;
        }
        if let Some(domain) = &self.domain {
            config.routing.domain = Some(domain.clone());
        }
        if let Some(max) = self.max_idle_conns_per_host {
            config.routing.max_idle_conns_per_host = max;
        }
        if let Some(disable) = self.disable_keep_alives {
            config.routing.disable_keep_alives = disable;
        }
        if let Some(enabled) = self.election {
            config.election.enabled = enabled;
        }
        if let Some(prefix) = &self.election_key_prefix {
            config.election.key_prefix = prefix.clone();
        }
        if let Some(address) = &self.consul_address {
            config.catalog.address = address.clone();
        }
        if let Some(token) = &self.consul_token {
            config.catalog.token = Some(token.clone());
        }
        if let Some(dc) = &self.consul_datacenter {
            config.catalog.datacenter = Some(dc.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "catalog-proxy",
            "--port",
            "9100",
            "--scheme",
            "https",
            "--domain",
            "svc.local",
            "--disable-keep-alives",
            "false",
            "--election",
            "true",
            "--election-key-prefix",
            "service/proxy/leader/",
            "--cluster-name",
            "blue",
        ])
        .unwrap();

        let mut config = ProxyConfig::default();
        args.apply(&mut config);
        assert_eq!(config.port, 9100);
        assert_eq!(config.routing.scheme, Scheme::Https);
        assert_eq!(config.routing.domain.as_deref(), Some("svc.local"));
        assert!(!config.routing.disable_keep_alives);
        assert!(config.election.enabled);
        assert_eq!(config.election.key_prefix, "service/proxy/leader/");
        assert_eq!(config.lock_key(), "service/proxy/leader/blue");
    }

    #[test]
    fn test_absent_flags_leave_config_alone() {
        let mut config = ProxyConfig::default();
        config.cluster_name = "blue".to_string();
        Args::default().apply(&mut config);
        assert_eq!(config.cluster_name, "blue");
        assert_eq!(config.port, 8000);
    }
}
