use serde::Deserialize;
use std::time::Duration;
use telemon_common::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Collector HTTP address, `host:port` or a full URL.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Collector gRPC endpoint; defaults to `server_addr` when unset.
    #[serde(default)]
    pub grpc_endpoint: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Number of delivery workers on the per-metric fallback path.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Try one batch request per tick before falling back to per-metric sends.
    #[serde(default = "default_batch")]
    pub batch: bool,
    /// Per-metric sends use `POST /update/{kind}/{name}/{value}` instead of JSON.
    #[serde(default)]
    pub path_style: bool,
    #[serde(default)]
    pub signing_key: Option<String>,
    /// PEM file with the collector's RSA public key; enables body encryption.
    #[serde(default)]
    pub public_key_path: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound for each delivery phase of one reporting tick.
    #[serde(default = "default_report_deadline")]
    pub report_deadline_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_delta_delay_ms")]
    pub delta_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            delta_delay_ms: default_delta_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            delta_delay: Duration::from_millis(self.delta_delay_ms),
        }
    }
}

fn default_server_addr() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

fn default_batch() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    5
}

fn default_report_deadline() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_delta_delay_ms() -> u64 {
    2000
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Base URL for HTTP delivery.
    pub fn http_base_url(&self) -> String {
        with_scheme(&self.server_addr)
    }

    /// Build the gRPC endpoint URI, falling back to `server_addr`.
    pub fn grpc_uri(&self) -> String {
        with_scheme(self.grpc_endpoint.as_deref().unwrap_or(&self.server_addr))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn report_deadline(&self) -> Duration {
        Duration::from_secs(self.report_deadline_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn with_scheme(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.contains("://") {
        return addr.to_string();
    }
    format!("http://{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.server_addr, "localhost:8080");
        assert_eq!(config.transport, TransportKind::Http);
        assert!(config.batch);
        assert!(!config.path_style);
        assert_eq!(config.rate_limit, 1);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn full_file_parses() {
        let config: AgentConfig = toml::from_str(
            r#"
            server_addr = "http://collector:9000/"
            grpc_endpoint = "collector:9090"
            transport = "grpc"
            poll_interval_secs = 1
            report_interval_secs = 4
            rate_limit = 8
            batch = false
            path_style = true
            signing_key = "secret"

            [retry]
            max_attempts = 5
            initial_delay_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.http_base_url(), "http://collector:9000");
        assert_eq!(config.grpc_uri(), "http://collector:9090");
        assert_eq!(config.transport, TransportKind::Grpc);
        assert_eq!(config.rate_limit, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delta_delay_ms, 2000);
    }
}
