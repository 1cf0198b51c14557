use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// gRPC listen address; the RPC service is off when unset.
    #[serde(default)]
    pub grpc_addr: Option<String>,
    /// Storage DSN: `memory://`, `sqlite://<path>` or empty for in-memory.
    #[serde(default)]
    pub database_dsn: String,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Shared HMAC key; request bodies must be signed and responses are
    /// signed when set.
    #[serde(default)]
    pub signing_key: Option<String>,
    /// PEM file with the RSA private key used to decrypt request bodies.
    #[serde(default)]
    pub private_key_path: Option<String>,
    /// CIDR allow-list for agent addresses; empty means everyone.
    #[serde(default)]
    pub trusted_subnets: Vec<String>,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshot file; persistence is disabled when unset.
    #[serde(default)]
    pub path: Option<String>,
    /// Seconds between flushes; 0 flushes after every write.
    #[serde(default = "default_snapshot_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_restore")]
    pub restore: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval_secs: default_snapshot_interval(),
            restore: default_restore(),
        }
    }
}

impl SnapshotConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_snapshot_interval() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    5
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
