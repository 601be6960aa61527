use serde::Deserialize;
use std::path::{Path, PathBuf};

use gate_policy::ServiceDefinition;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Address the gateway listens on.
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    /// Shared secret the agent presents on every request.
    pub agent_key: String,
    /// The bootstrap service table.
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    /// Out-of-band channel; without it every require_approval request is
    /// denied at the deadline.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Inbound body cap, enforced before anything is forwarded.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    /// Hostnames upstreams may resolve to; empty allows all.
    #[serde(default)]
    pub allowed_upstream_hosts: Vec<String>,
    #[serde(default = "default_true")]
    pub block_private_ips: bool,
    /// Advisory DNS lookup of each configured upstream at startup.
    #[serde(default)]
    pub dns_check: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_upstream_hosts: Vec::new(),
            block_private_ips: default_true(),
            dns_check: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApprovalConfig {
    /// How long a request waits for the human before failing closed.
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat the approval prompts are pushed into.
    pub chat_id: i64,
    #[serde(default)]
    pub pairing: PairingConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct PairingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AdminConfig {
    /// Exact IPv4 addresses or CIDR blocks; empty admits loopback only.
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
    /// Shared PIN presented by the admin plane. Empty disables the surface.
    #[serde(default)]
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_true")]
    pub capture_payloads: bool,
    #[serde(default = "default_payload_cap")]
    pub max_payload_log_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            capture_payloads: default_true(),
            max_payload_log_size: default_payload_cap(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_true() -> bool {
    true
}

fn default_approval_timeout() -> u64 {
    120
}

fn default_db_path() -> PathBuf {
    PathBuf::from("clawguard.db")
}

fn default_payload_cap() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file. The gateway cannot run without an
/// agent key and a service table, so a missing file is an error rather than
/// a fall-through to defaults.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    if config.agent_key.is_empty() {
        anyhow::bail!("agent_key must not be empty");
    }
    Ok(config)
}
