use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Runtime settings, read from flags first and environment second.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Networked lock coordinator. In-memory leases are used when absent.
    #[arg(long, env = "REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Lease lifetime for guarded operations, in seconds.
    #[arg(long, env = "LOCK_TTL_SECS", default_value_t = 10, global = true)]
    pub lock_ttl_secs: u64,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Secret used to sign and verify gateway notifications.
    #[arg(
        long,
        env = "GATEWAY_SERVER_KEY",
        default_value = "",
        hide_env_values = true,
        global = true
    )]
    pub gateway_server_key: String,

    /// Payment methods the gateway may offer, comma separated.
    #[arg(long, env = "GATEWAY_ENABLED_PAYMENTS", value_delimiter = ',', global = true)]
    pub enabled_payments: Vec<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Config {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            ttl: Duration::from_secs(self.lock_ttl_secs.max(1)),
        }
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            server_key: self.gateway_server_key.clone(),
            enabled_payments: self
                .enabled_payments
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub ttl: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewaySettings {
    pub server_key: String,
    /// Allow-list for enabled payment methods. Empty means no restriction.
    pub enabled_payments: Vec<String>,
}
