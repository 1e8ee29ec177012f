//! Runtime configuration
//!
//! Every value can be overridden from the environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | STOCK_DB_PATH | ./stock-db | sled database directory |
//! | LOG_LEVEL | info | tracing level |
//! | OUTBOX_BATCH_SIZE | 20 | events claimed per pass |
//! | OUTBOX_IDLE_MS | 2000 | sleep after an empty pass |
//! | OUTBOX_BACKOFF_FLOOR_MS | 1000 | first retry delay |
//! | OUTBOX_BACKOFF_CAP_MS | 30000 | retry delay ceiling |
//! | OUTBOX_TX_TIMEOUT_MS | 5000 | bound on each storage transaction |
//! | OUTBOX_PUBLISH_TIMEOUT_MS | 2000 | bound on each broker publish |
//! | OUTBOX_LEASE_MS | 60000 | how long a claim stays exclusive, raised to cover a full pass |
//! | NATS_URL | unset | broker to publish to; unset runs an in-process broker |
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    pub nats_url: Option<String>,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub batch_size: usize,
    pub idle_interval: Duration,
    pub backoff_floor: Duration,
    pub backoff_cap: Duration,
    pub tx_timeout: Duration,
    pub publish_timeout: Duration,
    // must outlast a full pass, otherwise a slow pass loses its claims. see `min_lease`
    pub lease: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            idle_interval: Duration::from_secs(2),
            backoff_floor: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            tx_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(2),
            lease: Duration::from_secs(60),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// unset and blank both mean "not configured"
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(name, default.as_millis() as u64))
}

impl Config {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            db_path: env_or("STOCK_DB_PATH", "./stock-db".to_string()),
            log_level: env_or("LOG_LEVEL", "info".to_string()),
            nats_url: env_opt("NATS_URL"),
            relay: RelayConfig::from_env(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_or("OUTBOX_BATCH_SIZE", defaults.batch_size).max(1),
            idle_interval: env_millis("OUTBOX_IDLE_MS", defaults.idle_interval),
            backoff_floor: env_millis("OUTBOX_BACKOFF_FLOOR_MS", defaults.backoff_floor),
            backoff_cap: env_millis("OUTBOX_BACKOFF_CAP_MS", defaults.backoff_cap),
            tx_timeout: env_millis("OUTBOX_TX_TIMEOUT_MS", defaults.tx_timeout),
            publish_timeout: env_millis("OUTBOX_PUBLISH_TIMEOUT_MS", defaults.publish_timeout),
            lease: env_millis("OUTBOX_LEASE_MS", defaults.lease),
        }
        .with_covering_lease()
    }

    /// Longest a pass can take: every publish timing out plus the claim and the record.
    pub fn min_lease(&self) -> Duration {
        let batch = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        self.publish_timeout
            .saturating_mul(batch)
            .saturating_add(self.tx_timeout.saturating_mul(2))
    }

    /// Raise `lease` to [`Self::min_lease`] when it is shorter.
    pub fn with_covering_lease(mut self) -> Self {
        let min = self.min_lease();
        if self.lease < min {
            tracing::warn!(
                configured = ?self.lease,
                raised_to = ?min,
                "outbox lease shorter than a full pass, raising it"
            );
            self.lease = min;
        }
        self
    }
}
