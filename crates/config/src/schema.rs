//! Config schema for the relay service.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

use crate::error::{Error, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub telegram: TelegramConfig,
    pub forward: ForwardConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
}

/// Telegram bot connection settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub token: Secret<String>,

    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,

    /// Post a startup notice to this user id, if set.
    pub admin_user_id: Option<i64>,
}

impl TelegramConfig {
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("admin_user_id", &self.admin_user_id)
            .finish()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            poll_timeout_secs: 30,
            admin_user_id: None,
        }
    }
}

/// Forwarding pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Debounce window before a media group elects its leader.
    pub aggregation_delay_ms: u64,

    /// Lifetime of a pending media group. Must exceed `aggregation_delay_ms`.
    pub group_ttl_ms: u64,

    /// Maximum number of pending media groups kept in memory.
    pub group_capacity: usize,

    /// Timeout of a single link reachability probe.
    pub probe_timeout_ms: u64,

    /// Timeout of a single webhook delivery.
    pub delivery_timeout_ms: u64,

    /// User-Agent sent with probes and webhook deliveries.
    pub user_agent: String,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            aggregation_delay_ms: 5_000,
            group_ttl_ms: 10_000,
            group_capacity: 1_000,
            probe_timeout_ms: 3_000,
            delivery_timeout_ms: 15_000,
            user_agent: concat!("postrelay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ForwardConfig {
    #[must_use]
    pub fn aggregation_delay(&self) -> Duration {
        Duration::from_millis(self.aggregation_delay_ms)
    }

    #[must_use]
    pub fn group_ttl(&self) -> Duration {
        Duration::from_millis(self.group_ttl_ms)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Check cross-field rules. A group must outlive its debounce window,
    /// otherwise buffered posts vanish before the leader reads them.
    pub fn validate(&self) -> Result<()> {
        if self.group_ttl_ms <= self.aggregation_delay_ms {
            return Err(Error::invalid(
                "forward.group_ttl_ms",
                format!(
                    "must be greater than forward.aggregation_delay_ms ({} <= {})",
                    self.group_ttl_ms, self.aggregation_delay_ms
                ),
            ));
        }
        if self.group_capacity == 0 {
            return Err(Error::invalid(
                "forward.group_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:postrelay.db?mode=rwc".into(),
        }
    }
}

/// Metrics export settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Labels attached to every exported metric.
    pub labels: HashMap<String, String>,
    /// Address for the Prometheus scrape endpoint, e.g. `127.0.0.1:9464`.
    pub listen: Option<SocketAddr>,
}
