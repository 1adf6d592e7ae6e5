use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::settlement::PayoutSplit;

/// Runtime configuration for the broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Length of one billing interval. Each completed interval is charged once.
    pub billing_interval: Duration,

    /// How long a session may stay below "both connected" before it is ended.
    pub disconnect_grace: Duration,

    /// Provider share of every settled amount.
    pub payout_split: PayoutSplit,

    /// MoQ relay the broker connects to.
    pub relay_url: String,

    /// Per-connection outbound buffer. Events beyond it are dropped.
    pub outbound_queue_depth: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            billing_interval: Duration::from_secs(60),
            disconnect_grace: Duration::from_secs(60),
            payout_split: PayoutSplit::default(),
            relay_url: "https://localhost:4443".to_string(),
            outbound_queue_depth: 256,
        }
    }
}

impl BrokerConfig {
    pub fn with_billing_interval(mut self, interval: Duration) -> Self {
        self.billing_interval = interval;
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn with_payout_split(mut self, split: PayoutSplit) -> Self {
        self.payout_split = split;
        self
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    pub fn with_outbound_queue_depth(mut self, depth: usize) -> Self {
        self.outbound_queue_depth = depth;
        self
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, "BILLING_INTERVAL_SECONDS")? {
            if secs == 0 {
                return Err(invalid("BILLING_INTERVAL_SECONDS", "0", "must be positive"));
            }
            config.billing_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "DISCONNECT_GRACE_SECONDS")? {
            config.disconnect_grace = Duration::from_secs(secs);
        }
        if let Some(fraction) = parse_var::<f64>(&lookup, "PROVIDER_PAYOUT_FRACTION")? {
            config.payout_split = PayoutSplit::from_fraction(fraction)?;
        }
        if let Some(url) = lookup("RELAY_URL") {
            config.relay_url = url;
        }
        if let Some(depth) = parse_var::<usize>(&lookup, "OUTBOUND_QUEUE_DEPTH")? {
            if depth == 0 {
                return Err(invalid("OUTBOUND_QUEUE_DEPTH", "0", "must be positive"));
            }
            config.outbound_queue_depth = depth;
        }

        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(name, &raw, &e.to_string())),
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
