//! Configuration types for the key-rotation daemon
//!
//! Configuration lives in a TOML file and is reloaded at runtime on
//! SIGHUP. Loading is deliberately forgiving: a single bad field falls
//! back to its default (with a warning) instead of rejecting the whole
//! file, so an operator typo in one knob cannot take the daemon down.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollerConfig {
    /// Log verbosity (trace, debug, info, warn, error)
    pub log_level: String,

    /// Base URL of the PowerDNS server API
    pub api_url: String,

    /// Shared secret sent as the X-Api-Key header
    pub api_key: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Path of the persisted state file
    pub state_path: String,

    /// Seconds between poll ticks
    pub poll_interval_secs: u64,

    /// Zones whose keys this daemon manages
    pub domains: Vec<String>,

    /// Rollover timing policy
    pub roll: RollPolicy,
}

impl RollerConfig {
    /// Read and parse the configuration file.
    ///
    /// An unreadable or unparseable file is an error; the caller decides
    /// whether that is fatal (startup) or means keeping the previous
    /// configuration (reload). Field-level problems are repaired by
    /// [`RollerConfig::sanitize`] and never fail the load.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config: RollerConfig = toml::from_str(&content).map_err(|e| {
            crate::Error::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    /// Repair individual invalid fields, logging a warning for each.
    pub fn sanitize(&mut self) {
        let defaults = RollerConfig::default();

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                tracing::warn!("'{}' is not a valid log level, setting to warn", other);
                self.log_level = "warn".to_string();
            }
        }

        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            tracing::warn!(
                "timeout_secs {} out of range (1-300), using default {}",
                self.timeout_secs,
                defaults.timeout_secs
            );
            self.timeout_secs = defaults.timeout_secs;
        }

        if self.poll_interval_secs == 0 || self.poll_interval_secs > 3600 {
            tracing::warn!(
                "poll_interval_secs {} out of range (1-3600), using default {}",
                self.poll_interval_secs,
                defaults.poll_interval_secs
            );
            self.poll_interval_secs = defaults.poll_interval_secs;
        }

        // Drop malformed zone names instead of rejecting the whole reload
        self.domains.retain(|zone| match validate_zone_name(zone) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!("Ignoring configured zone '{}': {}", zone, reason);
                false
            }
        });

        self.roll.sanitize(&defaults.roll);
    }

    /// Check the requirements that have no sensible fallback.
    pub fn validate(&self) -> crate::Result<()> {
        if self.api_key.is_empty() {
            return Err(crate::Error::config("api_key must not be empty"));
        }
        if self.api_url.is_empty() {
            return Err(crate::Error::config("api_url must not be empty"));
        }
        if self.state_path.is_empty() {
            return Err(crate::Error::config("state_path must not be empty"));
        }
        Ok(())
    }

    /// Per-request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for RollerConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            api_url: "http://127.0.0.1:8084/api/v1/servers/localhost".to_string(),
            api_key: String::new(),
            timeout_secs: 2,
            state_path: "/var/lib/keyroller/state.json".to_string(),
            poll_interval_secs: 5,
            domains: Vec::new(),
            roll: RollPolicy::default(),
        }
    }
}

/// Rollover timing policy
///
/// Controls how long each phase of the rollover waits and how failures
/// back off. All values are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollPolicy {
    /// Wait after submitting a key before expecting the server to report it
    pub propagation_delay_secs: u64,

    /// DNSKEY TTL to wait out before activating the new key
    pub dnskey_ttl_secs: u64,

    /// Interval between completed rollovers for a zone
    pub rotation_interval_secs: u64,

    /// Base retry delay after a failed handler step
    pub retry_backoff_secs: u64,

    /// Ceiling for the exponential retry backoff
    pub max_retry_backoff_secs: u64,
}

impl RollPolicy {
    fn sanitize(&mut self, defaults: &RollPolicy) {
        if self.retry_backoff_secs == 0 {
            tracing::warn!(
                "retry_backoff_secs must be > 0, using default {}",
                defaults.retry_backoff_secs
            );
            self.retry_backoff_secs = defaults.retry_backoff_secs;
        }
        if self.max_retry_backoff_secs < self.retry_backoff_secs {
            tracing::warn!(
                "max_retry_backoff_secs {} below retry_backoff_secs {}, raising to match",
                self.max_retry_backoff_secs,
                self.retry_backoff_secs
            );
            self.max_retry_backoff_secs = self.retry_backoff_secs;
        }
        if self.rotation_interval_secs == 0 {
            tracing::warn!(
                "rotation_interval_secs must be > 0, using default {}",
                defaults.rotation_interval_secs
            );
            self.rotation_interval_secs = defaults.rotation_interval_secs;
        }
    }

    /// Wait between submission and the published check
    pub fn propagation_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.propagation_delay_secs as i64)
    }

    /// DNSKEY TTL wait before activation
    pub fn dnskey_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dnskey_ttl_secs as i64)
    }

    /// Rest between completed rollovers
    pub fn rotation_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rotation_interval_secs as i64)
    }

    /// Base retry delay
    pub fn retry_backoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_backoff_secs as i64)
    }

    /// Retry delay ceiling
    pub fn max_retry_backoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_retry_backoff_secs as i64)
    }
}

impl Default for RollPolicy {
    fn default() -> Self {
        Self {
            propagation_delay_secs: 300,
            dnskey_ttl_secs: 3600,
            rotation_interval_secs: 30 * 24 * 3600,
            retry_backoff_secs: 30,
            max_retry_backoff_secs: 3600,
        }
    }
}

/// Validate that a string is a usable DNS zone name.
///
/// This implements basic DNS domain name validation per RFC 1035.
/// It's not comprehensive but catches common errors.
pub fn validate_zone_name(zone: &str) -> Result<(), String> {
    if zone.is_empty() {
        return Err("zone name cannot be empty".to_string());
    }

    // Total length limit (RFC 1035: 253 chars max)
    if zone.len() > 253 {
        return Err(format!("zone name too long: {} chars (max 253)", zone.len()));
    }

    for label in zone.trim_end_matches('.').split('.') {
        if label.is_empty() {
            return Err("zone name has an empty label".to_string());
        }

        if label.len() > 63 {
            return Err(format!(
                "label '{}' too long: {} chars (max 63)",
                label,
                label.len()
            ));
        }

        if !label.chars().all(|c| c.is_alphanumeric() || c == '-') {
            return Err(format!(
                "label '{}' contains invalid characters (alphanumeric and hyphen only)",
                label
            ));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{}' cannot start or end with hyphen", label));
        }
    }

    Ok(())
}
