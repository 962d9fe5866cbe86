//! Per-zone rollover status and the persisted runner state
//!
//! A [`ZoneStatus`] records where one zone is in its rollover cycle and
//! when it next needs attention. [`RollerState`] is the full snapshot the
//! daemon persists: a mapping from zone name to status.
//!
//! ## Phase cycle
//!
//! ```text
//! Idle -> Submitted -> AwaitingPropagation -> Finalized -> Idle (repeats)
//! ```
//!
//! There is no terminal phase while a zone stays configured; a finished
//! rollover parks the zone in `Idle` until the next rotation is due.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle stage of a zone's key rollover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollPhase {
    /// No rollover in flight
    Idle,
    /// New key submitted to the server, not yet confirmed published
    Submitted,
    /// New key published; waiting out the DNSKEY TTL before activation
    AwaitingPropagation,
    /// New key active, old key deactivated; waiting before removal
    Finalized,
}

impl RollPhase {
    /// The successor phase in the rollover cycle.
    ///
    /// Phases only ever advance through this cycle or stay in place;
    /// a zone never jumps phases.
    pub fn next(self) -> RollPhase {
        match self {
            RollPhase::Idle => RollPhase::Submitted,
            RollPhase::Submitted => RollPhase::AwaitingPropagation,
            RollPhase::AwaitingPropagation => RollPhase::Finalized,
            RollPhase::Finalized => RollPhase::Idle,
        }
    }
}

impl std::fmt::Display for RollPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RollPhase::Idle => "idle",
            RollPhase::Submitted => "submitted",
            RollPhase::AwaitingPropagation => "awaiting-propagation",
            RollPhase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Rollover status for a single zone
///
/// Timestamps are serialized as whole seconds since the epoch, so a
/// persisted status round-trips losslessly at second granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneStatus {
    /// When the zone is next due for attention
    #[serde(with = "chrono::serde::ts_seconds")]
    pub next_action: DateTime<Utc>,

    /// Current rollover phase
    pub phase: RollPhase,

    /// Last failure for this zone, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Cryptokey id of the key being introduced (set while a roll is in flight)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_key: Option<u32>,

    /// Cryptokey id of the key being phased out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_key: Option<u32>,

    /// Consecutive handler failures, drives retry backoff
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl ZoneStatus {
    /// Create a fresh status, due immediately.
    ///
    /// A zone seen for the first time gets `next_action = now` so the
    /// first poll tick picks it up.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            next_action: now,
            phase: RollPhase::Idle,
            last_error: None,
            pending_key: None,
            retired_key: None,
            consecutive_failures: 0,
        }
    }

    /// Whether the zone is due for processing
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_action
    }

    /// Record a successful handler step: clear the error state and
    /// schedule the next check.
    pub fn record_success(&mut self, phase: RollPhase, next_action: DateTime<Utc>) {
        self.phase = phase;
        self.next_action = next_action;
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    /// Record a handler failure: keep the phase, remember the error, and
    /// back off exponentially (capped at `max_backoff`).
    ///
    /// `next_action` strictly increases because the zone was due
    /// (`now >= next_action`) and the backoff is at least one second.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        base_backoff: Duration,
        max_backoff: Duration,
    ) {
        self.last_error = Some(error.into());
        let exponent = self.consecutive_failures.min(16);
        let delay = base_backoff
            .checked_mul(1 << exponent)
            .unwrap_or(max_backoff)
            .min(max_backoff)
            .max(Duration::seconds(1));
        self.next_action = now + delay;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

/// State file format version
/// Used for future migration if format changes
const STATE_FILE_VERSION: &str = "1.0";

/// The full persisted snapshot: zone name -> status
///
/// Created empty on first run, loaded at startup, mutated only by the
/// engine loop, and persisted after changed ticks and on shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollerState {
    version: String,
    zones: HashMap<String, ZoneStatus>,
}

impl RollerState {
    /// Create an empty state
    pub fn new() -> Self {
        Self {
            version: STATE_FILE_VERSION.to_string(),
            zones: HashMap::new(),
        }
    }

    /// Look up a zone's status
    pub fn get(&self, zone: &str) -> Option<&ZoneStatus> {
        self.zones.get(zone)
    }

    /// Look up a zone's status, creating a fresh one (due at `now`) if
    /// the zone has never been scheduled.
    pub fn get_or_create(&mut self, zone: &str, now: DateTime<Utc>) -> &mut ZoneStatus {
        self.zones
            .entry(zone.to_string())
            .or_insert_with(|| ZoneStatus::new(now))
    }

    /// Replace a zone's status
    pub fn insert(&mut self, zone: impl Into<String>, status: ZoneStatus) {
        self.zones.insert(zone.into(), status);
    }

    /// All tracked zone names
    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    /// Number of tracked zones
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether the state tracks no zones
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Whether the snapshot was written by the current format version
    pub fn is_current_version(&self) -> bool {
        self.version == STATE_FILE_VERSION
    }

    /// Drop statuses for zones not in `configured`, returning the names
    /// that were removed.
    ///
    /// Deliberately not called from the poll loop: a zone that briefly
    /// disappears from a broken config reload keeps its status. Orphan
    /// cleanup is an explicit maintenance operation.
    pub fn prune_orphans(&mut self, configured: &[String]) -> Vec<String> {
        let removed: Vec<String> = self
            .zones
            .keys()
            .filter(|zone| !configured.iter().any(|c| c == *zone))
            .cloned()
            .collect();
        for zone in &removed {
            self.zones.remove(zone);
        }
        removed
    }
}

impl Default for RollerState {
    fn default() -> Self {
        Self::new()
    }
}
