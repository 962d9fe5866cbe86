//! Core rollover engine
//!
//! The RollerEngine is responsible for:
//! - Ticking on a fixed poll interval
//! - Deciding which zones are due and driving their rollover phase
//! - Backing off failed zones without stalling the others
//! - Persisting state after changed ticks and on shutdown
//! - Reacting to reconfiguration (SIGHUP) and shutdown (SIGTERM/SIGINT)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     tick      ┌──────────────┐
//! │ poll interval│──────────────▶│ RollerEngine │◀── SIGHUP / SIGTERM
//! └──────────────┘               └──────────────┘
//!                                        │
//!            ┌───────────────────────────┼───────────────────────────┐
//!            │                           │                           │
//!            ▼                           ▼                           ▼
//!    ┌──────────────┐           ┌───────────────┐           ┌─────────────┐
//!    │  StateStore  │           │ ManagementApi │           │   Events    │
//!    │ (load/save)  │           │ (cryptokeys)  │           │  (notify)   │
//!    └──────────────┘           └───────────────┘           └─────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! 1. Read the active configuration (swapped atomically on reload)
//! 2. For each configured zone, look up or lazily create its status
//! 3. Hand due zones to the action handler, one at a time
//! 4. On success, advance the phase and schedule the next check;
//!    on failure, record the error and back off that zone only
//! 5. Persist the state snapshot if anything changed

use crate::config::RollerConfig;
use crate::error::{Error, Result};
use crate::status::{RollPhase, RollerState, ZoneStatus};
use crate::traits::{ManagementApi, NewKeyRequest, StateStore};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capacity of the engine event channel; events beyond this are dropped
/// with a warning rather than growing memory without bound.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Events emitted by the RollerEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        zones_count: usize,
    },

    /// A zone moved to the next rollover phase
    PhaseAdvanced {
        zone: String,
        from: RollPhase,
        to: RollPhase,
    },

    /// A due zone was checked but stays in its phase awaiting an
    /// external precondition (e.g. the server has not published the
    /// submitted key yet)
    PhaseHeld {
        zone: String,
        phase: RollPhase,
    },

    /// A cryptokey was created on the server
    KeyCreated {
        zone: String,
        key_id: u32,
        active: bool,
    },

    /// Action handling failed for a zone; it was backed off
    ActionFailed {
        zone: String,
        error: String,
    },

    /// Configuration was reloaded
    ConfigReloaded {
        zones_count: usize,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Outcome of one handler step for a due zone
struct StepOutcome {
    phase: RollPhase,
    next_action: DateTime<Utc>,
    pending_key: Option<u32>,
    retired_key: Option<u32>,
}

/// Core rollover engine
///
/// ## Lifecycle
///
/// 1. Create with [`RollerEngine::new()`], which loads persisted state
///    and fails if the state file exists but is corrupt
/// 2. Start with [`RollerEngine::run()`]
/// 3. Engine runs until a shutdown signal, then persists state and returns
///
/// ## Threading
///
/// All zone processing happens sequentially on one async task; no two
/// action handlers ever run concurrently, so per-zone locking is
/// unnecessary.
pub struct RollerEngine {
    /// Key-management API client
    api: Box<dyn ManagementApi>,

    /// Durable state persistence
    store: Box<dyn StateStore>,

    /// Active configuration, replaced wholesale on reload
    config: RollerConfig,

    /// Where to re-read configuration from on SIGHUP
    config_path: Option<PathBuf>,

    /// The in-memory status table, mutated only by the loop
    state: RollerState,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl RollerEngine {
    /// Create a new engine and load persisted state.
    ///
    /// # Parameters
    ///
    /// - `api`: key-management API implementation
    /// - `store`: state store implementation
    /// - `config`: validated configuration
    /// - `config_path`: file to re-read on reload; `None` disables reload
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver), or an error if the
    /// configuration is invalid or the persisted state is corrupt.
    pub async fn new(
        api: Box<dyn ManagementApi>,
        store: Box<dyn StateStore>,
        config: RollerConfig,
        config_path: Option<PathBuf>,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        // Corrupt state is fatal here: guessing could duplicate or skip
        // key actions that already happened.
        let state = store.load().await?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let engine = Self {
            api,
            store,
            config,
            config_path,
            state,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// The current status table (primarily for tests and inspection)
    pub fn state(&self) -> &RollerState {
        &self.state
    }

    /// The active configuration
    pub fn config(&self) -> &RollerConfig {
        &self.config
    }

    /// Run the engine until a shutdown signal is received.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: clean shutdown, state persisted
    /// - `Err(Error)`: fatal error (state could not be persisted on exit)
    pub async fn run(&mut self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Internal run implementation that accepts an optional shutdown signal
    ///
    /// # Parameters
    ///
    /// - `shutdown_rx`: Optional oneshot receiver to trigger shutdown (for testing)
    async fn run_internal(
        &mut self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            zones_count: self.config.domains.len(),
        });
        info!(
            "Engine started: {} zone(s), polling every {}s",
            self.config.domains.len(),
            self.config.poll_interval_secs
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately, which is what we
        // want: never-scheduled zones become due on startup.

        if let Some(mut rx) = shutdown_rx {
            // Test mode: wait for provided shutdown signal
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick().await;
                    }

                    _ = &mut rx => {
                        info!("Shutdown signal received");
                        self.emit_event(EngineEvent::Stopped {
                            reason: "Shutdown signal".to_string(),
                        });
                        break;
                    }
                }
            }
        } else {
            self.run_with_signals(&mut interval).await?;
        }

        // Persist state before exiting; schedule updates from the final
        // tick must not be lost.
        self.store.save(&self.state).await?;
        info!("State persisted, engine stopped");

        Ok(())
    }

    /// Production loop: tick on the interval, react to process signals.
    ///
    /// Signal streams are consumed by this loop itself; nothing happens
    /// inside an interrupt context.
    #[cfg(unix)]
    async fn run_with_signals(&mut self, interval: &mut tokio::time::Interval) -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::Other(format!("Failed to setup SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::Other(format!("Failed to setup SIGINT handler: {}", e)))?;
        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| Error::Other(format!("Failed to setup SIGHUP handler: {}", e)))?;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }

                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    self.emit_event(EngineEvent::Stopped {
                        reason: "SIGTERM".to_string(),
                    });
                    break;
                }

                _ = sigint.recv() => {
                    info!("SIGINT received, shutting down");
                    self.emit_event(EngineEvent::Stopped {
                        reason: "SIGINT".to_string(),
                    });
                    break;
                }

                _ = sighup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    let previous = self.config.poll_interval();
                    self.reload_config();
                    if self.config.poll_interval() != previous {
                        // A new cadence starts with an immediate tick
                        *interval = tokio::time::interval(self.config.poll_interval());
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    }
                }
            }
        }

        Ok(())
    }

    /// Fallback for non-Unix platforms: ctrl-c only, no reload signal.
    #[cfg(not(unix))]
    async fn run_with_signals(&mut self, interval: &mut tokio::time::Interval) -> Result<()> {
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    self.emit_event(EngineEvent::Stopped {
                        reason: "ctrl-c".to_string(),
                    });
                    break;
                }
            }
        }

        Ok(())
    }

    /// One poll tick: process due zones, persist if anything changed.
    async fn tick(&mut self) {
        let now = Utc::now();
        let changed = self.poll_once(now).await;

        if changed > 0 {
            // Persist failures are transient: keep running, the next
            // changed tick retries the write.
            if let Err(e) = self.store.save(&self.state).await {
                error!("Failed to persist state: {}", e);
            }
        }
    }

    /// Process every configured zone once, at instant `now`.
    ///
    /// Zones never seen before are created due immediately. Zones whose
    /// `next_action` is in the future are left untouched. Everything the
    /// tick needs is read from its inputs; the only side effects are the
    /// API calls of the action handler, so this is directly testable
    /// without the surrounding loop.
    ///
    /// Returns the number of zones whose status changed.
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> usize {
        // Snapshot the configuration: a reload between ticks swaps the
        // whole object, never a half-updated one.
        let config = self.config.clone();
        let mut changed = 0;

        for zone in &config.domains {
            let status = self.state.get_or_create(zone, now).clone();
            if !status.is_due(now) {
                debug!("Zone {} not due until {}", zone, status.next_action);
                continue;
            }

            debug!("Zone {} due (phase: {})", zone, status.phase);
            match self.advance_zone(zone, &status, now, &config).await {
                Ok(outcome) => {
                    if outcome.phase == status.phase {
                        self.emit_event(EngineEvent::PhaseHeld {
                            zone: zone.clone(),
                            phase: outcome.phase,
                        });
                    } else {
                        info!(
                            "Zone {}: phase {} -> {}",
                            zone, status.phase, outcome.phase
                        );
                        self.emit_event(EngineEvent::PhaseAdvanced {
                            zone: zone.clone(),
                            from: status.phase,
                            to: outcome.phase,
                        });
                    }

                    let entry = self.state.get_or_create(zone, now);
                    entry.record_success(outcome.phase, outcome.next_action);
                    entry.pending_key = outcome.pending_key;
                    entry.retired_key = outcome.retired_key;
                }
                Err(e) => {
                    // One bad zone must not starve the others: record
                    // the failure, back off, move on.
                    warn!("Zone {} action failed: {}", zone, e);
                    self.emit_event(EngineEvent::ActionFailed {
                        zone: zone.clone(),
                        error: e.to_string(),
                    });

                    self.state.get_or_create(zone, now).record_failure(
                        e.to_string(),
                        now,
                        config.roll.retry_backoff(),
                        config.roll.max_retry_backoff(),
                    );
                }
            }
            changed += 1;
        }

        changed
    }

    /// Action handler: perform the API step for one due zone and decide
    /// its next phase and check time.
    ///
    /// The phase only ever stays or moves to its successor in the cycle;
    /// errors leave it untouched (the caller records them).
    async fn advance_zone(
        &self,
        zone: &str,
        status: &ZoneStatus,
        now: DateTime<Utc>,
        config: &RollerConfig,
    ) -> Result<StepOutcome> {
        let policy = &config.roll;

        match status.phase {
            RollPhase::Idle => {
                let keys = self.api.list_keys(zone).await?;
                let active_zsk = keys
                    .iter()
                    .find(|k| k.keytype == crate::traits::KeyKind::Zsk && k.active);

                match active_zsk {
                    None => {
                        // Unsigned zone: bootstrap with an active key,
                        // then rest until the first rotation is due.
                        let key = self
                            .api
                            .create_key(zone, &NewKeyRequest::active_zsk())
                            .await?;
                        info!("Zone {}: bootstrapped with active ZSK {}", zone, key.id);
                        self.emit_event(EngineEvent::KeyCreated {
                            zone: zone.to_string(),
                            key_id: key.id,
                            active: true,
                        });
                        Ok(StepOutcome {
                            phase: RollPhase::Idle,
                            next_action: now + policy.rotation_interval(),
                            pending_key: None,
                            retired_key: None,
                        })
                    }
                    Some(old) => {
                        // Pre-publish the successor key.
                        let key = self
                            .api
                            .create_key(zone, &NewKeyRequest::prepublished_zsk())
                            .await?;
                        info!(
                            "Zone {}: submitted ZSK {} to replace {}",
                            zone, key.id, old.id
                        );
                        self.emit_event(EngineEvent::KeyCreated {
                            zone: zone.to_string(),
                            key_id: key.id,
                            active: false,
                        });
                        Ok(StepOutcome {
                            phase: status.phase.next(),
                            next_action: now + policy.propagation_delay(),
                            pending_key: Some(key.id),
                            retired_key: Some(old.id),
                        })
                    }
                }
            }

            RollPhase::Submitted => {
                let pending_id = status.pending_key.ok_or_else(|| {
                    Error::Other(format!("zone {} submitted without a pending key", zone))
                })?;

                let keys = self.api.list_keys(zone).await?;
                match keys.iter().find(|k| k.id == pending_id) {
                    Some(key) if key.published => Ok(StepOutcome {
                        phase: status.phase.next(),
                        next_action: now + policy.dnskey_ttl(),
                        pending_key: status.pending_key,
                        retired_key: status.retired_key,
                    }),
                    Some(_) => {
                        // Key exists but is not in the DNSKEY RRset yet;
                        // hold and check again.
                        debug!("Zone {}: key {} not published yet", zone, pending_id);
                        Ok(StepOutcome {
                            phase: status.phase,
                            next_action: now + policy.propagation_delay(),
                            pending_key: status.pending_key,
                            retired_key: status.retired_key,
                        })
                    }
                    None => Err(Error::not_found(format!(
                        "zone {}: pending key {} disappeared from the server",
                        zone, pending_id
                    ))),
                }
            }

            RollPhase::AwaitingPropagation => {
                let pending_id = status.pending_key.ok_or_else(|| {
                    Error::Other(format!("zone {} rolling without a pending key", zone))
                })?;

                self.api.set_key_active(zone, pending_id, true).await?;
                if let Some(old_id) = status.retired_key {
                    self.api.set_key_active(zone, old_id, false).await?;
                }
                info!(
                    "Zone {}: activated key {}, deactivated {:?}",
                    zone, pending_id, status.retired_key
                );

                Ok(StepOutcome {
                    phase: status.phase.next(),
                    next_action: now + policy.dnskey_ttl(),
                    pending_key: status.pending_key,
                    retired_key: status.retired_key,
                })
            }

            RollPhase::Finalized => {
                if let Some(old_id) = status.retired_key {
                    self.api.delete_key(zone, old_id).await?;
                    info!("Zone {}: removed retired key {}", zone, old_id);
                }

                Ok(StepOutcome {
                    phase: status.phase.next(),
                    next_action: now + policy.rotation_interval(),
                    pending_key: None,
                    retired_key: None,
                })
            }
        }
    }

    /// Re-read configuration from the config file and swap it in.
    ///
    /// The swap happens between ticks, so `poll_once` never observes a
    /// partially updated configuration. A file that fails to load keeps
    /// the previous configuration; field-level problems inside a loadable
    /// file have already been repaired with warnings.
    pub fn reload_config(&mut self) {
        let Some(path) = self.config_path.clone() else {
            warn!("No config path set, reload ignored");
            return;
        };

        match RollerConfig::load_from_file(&path) {
            Ok(new_config) => {
                info!(
                    "Configuration reloaded: {} zone(s)",
                    new_config.domains.len()
                );
                self.emit_event(EngineEvent::ConfigReloaded {
                    zones_count: new_config.domains.len(),
                });
                self.config = new_config;
            }
            Err(e) => {
                warn!(
                    "Configuration reload failed, keeping previous configuration: {}",
                    e
                );
            }
        }
    }

    /// Drop statuses for zones no longer configured.
    ///
    /// Not part of the poll loop: removing a zone from configuration
    /// keeps its persisted status so a transient config error cannot
    /// destroy rollover history. This is the explicit maintenance
    /// operation that cleans up.
    pub async fn prune_orphans(&mut self) -> Result<Vec<String>> {
        let removed = self.state.prune_orphans(&self.config.domains);
        if !removed.is_empty() {
            for zone in &removed {
                info!("Pruned orphaned status for zone {}", zone);
            }
            self.store.save(&self.state).await?;
        }
        Ok(removed)
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            // Receiver is slow or gone; dropping the event is preferable
            // to blocking the loop or growing memory.
            warn!("Event channel full, dropping event");
        }
    }

    /// Test-only helper to run the engine with a controlled shutdown signal
    ///
    /// Production daemon code should use `run()` instead, which manages
    /// shutdown via OS signals (SIGTERM/SIGINT) and reload via SIGHUP.
    pub async fn run_with_shutdown(
        &mut self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_events_are_comparable() {
        let event = EngineEvent::PhaseAdvanced {
            zone: "example.com".to_string(),
            from: RollPhase::Idle,
            to: RollPhase::Submitted,
        };
        assert_eq!(event.clone(), event);
    }
}
