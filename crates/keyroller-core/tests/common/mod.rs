//! Test doubles and common utilities for engine contract tests
//!
//! This module provides a scripted in-memory key server standing in for
//! the PowerDNS API, plus configuration helpers. The fake verifies
//! engine behavior (scheduling, backoff, phase order) without any
//! network I/O.

#![allow(dead_code)]

use async_trait::async_trait;
use keyroller_core::config::{RollPolicy, RollerConfig};
use keyroller_core::error::Result;
use keyroller_core::traits::{CryptoKey, KeyKind, ManagementApi, NewKeyRequest};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// A scripted stand-in for the PowerDNS cryptokey API
///
/// Cloning shares the underlying server, so tests keep a handle while
/// the engine owns its own clone.
#[derive(Clone, Default)]
pub struct FakeKeyServer {
    inner: Arc<FakeKeyServerInner>,
}

#[derive(Default)]
struct FakeKeyServerInner {
    /// zone -> keys
    keys: Mutex<HashMap<String, Vec<CryptoKey>>>,
    /// id sequence for created keys
    next_id: AtomicU32,
    /// zones whose requests all fail (simulated outage)
    failing_zones: Mutex<HashSet<String>>,
    /// when set, created keys report published=false until released
    hold_publication: Mutex<bool>,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    activate_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeKeyServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.inner.next_id.store(100, Ordering::SeqCst);
        server
    }

    /// Pre-seed a zone with an active published ZSK; returns its id
    pub fn seed_active_zsk(&self, zone: &str) -> u32 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .keys
            .lock()
            .unwrap()
            .entry(zone.to_string())
            .or_default()
            .push(CryptoKey {
                id,
                keytype: KeyKind::Zsk,
                active: true,
                published: true,
                dnskey: None,
                algorithm: Some("ECDSAP256SHA256".to_string()),
                bits: Some(256),
            });
        id
    }

    /// All requests for `zone` fail until cleared
    pub fn fail_zone(&self, zone: &str) {
        self.inner
            .failing_zones
            .lock()
            .unwrap()
            .insert(zone.to_string());
    }

    /// Clear a simulated outage
    pub fn restore_zone(&self, zone: &str) {
        self.inner.failing_zones.lock().unwrap().remove(zone);
    }

    /// Newly created keys report published=false until released
    pub fn hold_publication(&self) {
        *self.inner.hold_publication.lock().unwrap() = true;
    }

    /// Mark every held key as published
    pub fn release_publication(&self) {
        *self.inner.hold_publication.lock().unwrap() = false;
        for keys in self.inner.keys.lock().unwrap().values_mut() {
            for key in keys.iter_mut() {
                key.published = true;
            }
        }
    }

    pub fn keys_for(&self, zone: &str) -> Vec<CryptoKey> {
        self.inner
            .keys
            .lock()
            .unwrap()
            .get(zone)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    pub fn activate_calls(&self) -> usize {
        self.inner.activate_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.inner.delete_calls.load(Ordering::SeqCst)
    }

    /// Total API calls across all methods
    pub fn total_calls(&self) -> usize {
        self.list_calls() + self.create_calls() + self.activate_calls() + self.delete_calls()
    }

    fn check_zone(&self, zone: &str) -> Result<()> {
        if self.inner.failing_zones.lock().unwrap().contains(zone) {
            Err(keyroller_core::Error::timeout(format!(
                "simulated outage for zone {}",
                zone
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ManagementApi for FakeKeyServer {
    async fn list_keys(&self, zone: &str) -> Result<Vec<CryptoKey>> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_zone(zone)?;
        Ok(self.keys_for(zone))
    }

    async fn create_key(&self, zone: &str, request: &NewKeyRequest) -> Result<CryptoKey> {
        self.inner.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_zone(zone)?;

        let held = *self.inner.hold_publication.lock().unwrap();
        let key = CryptoKey {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            keytype: request.keytype,
            active: request.active,
            published: request.published && !held,
            dnskey: None,
            algorithm: Some("ECDSAP256SHA256".to_string()),
            bits: Some(256),
        };
        self.inner
            .keys
            .lock()
            .unwrap()
            .entry(zone.to_string())
            .or_default()
            .push(key.clone());
        Ok(key)
    }

    async fn set_key_active(&self, zone: &str, key_id: u32, active: bool) -> Result<()> {
        self.inner.activate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_zone(zone)?;

        let mut keys = self.inner.keys.lock().unwrap();
        let key = keys
            .get_mut(zone)
            .and_then(|list| list.iter_mut().find(|k| k.id == key_id))
            .ok_or_else(|| {
                keyroller_core::Error::not_found(format!("key {} in zone {}", key_id, zone))
            })?;
        key.active = active;
        Ok(())
    }

    async fn delete_key(&self, zone: &str, key_id: u32) -> Result<()> {
        self.inner.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_zone(zone)?;

        let mut keys = self.inner.keys.lock().unwrap();
        let list = keys.get_mut(zone).ok_or_else(|| {
            keyroller_core::Error::not_found(format!("zone {} has no keys", zone))
        })?;
        let before = list.len();
        list.retain(|k| k.id != key_id);
        if list.len() == before {
            return Err(keyroller_core::Error::not_found(format!(
                "key {} in zone {}",
                key_id, zone
            )));
        }
        Ok(())
    }

    fn api_name(&self) -> &'static str {
        "fake"
    }
}

/// A minimal valid configuration for engine tests.
///
/// Short phase delays keep scenario tests readable: propagation 300s,
/// TTL wait 600s, rotation 86400s, retry backoff 30s capped at 240s.
pub fn test_config(zones: &[&str]) -> RollerConfig {
    RollerConfig {
        log_level: "debug".to_string(),
        api_url: "http://127.0.0.1:8084/api/v1/servers/localhost".to_string(),
        api_key: "secret".to_string(),
        timeout_secs: 2,
        state_path: "/tmp/keyroller-test-state.json".to_string(),
        poll_interval_secs: 1,
        domains: zones.iter().map(|z| z.to_string()).collect(),
        roll: RollPolicy {
            propagation_delay_secs: 300,
            dnskey_ttl_secs: 600,
            rotation_interval_secs: 86400,
            retry_backoff_secs: 30,
            max_retry_backoff_secs: 240,
        },
    }
}
