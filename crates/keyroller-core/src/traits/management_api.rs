// # Management API Trait
//
// Defines the interface for talking to the DNS server's key-management
// API. The reference implementation (`keyroller-api-pdns`) speaks the
// PowerDNS authoritative HTTP API:
//
// - GET    /zones/:zone/cryptokeys
// - POST   /zones/:zone/cryptokeys
// - PUT    /zones/:zone/cryptokeys/:id
// - DELETE /zones/:zone/cryptokeys/:id
//
// ## Boundaries
//
// API clients are isolated, stateless, single-shot executors:
//
// - One HTTP request per method call, bounded by the configured timeout
// - Errors are returned, never retried here (retry/backoff is owned by
//   `RollerEngine`)
// - No access to the state store, no scheduling decisions, no background
//   tasks

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of DNSSEC key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Key-signing key
    Ksk,
    /// Zone-signing key
    Zsk,
    /// Combined signing key
    Csk,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Ksk => f.write_str("ksk"),
            KeyKind::Zsk => f.write_str("zsk"),
            KeyKind::Csk => f.write_str("csk"),
        }
    }
}

/// A cryptokey as reported by the server
///
/// Mirrors the PowerDNS cryptokey resource; fields the roller does not
/// act on (DS records, private key material) are omitted and ignored
/// during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoKey {
    /// Server-assigned key id
    pub id: u32,

    /// ksk, zsk or csk
    pub keytype: KeyKind,

    /// Whether the key currently signs the zone
    pub active: bool,

    /// Whether the key is published in the DNSKEY RRset
    #[serde(default)]
    pub published: bool,

    /// DNSKEY record content, if the server included it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dnskey: Option<String>,

    /// Signing algorithm mnemonic (e.g. "ECDSAP256SHA256")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,

    /// Key size in bits, where applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
}

/// Parameters for creating a new cryptokey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKeyRequest {
    /// ksk, zsk or csk
    pub keytype: KeyKind,

    /// Whether the key should sign immediately
    pub active: bool,

    /// Whether the key should appear in the DNSKEY RRset
    pub published: bool,
}

impl NewKeyRequest {
    /// A pre-published ZSK: visible in the DNSKEY RRset but not signing
    /// yet, so resolvers can cache it before it takes over.
    pub fn prepublished_zsk() -> Self {
        Self {
            keytype: KeyKind::Zsk,
            active: false,
            published: true,
        }
    }

    /// An immediately active ZSK, used to bootstrap a zone that has no
    /// keys at all.
    pub fn active_zsk() -> Self {
        Self {
            keytype: KeyKind::Zsk,
            active: true,
            published: true,
        }
    }
}

/// Trait for key-management API implementations
///
/// Implementations must be thread-safe and usable across async tasks.
/// Each method performs exactly one API call; transient failures
/// (timeouts, non-2xx responses) are returned as errors for the engine
/// to back off and retry.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// List all cryptokeys for a zone
    async fn list_keys(&self, zone: &str) -> Result<Vec<CryptoKey>, crate::Error>;

    /// Create a new cryptokey and return the server's view of it
    async fn create_key(
        &self,
        zone: &str,
        request: &NewKeyRequest,
    ) -> Result<CryptoKey, crate::Error>;

    /// Activate or deactivate an existing cryptokey
    async fn set_key_active(
        &self,
        zone: &str,
        key_id: u32,
        active: bool,
    ) -> Result<(), crate::Error>;

    /// Remove a cryptokey
    async fn delete_key(&self, zone: &str, key_id: u32) -> Result<(), crate::Error>;

    /// Name of the API backend (for logging/debugging)
    fn api_name(&self) -> &'static str;
}
