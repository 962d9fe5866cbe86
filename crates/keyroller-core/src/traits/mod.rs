//! Core traits for the key-rotation daemon
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`ManagementApi`]: Query and mutate zone cryptokeys via the server API
//! - [`StateStore`]: Durable persistence of the runner state

pub mod management_api;
pub mod state_store;

pub use management_api::{CryptoKey, KeyKind, ManagementApi, NewKeyRequest};
pub use state_store::StateStore;
