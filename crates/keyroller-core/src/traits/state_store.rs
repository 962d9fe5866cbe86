// # State Store Trait
//
// Defines the interface for durable persistence of the runner state.
//
// ## Purpose
//
// The roller must survive restarts without duplicating or skipping key
// actions, so the full `RollerState` snapshot is persisted and read back
// at startup.
//
// ## Contract
//
// - `load()` on a store that was never written returns an empty state
//   (first run is not an error)
// - `load()` on corrupt data is an error; the caller treats it as fatal
//   rather than guessing at rollover state
// - `save()` replaces the whole snapshot atomically and must be safe to
//   call from the shutdown path

use async_trait::async_trait;

use crate::status::RollerState;

/// Trait for state store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
/// The engine is the only writer; stores never mutate state on their own.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the persisted snapshot.
    ///
    /// # Returns
    ///
    /// - `Ok(RollerState)`: the snapshot, empty if nothing was ever saved
    /// - `Err(Error)`: storage present but unreadable or corrupt
    async fn load(&self) -> Result<RollerState, crate::Error>;

    /// Replace the persisted snapshot atomically.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: snapshot durably written
    /// - `Err(Error)`: storage error
    async fn save(&self, state: &RollerState) -> Result<(), crate::Error>;
}
