//! Sealed key and record storage for the PowerAuth client.
//!
//! Sits between the engine and the platform secure storage: the platform
//! supplies an atomic byte store ([`SecureStorage`]), this crate layers
//! per-instance namespacing, sealing, and scoped unlock-then-use access
//! on top. See [`KeyStore`] for the protection classes.

mod error;
mod storage;
mod store;

pub use error::{KeyStoreError, KeyStoreResult, StorageError};
pub use storage::{MemoryStorage, SecureStorage};
pub use store::KeyStore;
