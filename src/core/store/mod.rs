//! Credential storage.

mod keystore;

pub use keystore::Keystore;
