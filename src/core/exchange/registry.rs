//! Connection registry: at most one live adapter per `(user_id, exchange_id)`.
//!
//! Adapters are created lazily through the factory, connected, and cached on
//! success only; a failed connect is closed and dropped, never cached.
//! Concurrent `get_adapter` calls for the same key are serialized by a
//! per-key creation guard with a double-checked cache lookup, so two adapters
//! are never built for one account.
//!
//! The registry also owns the process-wide leader descriptor slot: requests
//! carrying the reserved `leader` user id resolve against it.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::domain::AccountDescriptor;
use crate::error::ExchangeError;

use super::factory::{AdapterFactory, AdapterFactoryFn};
use super::ExchangeAdapter;

pub struct ConnectionRegistry {
    adapters: DashMap<String, Arc<dyn ExchangeAdapter>>,
    /// Per-key guards so concurrent creations for one account collapse into
    /// a single connect.
    creation_guards: DashMap<String, Arc<Mutex<()>>>,
    /// Written once at startup, read-only thereafter.
    leader: RwLock<Option<AccountDescriptor>>,
    factory: AdapterFactoryFn,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_factory(AdapterFactory::default_factory())
    }

    /// Build a registry with a custom adapter factory (used by tests).
    #[must_use]
    pub fn with_factory(factory: AdapterFactoryFn) -> Self {
        Self {
            adapters: DashMap::new(),
            creation_guards: DashMap::new(),
            leader: RwLock::new(None),
            factory,
        }
    }

    /// Install the leader descriptor. Intended to be called exactly once at
    /// startup; a second call replaces the slot with a warning.
    pub fn set_leader(&self, descriptor: AccountDescriptor) {
        let mut slot = self.leader.write();
        if slot.is_some() {
            warn!(user_id = %descriptor.user_id, "Leader descriptor replaced");
        }
        *slot = Some(descriptor);
    }

    #[must_use]
    pub fn leader_descriptor(&self) -> Option<AccountDescriptor> {
        self.leader.read().clone()
    }

    /// Resolve the leader's adapter through the stored descriptor slot.
    pub async fn leader_adapter(&self) -> Result<Arc<dyn ExchangeAdapter>, ExchangeError> {
        self.get_adapter(&AccountDescriptor::leader_token()).await
    }

    /// Return the cached live adapter for `descriptor`, or construct,
    /// connect and cache one.
    pub async fn get_adapter(
        &self,
        descriptor: &AccountDescriptor,
    ) -> Result<Arc<dyn ExchangeAdapter>, ExchangeError> {
        let resolved = if descriptor.is_leader_token() {
            self.leader.read().clone().ok_or_else(|| {
                error!("Leader adapter requested but no leader descriptor is configured");
                ExchangeError::MissingLeader
            })?
        } else {
            descriptor.clone()
        };

        let key = resolved.cache_key();
        if let Some(adapter) = self.adapters.get(&key) {
            return Ok(adapter.clone());
        }

        let guard = self
            .creation_guards
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _creating = guard.lock().await;

        // Double-checked: another task may have finished while we waited.
        if let Some(adapter) = self.adapters.get(&key) {
            return Ok(adapter.clone());
        }

        debug!(key = %key, exchange = %resolved.exchange_id, "Creating adapter");
        let adapter = (self.factory)(&resolved)?;

        match adapter.connect().await {
            Ok(()) => {
                self.adapters.insert(key.clone(), adapter.clone());
                info!(key = %key, "Adapter connected");
                Ok(adapter)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Adapter failed to connect");
                if let Err(close_err) = adapter.close().await {
                    warn!(key = %key, error = %close_err, "Failed to close half-built adapter");
                }
                Err(e)
            }
        }
    }

    /// Close every cached adapter and clear the table. Individual close
    /// failures are logged, never propagated.
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        info!(count = keys.len(), "Closing all adapters");
        for key in keys {
            if let Some((_, adapter)) = self.adapters.remove(&key) {
                if let Err(e) = adapter.close().await {
                    error!(key = %key, error = %e, "Failed to close adapter");
                }
            }
        }
        self.adapters.clear();
        self.creation_guards.clear();
    }

    /// Number of live adapters, for status reporting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
