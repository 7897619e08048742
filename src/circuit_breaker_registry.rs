//! Registry of named circuit breakers.
//!
//! Lets an operator surface (health endpoint, admin command) find a breaker by id to inspect or
//! reset it. Registered policies share state with every clone handed to callers, so a reset
//! through the registry is seen by all of them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::BoxFuture;
use tracing::warn;

use crate::circuit_breaker::{CircuitBreakerPolicy, CircuitSnapshot};

/// Errors from breaker registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("circuit breaker '{id}' not found")]
    NotFound { id: String },
}

/// Lookup and control of breakers by id.
pub trait CircuitBreakerRegistry: Send + Sync + std::fmt::Debug {
    /// Register a breaker under `id`. An existing entry is replaced; last registration wins.
    fn register(&self, id: String, breaker: CircuitBreakerPolicy);
    /// Breaker registered under `id`.
    fn get(&self, id: &str) -> Option<CircuitBreakerPolicy>;
    /// Reset the breaker under `id` to Closed.
    fn reset<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), RegistryError>>;
    /// Snapshot of every registered breaker, sorted by id.
    fn snapshot(&self) -> BoxFuture<'_, Vec<(String, CircuitSnapshot)>>;
}

/// In-memory implementation backed by an RwLock.
#[derive(Default, Clone, Debug)]
pub struct InMemoryCircuitBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreakerPolicy>>>,
}

impl InMemoryCircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // a panic while holding the lock cannot leave the map half-updated
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CircuitBreakerPolicy>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CircuitBreakerPolicy>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registered breaker under `id`, or a new one from `make` stored under that id.
    pub fn get_or_insert_with<F>(&self, id: &str, make: F) -> CircuitBreakerPolicy
    where
        F: FnOnce() -> CircuitBreakerPolicy,
    {
        if let Some(existing) = self.read().get(id) {
            return existing.clone();
        }
        self.write().entry(id.to_string()).or_insert_with(make).clone()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl CircuitBreakerRegistry for InMemoryCircuitBreakerRegistry {
    fn register(&self, id: String, breaker: CircuitBreakerPolicy) {
        let mut map = self.write();
        if map.contains_key(&id) {
            warn!(target: "tripwire::circuit_breaker_registry", id = %id, "circuit breaker id replaced; last registration wins");
        }
        map.insert(id, breaker);
    }

    fn get(&self, id: &str) -> Option<CircuitBreakerPolicy> {
        self.read().get(id).cloned()
    }

    fn reset<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            // clone out so the std lock is not held across the breaker's await
            let breaker = self.get(id).ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
            breaker.reset().await;
            Ok(())
        })
    }

    fn snapshot(&self) -> BoxFuture<'_, Vec<(String, CircuitSnapshot)>> {
        Box::pin(async move {
            let mut entries: Vec<(String, CircuitBreakerPolicy)> =
                self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut out = Vec::with_capacity(entries.len());
            for (id, breaker) in entries {
                out.push((id, breaker.snapshot().await));
            }
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitState, Error};
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn breaker() -> CircuitBreakerPolicy {
        CircuitBreakerPolicy::new(1, Duration::from_secs(60), 1).unwrap()
    }

    #[test]
    fn register_warns_and_replaces_duplicates() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = InMemoryCircuitBreakerRegistry::default();
        registry.register("svc".into(), breaker().with_name("first"));
        registry.register("svc".into(), breaker().with_name("second"));

        let resolved = registry.get("svc").expect("breaker present");
        assert_eq!(resolved.name(), "second", "last registration should win");
        assert_eq!(registry.len(), 1);

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("circuit breaker id replaced"),
            "warning should be emitted on duplicate registration"
        );
    }

    #[tokio::test]
    async fn reset_through_registry_is_seen_by_callers() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        let caller = registry.get_or_insert_with("payments", breaker);

        caller.record_failure(&Error::database("db", "down")).await;
        assert_eq!(caller.state().await, CircuitState::Open);

        registry.reset("payments").await.unwrap();
        assert_eq!(caller.state().await, CircuitState::Closed);
        assert_eq!(caller.failure_count().await, 0);
    }

    #[tokio::test]
    async fn reset_unknown_id_is_not_found() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        assert_eq!(
            registry.reset("ghost").await,
            Err(RegistryError::NotFound { id: "ghost".into() })
        );
    }

    #[tokio::test]
    async fn get_or_insert_with_reuses_existing() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        let a = registry.get_or_insert_with("inventory", breaker);
        let b = registry.get_or_insert_with("inventory", || panic!("must not build twice"));

        a.record_failure(&Error::timeout("t", "slow")).await;
        assert_eq!(b.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_id() {
        let registry = InMemoryCircuitBreakerRegistry::new();
        registry.register("zeta".into(), breaker());
        registry.register("alpha".into(), breaker());
        registry.get("zeta").unwrap().record_failure(&Error::unavailable("u", "down")).await;

        let snapshot = registry.snapshot().await;
        let ids: Vec<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(snapshot[0].1.state, CircuitState::Closed);
        assert_eq!(snapshot[1].1.state, CircuitState::Open);
        assert_eq!(registry.ids(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
