//! Replaying, closable registry of one kind of entity.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{RegistryError, RegistryResult};

/// How long [`EntityProvider::get_by_id`] waits for a missing entity.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

struct Registry<T> {
    entries: Vec<(String, T)>,
    closed: bool,
}

struct Inner<T> {
    kind: String,
    registry: Mutex<Registry<T>>,
    /// Bumped on every registration and on close.
    changes: watch::Sender<u64>,
}

/// Cheap to clone; clones share the registry.
pub struct EntityProvider<T> {
    inner: Arc<Inner<T>>,
    discovery_timeout: Duration,
}

impl<T> Clone for EntityProvider<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            discovery_timeout: self.discovery_timeout,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> EntityProvider<T> {
    /// `kind` is what the entities are ("sensor", "switch"), used in logs.
    pub fn new(kind: impl Into<String>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                kind: kind.into(),
                registry: Mutex::new(Registry {
                    entries: Vec::new(),
                    closed: false,
                }),
                changes,
            }),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    pub fn register(&self, key: impl Into<String>, entity: T) -> RegistryResult<()> {
        let key = key.into();
        {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return Err(RegistryError::AfterClose {
                    kind: self.inner.kind.clone(),
                    key,
                });
            }
            if registry.entries.iter().any(|(k, _)| *k == key) {
                return Err(RegistryError::Duplicate {
                    kind: self.inner.kind.clone(),
                    key,
                });
            }
            info!(kind = %self.inner.kind, %key, "available");
            registry.entries.push((key, entity));
        }
        self.inner.changes.send_modify(|n| *n += 1);
        Ok(())
    }

    /// Every registration so far, then every later one. Completes after
    /// [`close`](EntityProvider::close).
    pub fn flux(&self) -> BoxStream<'static, (String, T)> {
        let inner = self.inner.clone();
        let changes = inner.changes.subscribe();
        stream::unfold((inner, changes, 0usize), |(inner, mut changes, next)| async move {
            loop {
                let found = {
                    let registry = inner.registry.lock();
                    match registry.entries.get(next) {
                        Some(entry) => Some(Some(entry.clone())),
                        None if registry.closed => Some(None),
                        None => None,
                    }
                };
                match found {
                    Some(Some(entry)) => return Some((entry, (inner, changes, next + 1))),
                    Some(None) => return None,
                    None => {}
                }
                if changes.changed().await.is_err() {
                    return None;
                }
            }
        })
        .boxed()
    }

    /// Wait up to the discovery timeout for `id` to be registered. Returns
    /// right away once the registry is closed. A miss is logged along with
    /// every known key.
    pub async fn get_by_id(&self, consumer: &str, id: &str) -> Option<T> {
        let search = async {
            let mut flux = self.flux();
            while let Some((key, entity)) = flux.next().await {
                if key == id {
                    return Some(entity);
                }
            }
            None
        };

        match tokio::time::timeout(self.discovery_timeout, search).await {
            Ok(Some(entity)) => Some(entity),
            Ok(None) => {
                error!(consumer, id, kind = %self.inner.kind, "not found among configured IDs");
                self.dump(consumer, id);
                None
            }
            Err(_) => {
                error!(
                    consumer,
                    id,
                    kind = %self.inner.kind,
                    timeout = ?self.discovery_timeout,
                    "not found within the discovery timeout, check if it is configured and available"
                );
                self.dump(consumer, id);
                None
            }
        }
    }

    fn dump(&self, consumer: &str, id: &str) {
        for key in self.keys() {
            error!(consumer, kind = %self.inner.kind, %key, "known");
        }
        error!(consumer, id, "skipping to proceed with the rest of the configuration");
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .registry
            .lock()
            .entries
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry.lock().closed
    }

    /// No more entities of this kind are coming. Idempotent.
    pub fn close(&self) {
        {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            debug!(kind = %self.inner.kind, count = registry.entries.len(), "collected");
            for (key, _) in &registry.entries {
                debug!(kind = %self.inner.kind, %key, "  collected");
            }
        }
        self.inner.changes.send_modify(|n| *n += 1);
        debug!(kind = %self.inner.kind, "closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn register_after_close_fails() {
        let sensors = EntityProvider::new("sensor");
        sensors.register("den", 1).unwrap();
        sensors.close();
        sensors.close();
        assert!(sensors.is_closed());
        assert_eq!(
            sensors.register("attic", 2),
            Err(RegistryError::AfterClose {
                kind: "sensor".into(),
                key: "attic".into()
            })
        );
        assert_eq!(sensors.keys(), vec!["den".to_string()]);
    }

    #[test]
    fn duplicate_keys_are_refused() {
        let sensors = EntityProvider::new("sensor");
        sensors.register("den", 1).unwrap();
        assert!(matches!(
            sensors.register("den", 2),
            Err(RegistryError::Duplicate { .. })
        ));
        assert_eq!(sensors.len(), 1);
    }

    #[test]
    fn flux_replays_then_waits_then_completes() {
        let switches = EntityProvider::new("switch");
        switches.register("fan", 'f').unwrap();

        let mut flux = task::spawn(switches.flux());
        assert_ready_eq!(flux.poll_next(), Some(("fan".to_string(), 'f')));
        assert_pending!(flux.poll_next());

        switches.register("pump", 'p').unwrap();
        assert!(flux.is_woken());
        assert_ready_eq!(flux.poll_next(), Some(("pump".to_string(), 'p')));

        switches.close();
        assert_ready_eq!(flux.poll_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn get_waits_for_late_registration() {
        let sensors = EntityProvider::new("sensor");
        let late = sensors.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            late.register("den", 21).unwrap();
        });

        let start = Instant::now();
        assert_eq!(sensors.get_by_id("zone den", "den").await, Some(21));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_id_times_out() {
        let sensors = EntityProvider::<u32>::new("sensor").with_discovery_timeout(Duration::from_secs(5));
        sensors.register("den", 1).unwrap();

        let start = Instant::now();
        assert_eq!(sensors.get_by_id("zone attic", "attic").await, None);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_registry_answers_right_away() {
        let sensors = EntityProvider::<u32>::new("sensor");
        sensors.close();

        let start = Instant::now();
        assert_eq!(sensors.get_by_id("zone attic", "attic").await, None);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
