//! System health snapshot built from the signal streams.
//!
//! The collector only observes: it keeps the last status seen per entity and
//! is never consulted for control decisions.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use hcc_core::{Flux, Signal, SignalStatus, Timestamp};
use hcc_devices::{DeviceState, HvacDeviceStatus, StateValue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::zone::ZoneStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Sensor,
    Switch,
    HvacDevice,
    Zone,
    Connector,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityHealth {
    pub kind: EntityKind,
    pub status: SignalStatus,
    pub last_seen: Timestamp,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemStatus {
    pub entities: BTreeMap<String, EntityHealth>,
}

impl SystemStatus {
    pub fn get(&self, id: &str) -> Option<&EntityHealth> {
        self.entities.get(id)
    }

    /// Every entity reported OK last time it was seen.
    pub fn is_healthy(&self) -> bool {
        self.entities.values().all(|h| h.status == SignalStatus::Ok)
    }
}

#[derive(Clone, Default)]
pub struct StatusCollector {
    entities: Arc<Mutex<BTreeMap<String, EntityHealth>>>,
    shutdown: CancellationToken,
}

impl StatusCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T, P>(&self, id: &str, kind: EntityKind, signal: &Signal<T, P>) {
        self.put(
            id,
            kind,
            signal.status(),
            signal.timestamp(),
            signal.error().map(ToString::to_string),
        );
    }

    fn put(
        &self,
        id: &str,
        kind: EntityKind,
        status: SignalStatus,
        last_seen: Timestamp,
        error: Option<String>,
    ) {
        let mut entities = self.entities.lock();
        if entities.get(id).map(|h| h.status) != Some(status) {
            debug!(entity = id, ?kind, ?status, ?error, "health changed");
        }
        entities.insert(
            id.to_string(),
            EntityHealth {
                kind,
                status,
                last_seen,
                error,
            },
        );
    }

    fn follow<S, F>(&self, mut stream: S, mut f: F)
    where
        S: Stream + Send + Unpin + 'static,
        F: FnMut(&StatusCollector, S::Item) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    next = stream.next() => match next {
                        Some(item) => f(&this, item),
                        None => break,
                    },
                }
            }
        });
    }

    pub fn watch_sensor<P: Send + 'static>(&self, id: impl Into<String>, flux: Flux<f64, P>) {
        let id = id.into();
        self.follow(flux, move |this, signal| this.record(&id, EntityKind::Sensor, &signal));
    }

    /// Unavailable devices are reported as at least partially failed.
    pub fn watch_switch<T: StateValue>(&self, flux: Flux<DeviceState<T>, String>) {
        self.follow(flux, |this, signal| {
            let id = match (signal.payload(), signal.value()) {
                (Some(id), _) => id.clone(),
                (None, Some(state)) => state.id.clone(),
                (None, None) => {
                    warn!(?signal, "switch signal without an id, ignored");
                    return;
                }
            };
            match signal.value() {
                Some(state) if !state.available && signal.is_ok() => this.put(
                    &id,
                    EntityKind::Switch,
                    SignalStatus::FailurePartial,
                    signal.timestamp(),
                    Some("unavailable".to_string()),
                ),
                _ => this.record(&id, EntityKind::Switch, &signal),
            }
        });
    }

    pub fn watch_hvac_device(&self, id: impl Into<String>, flux: Flux<HvacDeviceStatus>) {
        let id = id.into();
        self.follow(flux, move |this, signal| {
            this.record(&id, EntityKind::HvacDevice, &signal)
        });
    }

    /// The zone id comes from the signal payload.
    pub fn watch_zone(&self, flux: Flux<ZoneStatus, String>) {
        self.follow(flux, |this, signal| match signal.payload() {
            Some(zone) => this.record(zone, EntityKind::Zone, &signal),
            None => warn!(?signal, "zone signal without a zone name, ignored"),
        });
    }

    pub fn snapshot(&self) -> SystemStatus {
        SystemStatus {
            entities: self.entities.lock().clone(),
        }
    }

    /// Stop every watcher. Recorded health stays available.
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }
}
