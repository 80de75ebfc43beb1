//! Unit director: many zones, one HVAC unit.
//!
//! Zone status streams are merged with no ordering assumed between them. The
//! latest status of every zone is kept, and each incoming status produces one
//! command for the unit:
//!
//! 1. failed and disabled zones are left out
//! 2. voting zones decide; non-voting zones only get a say when no enabled
//!    zone is voting at all
//! 3. the calling zone with the highest demand (then dump priority, then
//!    name) picks the mode; zones calling for the other mode wait
//! 4. demand is the highest demand among calling zones in that mode, clamped
//!    to `0..=1`; with nobody calling the unit idles in its current mode

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use hcc_core::flux::MULTICAST_CAPACITY;
use hcc_core::{Addressable, Flux, HvacCommand, HvacMode, Multicast, Pipeline, Signal};
use hcc_devices::{HvacDevice, HvacDeviceStatus};
use tracing::{debug, info, trace, warn};

use crate::error::{ModelError, ModelResult};
use crate::zone::ZoneStatus;

pub struct UnitDirector {
    name: String,
    zones: Arc<BTreeSet<String>>,
    mode: HvacMode,
}

impl UnitDirector {
    pub fn new<I, S>(name: impl Into<String>, zones: I, mode: HvacMode) -> ModelResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if mode == HvacMode::Off {
            return Err(ModelError::UnsupportedMode { entity: name, mode });
        }
        let mut known = BTreeSet::new();
        for zone in zones {
            let zone = zone.into();
            if !known.insert(zone.clone()) {
                return Err(ModelError::DuplicateZone { zone });
            }
        }
        if known.is_empty() {
            return Err(ModelError::InvalidArg {
                what: "unit director needs at least one zone",
            });
        }
        info!(director = %name, zones = ?known, %mode, "created");
        Ok(Self {
            name,
            zones: Arc::new(known),
            mode,
        })
    }

    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().map(String::as_str)
    }

    /// Initial mode, announced before anything else.
    pub fn mode(&self) -> HvacMode {
        self.mode
    }

    pub fn compute(&self, inputs: Vec<Flux<ZoneStatus, String>>) -> Pipeline<Signal<HvacCommand>> {
        let mut merged = stream::select_all(inputs);
        let name = self.name.clone();
        let zones = self.zones.clone();
        let initial = self.mode;

        Pipeline::spawn(&self.name, move |tx| async move {
            if tx
                .send(Signal::new(Utc::now(), HvacCommand::mode_only(initial)))
                .await
                .is_err()
            {
                return;
            }
            let mut latest: BTreeMap<String, Signal<ZoneStatus, String>> = BTreeMap::new();
            let mut mode = initial;

            while let Some(signal) = merged.next().await {
                let Some(zone) = signal.payload().cloned() else {
                    warn!(director = %name, ?signal, "zone signal without a zone name, ignored");
                    continue;
                };
                if !zones.contains(&zone) {
                    warn!(director = %name, %zone, "alien zone, ignored");
                    continue;
                }
                let timestamp = signal.timestamp();
                latest.insert(zone, signal);

                let (next, demand) = aggregate(&latest, mode);
                if next != mode {
                    info!(director = %name, from = %mode, to = %next, "mode change");
                    mode = next;
                }
                let command = HvacCommand {
                    mode: Some(mode),
                    demand: Some(demand),
                    fan_speed: None,
                };
                trace!(director = %name, ?command, "command");
                if tx.send(Signal::new(timestamp, command)).await.is_err() {
                    break;
                }
            }
            debug!(director = %name, "input complete");
        })
    }

    /// Run `device` on the aggregate of `zones`.
    pub fn connect(&self, zones: Vec<Flux<ZoneStatus, String>>, device: Arc<dyn HvacDevice>) -> Feed {
        let mut commands = self.compute(zones);
        let multicast = Multicast::new(MULTICAST_CAPACITY);
        let tee = multicast.clone();
        let unit = Pipeline::spawn(&format!("{} -> {}", self.name, device.address()), move |tx| async move {
            while let Some(command) = commands.next().await {
                tee.publish(command.clone());
                if tx.send(command).await.is_err() {
                    break;
                }
            }
            tee.close();
        });
        info!(director = %self.name, device = %device.address(), "connected");
        Feed {
            commands: multicast,
            status: device.compute(unit.boxed()),
        }
    }
}

impl Addressable for UnitDirector {
    fn address(&self) -> &str {
        &self.name
    }
}

/// Mode and demand for the next unit command.
pub fn aggregate(latest: &BTreeMap<String, Signal<ZoneStatus, String>>, current: HvacMode) -> (HvacMode, f64) {
    let candidates: Vec<(&str, &ZoneStatus)> = latest
        .iter()
        .filter(|(_, signal)| !signal.is_error())
        .filter_map(|(zone, signal)| signal.value().map(|status| (zone.as_str(), status)))
        .filter(|(_, status)| status.settings.is_enabled())
        .collect();
    let voting: Vec<(&str, &ZoneStatus)> = candidates
        .iter()
        .copied()
        .filter(|(_, status)| status.settings.is_voting())
        .collect();
    let pool = if voting.is_empty() { &candidates } else { &voting };

    let leader = pool
        .iter()
        .filter(|(_, status)| status.calling.calling)
        .max_by(|a, b| precedence(a, b));
    let Some((_, leader)) = leader else {
        return (current, 0.0);
    };

    // voters pick the mode, every calling zone in that mode counts for demand
    let mode = leader.mode;
    let demand = candidates
        .iter()
        .filter(|(_, status)| status.calling.calling && status.mode == mode)
        .map(|(_, status)| status.calling.demand)
        .fold(0.0, f64::max)
        .clamp(0.0, 1.0);
    (mode, demand)
}

fn precedence(a: &(&str, &ZoneStatus), b: &(&str, &ZoneStatus)) -> Ordering {
    a.1.calling
        .demand
        .total_cmp(&b.1.calling.demand)
        .then(a.1.settings.dump_priority().cmp(&b.1.settings.dump_priority()))
        .then(b.0.cmp(a.0))
}

/// A unit director wired to its device.
pub struct Feed {
    commands: Multicast<Signal<HvacCommand>>,
    status: Pipeline<Signal<HvacDeviceStatus>>,
}

impl Unpin for Feed {}

impl Feed {
    /// Commands sent to the device from now on.
    pub fn commands(&self) -> Flux<HvacCommand> {
        self.commands.subscribe()
    }

    /// Stops the device pipeline and everything upstream of it.
    pub fn dispose(&self) {
        self.status.dispose();
    }
}

impl Stream for Feed {
    type Item = Signal<HvacDeviceStatus>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().status).poll_next(cx)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::settings::ZoneSettings;
    use crate::thermostat::CallingStatus;
    use proptest::prelude::*;

    fn zone() -> impl Strategy<Value = ZoneStatus> {
        (any::<bool>(), -1.0f64..3.0, any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(cooling, demand, calling, enabled, voting)| ZoneStatus {
                settings: ZoneSettings {
                    enabled: Some(enabled),
                    voting: Some(voting),
                    ..ZoneSettings::with_setpoint(22.0)
                },
                mode: if cooling { HvacMode::Cooling } else { HvacMode::Heating },
                calling: CallingStatus {
                    sample: Some(demand),
                    demand,
                    calling,
                },
                economizer: None,
                period: None,
            },
        )
    }

    fn latest(zones: Vec<ZoneStatus>) -> BTreeMap<String, Signal<ZoneStatus, String>> {
        zones
            .into_iter()
            .enumerate()
            .map(|(n, status)| {
                let name = format!("z{n}");
                (name.clone(), Signal::new(Utc::now(), status).with_payload(name))
            })
            .collect()
    }

    proptest! {
        #[test]
        fn demand_stays_in_unit_range(zones in prop::collection::vec(zone(), 0..6)) {
            let (mode, demand) = aggregate(&latest(zones), HvacMode::Cooling);
            prop_assert!((0.0..=1.0).contains(&demand));
            prop_assert_ne!(mode, HvacMode::Off);
        }

        #[test]
        fn nobody_calling_keeps_mode_and_idles(zones in prop::collection::vec(zone(), 0..6)) {
            let quiet = zones
                .into_iter()
                .map(|mut status| {
                    status.calling.calling = false;
                    status
                })
                .collect();
            prop_assert_eq!(aggregate(&latest(quiet), HvacMode::Heating), (HvacMode::Heating, 0.0));
        }
    }
}
