//! Zone: a thermostat, its settings and an optional economizer.

use std::sync::Arc;

use futures::StreamExt;
use hcc_core::{Addressable, Flux, HvacMode, Pipeline, Signal};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::economizer::{Economizer, EconomizerStatus};
use crate::error::ModelResult;
use crate::settings::{PeriodSettings, ZoneSettings};
use crate::thermostat::{CallingStatus, Thermostat};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneStatus {
    pub settings: ZoneSettings,
    pub mode: HvacMode,
    pub calling: CallingStatus,
    pub economizer: Option<EconomizerStatus>,
    pub period: Option<PeriodSettings>,
}

struct State {
    settings: ZoneSettings,
    period: Option<PeriodSettings>,
}

struct Shared {
    thermostat: Arc<Thermostat>,
    economizer: Option<Economizer>,
    state: Mutex<State>,
    /// Bumped on every settings change so running pipelines re-evaluate.
    bump: watch::Sender<u64>,
}

impl Shared {
    fn name(&self) -> &str {
        self.thermostat.address()
    }

    fn step(&self, signal: &Signal<f64, String>) -> Signal<ZoneStatus, String> {
        if let Some(economizer) = &self.economizer {
            economizer.observe_indoor(signal);
        }
        let control = self.thermostat.step(signal);
        let Some(status) = control.value().filter(|_| !control.is_error()) else {
            return control.propagate_failure();
        };

        let (settings, period) = {
            let state = self.state.lock();
            (state.settings.clone(), state.period.clone())
        };
        let calling = if settings.is_enabled() {
            status.signal
        } else {
            CallingStatus::idle()
        };
        let out = control.derive(ZoneStatus {
            settings,
            mode: self.thermostat.mode(),
            calling,
            economizer: None,
            period,
        });

        match &self.economizer {
            Some(economizer) => economizer.suppress(out),
            None => out,
        }
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Zone {
    shared: Arc<Shared>,
}

impl Zone {
    /// Unspecified settings are filled in from the thermostat (setpoint) and
    /// the economizer (economizer settings).
    pub fn new(
        thermostat: Thermostat,
        settings: ZoneSettings,
        economizer: Option<Economizer>,
    ) -> ModelResult<Self> {
        let mut settings = ZoneSettings::with_setpoint(thermostat.setpoint()).merge(&settings);
        if let Some(setpoint) = settings.setpoint {
            thermostat.set_setpoint(setpoint)?;
        }
        if let Some(economizer) = &economizer {
            settings.economizer = Some(match &settings.economizer {
                Some(update) => economizer.set_settings(update)?,
                None => economizer.settings(),
            });
        }
        let (bump, _) = watch::channel(0);
        info!(zone = %thermostat.address(), ?settings, "created");
        Ok(Self {
            shared: Arc::new(Shared {
                thermostat: Arc::new(thermostat),
                economizer,
                state: Mutex::new(State {
                    settings,
                    period: None,
                }),
                bump,
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn thermostat(&self) -> &Arc<Thermostat> {
        &self.shared.thermostat
    }

    pub fn economizer(&self) -> Option<&Economizer> {
        self.shared.economizer.as_ref()
    }

    pub fn settings(&self) -> ZoneSettings {
        self.shared.state.lock().settings.clone()
    }

    pub fn period_settings(&self) -> Option<PeriodSettings> {
        self.shared.state.lock().period.clone()
    }

    /// Merge `update` into the current settings. Nothing changes unless the
    /// whole update is acceptable. Running pipelines re-evaluate the last
    /// sample.
    pub fn set_settings(&self, update: &ZoneSettings) -> ModelResult<ZoneSettings> {
        let merged = self.settings().merge(update);
        if let Some(setpoint) = merged.setpoint {
            self.shared.thermostat.setpoint_range().check(setpoint)?;
        }
        let economizer = match (&self.shared.economizer, &update.economizer) {
            (Some(economizer), Some(update)) => {
                let candidate = economizer.settings().merge(update);
                candidate.validate()?;
                Some((economizer, candidate))
            }
            _ => None,
        };

        if let Some(setpoint) = merged.setpoint {
            self.shared.thermostat.set_setpoint(setpoint)?;
        }
        let mut merged = merged;
        if let Some((economizer, candidate)) = economizer {
            merged.economizer = Some(economizer.set_settings(&candidate)?);
        }

        self.shared.state.lock().settings = merged.clone();
        info!(zone = %self.name(), settings = ?merged, "settings changed");
        self.shared.bump.send_modify(|n| *n += 1);
        Ok(merged)
    }

    /// Apply a schedule period. Ignored while the zone is on hold.
    pub fn set_period_settings(&self, period: Option<PeriodSettings>) -> ModelResult<()> {
        if self.settings().is_on_hold() {
            info!(zone = %self.name(), ?period, "on hold, period change ignored");
            return Ok(());
        }
        match period {
            Some(period) => {
                self.set_settings(&period.settings)?;
                info!(zone = %self.name(), period = %period.period, "period started");
                self.shared.state.lock().period = Some(period);
            }
            None => {
                debug!(zone = %self.name(), "period cleared");
                self.shared.state.lock().period = None;
            }
        }
        Ok(())
    }

    /// One sensor sample, synchronously.
    pub fn step(&self, signal: &Signal<f64>) -> Signal<ZoneStatus, String> {
        self.shared
            .step(&signal.clone().with_payload(self.name().to_string()))
    }

    /// Zone status stream, one per sensor sample plus one per settings
    /// change (computed from the last usable sample). The payload is the
    /// zone name.
    pub fn compute(&self, mut input: Flux<f64>) -> Pipeline<Signal<ZoneStatus, String>> {
        let shared = self.shared.clone();
        let mut bump = self.shared.bump.subscribe();
        Pipeline::spawn(self.name(), move |tx| async move {
            let name = shared.name().to_string();
            let mut last: Option<Signal<f64, String>> = None;
            let mut bump_live = true;
            loop {
                let signal = tokio::select! {
                    next = input.next() => match next {
                        Some(signal) => signal.with_payload(name.clone()),
                        None => break,
                    },
                    changed = bump.changed(), if bump_live => {
                        if changed.is_err() {
                            bump_live = false;
                            continue;
                        }
                        match &last {
                            Some(signal) => signal.clone(),
                            None => continue,
                        }
                    }
                };
                if !signal.is_error() {
                    last = Some(signal.clone());
                }
                if tx.send(shared.step(&signal)).await.is_err() {
                    break;
                }
            }
            debug!(zone = %name, "input complete");
        })
    }

    /// Closes the economizer, if any.
    pub async fn close(&self) {
        info!(zone = %self.name(), "shutting down");
        if let Some(economizer) = &self.shared.economizer {
            economizer.close().await;
        }
    }
}

impl Addressable for Zone {
    fn address(&self) -> &str {
        self.name()
    }
}
