//! Builds a running system out of a [`Scenario`] and plays its readings.
//!
//! Every switch is backed by a null driver, so the whole plant runs in
//! process. Sensors are addresses on a [`SignalHub`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use hcc_controls::PidGains;
use hcc_core::flux::MULTICAST_CAPACITY;
use hcc_core::{HvacMode, Multicast, Pipeline, Signal, SignalError, SignalHub, SignalSource};
use hcc_devices::{
    CqrsDevice, HeatPump, HvacDevice, HvacDeviceKind, ManagedDevice, OutputCommand, Switch,
    SwitchConfig, SwitchableHvacDevice, VariableHvacDevice,
};
use hcc_model::economizer::DEFAULT_TIMEOUT;
use hcc_model::{Economizer, StatusCollector, SystemStatus, Thermostat, UnitDirector, Zone};
use hcc_registry::EntityProvider;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SimError, SimResult};
use crate::scenario::{DeviceConfig, Reading, Scenario};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Plant {
    sensors: SignalHub<f64>,
    switches: EntityProvider<Arc<Switch>>,
    devices: EntityProvider<Arc<dyn HvacDevice>>,
    actuators: Vec<Arc<ManagedDevice<OutputCommand>>>,
    zones: Vec<Zone>,
    collector: StatusCollector,
    feed: JoinHandle<()>,
}

impl Plant {
    pub async fn assemble(scenario: &Scenario) -> SimResult<Self> {
        let sensors = SignalHub::new();
        let collector = StatusCollector::new();
        let mut plant = Builder {
            switches: EntityProvider::new("switch"),
            devices: EntityProvider::new("HVAC device"),
            actuators: Vec::new(),
            collector: collector.clone(),
        };

        plant.device(&scenario.unit.device, None)?;
        for zone in &scenario.zones {
            if let Some(economizer) = &zone.economizer {
                plant.device(&economizer.device, Some(economizer.settings.mode))?;
            }
        }
        plant.switches.close();
        plant.devices.close();

        for sensor in scenario.sensors() {
            collector.watch_sensor(sensor.clone(), sensors.flux(&sensor));
        }

        let mut zones = Vec::new();
        let mut inputs = Vec::new();
        for config in &scenario.zones {
            let gains = PidGains::new(
                config.gains.p,
                config.gains.i,
                config.gains.d,
                config.gains.saturation_limit,
            )?;
            let mode = config.mode.unwrap_or(scenario.unit.mode);
            let thermostat = Thermostat::new(&config.name, mode, config.setpoint, gains)?;

            let economizer = match &config.economizer {
                Some(eco) => {
                    let device = plant.lookup(&config.name, &eco.device.id).await?;
                    let economizer = Economizer::new(
                        format!("{}-economizer", config.name),
                        eco.settings.clone(),
                        device,
                        DEFAULT_TIMEOUT,
                    )?;
                    economizer.connect_ambient(sensors.flux(&eco.ambient_sensor));
                    Some(economizer)
                }
                None => None,
            };

            let zone = Zone::new(thermostat, config.settings.clone(), economizer)?;
            let (to_director, to_collector) =
                tee(zone.name(), zone.compute(sensors.flux(&config.sensor)).boxed());
            collector.watch_zone(to_collector);
            inputs.push(to_director);
            zones.push(zone);
        }

        let unit = &scenario.unit;
        let director = UnitDirector::new(&unit.name, zones.iter().map(Zone::name), unit.mode)?;
        let device = plant.lookup(&unit.name, &unit.device.id).await?;
        let mut feed = director.connect(inputs, device);

        let mut commands = feed.commands();
        let name = unit.name.clone();
        let feed = tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = commands.next() => match command {
                        Some(signal) => info!(unit = %name, command = ?signal.value(), "command"),
                        None => break,
                    },
                    status = feed.next() => match status {
                        Some(signal) => debug!(unit = %name, status = ?signal.value(), "device"),
                        None => break,
                    },
                }
            }
            // the device shuts off once the directors input completes
            while let Some(signal) = feed.next().await {
                debug!(unit = %name, status = ?signal.value(), "device");
            }
        });

        info!(zones = zones.len(), unit = %unit.name, "assembled");
        Ok(Self {
            sensors,
            switches: plant.switches,
            devices: plant.devices,
            actuators: plant.actuators,
            zones,
            collector,
            feed,
        })
    }

    /// Publish each reading at its offset from now.
    pub async fn play(&self, readings: &[Reading]) {
        let start = Instant::now();
        let mut readings = readings.to_vec();
        readings.sort_by_key(|r| r.at_ms);
        for reading in readings {
            tokio::time::sleep_until(start + Duration::from_millis(reading.at_ms)).await;
            let signal = match reading.value {
                Some(value) => Signal::new(Utc::now(), value),
                None => Signal::failure(Utc::now(), SignalError::Sensor("no reading".into())),
            };
            debug!(sensor = %reading.sensor, value = ?reading.value, "reading");
            if self.sensors.publish(&reading.sensor, signal) == 0 {
                warn!(sensor = %reading.sensor, "nobody is listening");
            }
        }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn switches(&self) -> &EntityProvider<Arc<Switch>> {
        &self.switches
    }

    pub fn snapshot(&self) -> SystemStatus {
        self.collector.snapshot()
    }

    /// Complete the sensors, let the unit drain, then close everything.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.sensors.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.feed).await.is_err() {
            warn!(timeout = ?DRAIN_TIMEOUT, "unit did not drain in time");
        }

        for zone in &self.zones {
            zone.close().await;
        }
        let mut devices = self.devices.flux();
        while let Some((_, device)) = devices.next().await {
            device.close().await;
        }
        let mut switches = self.switches.flux();
        while let Some((_, switch)) = switches.next().await {
            switch.close().await;
        }
        for actuator in &self.actuators {
            actuator.close().await;
        }
        self.collector.dispose();
    }
}

struct Builder {
    switches: EntityProvider<Arc<Switch>>,
    devices: EntityProvider<Arc<dyn HvacDevice>>,
    actuators: Vec<Arc<ManagedDevice<OutputCommand>>>,
    collector: StatusCollector,
}

impl Builder {
    fn switch(&self, id: String) -> SimResult<Arc<Switch>> {
        let (switch, _driver) = Switch::with_null_driver(&id, SwitchConfig::default(), false);
        let switch = Arc::new(switch);
        self.collector.watch_switch(switch.flux());
        self.switches.register(id, switch.clone())?;
        Ok(switch)
    }

    /// `mode` is what the device is used for when the configuration leaves it out.
    fn device(&mut self, config: &DeviceConfig, mode: Option<HvacMode>) -> SimResult<()> {
        let id = config.id.as_str();
        let single_mode = || {
            config
                .mode
                .or(mode)
                .ok_or_else(|| SimError::Invalid(format!("{} device {id} needs a mode", config.kind)))
        };

        let device: Arc<dyn HvacDevice> = match config.kind {
            HvacDeviceKind::Switchable => {
                let switch = self.switch(format!("{id}-switch"))?;
                Arc::new(SwitchableHvacDevice::new(
                    id,
                    single_mode()?,
                    switch,
                    config.inverted,
                )?)
            }
            HvacDeviceKind::HeatPump => {
                let mut pump = HeatPump::new(
                    id,
                    self.switch(format!("{id}-mode"))?,
                    self.switch(format!("{id}-running"))?,
                    self.switch(format!("{id}-fan"))?,
                )?
                .with_reversal(config.reversal);
                if let Some(delay) = config.mode_change_delay_ms {
                    pump = pump.with_mode_change_delay(Duration::from_millis(delay));
                }
                Arc::new(pump)
            }
            HvacDeviceKind::Variable => {
                let (actuator, _driver) = ManagedDevice::with_null_driver(
                    format!("{id}-output"),
                    SwitchConfig::default(),
                    OutputCommand::off(),
                );
                let actuator = Arc::new(actuator);
                self.collector.watch_switch(actuator.flux());
                self.actuators.push(actuator.clone());
                Arc::new(VariableHvacDevice::new(
                    id,
                    single_mode()?,
                    actuator,
                    config.max_power.unwrap_or(1.0),
                    config.band_count.unwrap_or(0),
                )?)
            }
        };

        self.collector.watch_hvac_device(id, device.flux());
        self.devices.register(id, device)?;
        Ok(())
    }

    async fn lookup(&self, consumer: &str, id: &str) -> SimResult<Arc<dyn HvacDevice>> {
        self.devices
            .get_by_id(consumer, id)
            .await
            .ok_or_else(|| SimError::Missing {
                kind: "HVAC device",
                id: id.to_string(),
            })
    }
}

/// Two copies of one stream. The copy only sees what is published after the
/// call, which is everything since nothing runs until it is polled.
fn tee<T: Clone + Send + 'static>(
    name: &str,
    mut input: BoxStream<'static, T>,
) -> (BoxStream<'static, T>, BoxStream<'static, T>) {
    let copy = Multicast::new(MULTICAST_CAPACITY);
    let side = copy.subscribe();
    let main = Pipeline::spawn(&format!("{name}-tee"), move |tx| async move {
        while let Some(item) = input.next().await {
            copy.publish(item.clone());
            if tx.send(item).await.is_err() {
                break;
            }
        }
        copy.close();
    });
    (main.boxed(), side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcc_core::SignalStatus;
    use hcc_model::EntityKind;

    const COOLING: &str = r#"
unit:
  name: main
  mode: cooling
  device: { id: ac, kind: switchable, mode: cooling }
zones:
  - name: den
    sensor: den-temp
    setpoint: 22
    gains: { p: 1, i: 0, d: 0, saturation_limit: 0 }
readings:
  - { at-ms: 0, sensor: den-temp, value: 26 }
  - { at-ms: 500, sensor: den-temp, value: 26.5 }
"#;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn hot_zone_turns_the_unit_on() {
        let scenario = Scenario::parse(COOLING).unwrap();
        let plant = Plant::assemble(&scenario).await.unwrap();
        plant.play(&scenario.readings).await;
        settle().await;

        let switch = plant
            .switches()
            .get_by_id("test", "ac-switch")
            .await
            .unwrap();
        assert_eq!(switch.state().requested, Some(true));

        let snapshot = plant.snapshot();
        let den = snapshot.get("den").unwrap();
        assert_eq!(den.kind, EntityKind::Zone);
        assert_eq!(den.status, SignalStatus::Ok);
        assert_eq!(snapshot.get("den-temp").unwrap().kind, EntityKind::Sensor);
        assert_eq!(snapshot.get("ac").unwrap().kind, EntityKind::HvacDevice);

        plant.shutdown().await;
        assert_eq!(switch.state().requested, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sensor_shows_in_the_snapshot() {
        let mut scenario = Scenario::parse(COOLING).unwrap();
        scenario.readings.push(Reading {
            at_ms: 1_000,
            sensor: "den-temp".into(),
            value: None,
        });
        let plant = Plant::assemble(&scenario).await.unwrap();
        plant.play(&scenario.readings).await;
        settle().await;

        let snapshot = plant.snapshot();
        assert_eq!(snapshot.get("den-temp").unwrap().status, SignalStatus::FailureTotal);
        assert_eq!(snapshot.get("den").unwrap().status, SignalStatus::FailureTotal);
        assert!(!snapshot.is_healthy());
        plant.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_mode_is_refused() {
        let text = COOLING.replace(", mode: cooling }", " }");
        let scenario = Scenario::parse(&text).unwrap();
        assert!(matches!(
            Plant::assemble(&scenario).await,
            Err(SimError::Invalid(_))
        ));
    }
}
