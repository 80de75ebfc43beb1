//! Zones feeding a unit director feeding a device.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use hcc_controls::PidGains;
use hcc_core::{HvacCommand, HvacMode, Signal};
use hcc_devices::{CqrsDevice, Switch, SwitchConfig, SwitchableHvacDevice};
use hcc_model::{Thermostat, UnitDirector, Zone, ZoneSettings};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

fn zone(name: &str, mode: HvacMode, setpoint: f64, voting: bool) -> Zone {
    let gains = PidGains::new(0.5, 0.0, 0.0, 0.0).unwrap();
    let thermostat = Thermostat::new(name, mode, setpoint, gains).unwrap();
    let settings = ZoneSettings {
        voting: Some(voting),
        ..Default::default()
    };
    Zone::new(thermostat, settings, None).unwrap()
}

fn reading(value: f64) -> Signal<f64> {
    Signal::new(Utc::now(), value)
}

#[tokio::test]
async fn voting_zone_wins_the_mode() {
    // A: cooling, 24.2 against 22 -> PID 1.1, calling, demand clamped to 1
    // B: heating, 19.4 against 20 -> PID 0.3, inside the dead band
    let a = zone("a", HvacMode::Cooling, 22.0, true);
    let b = zone("b", HvacMode::Heating, 20.0, true);
    let director = UnitDirector::new("unit", ["a", "b"], HvacMode::Heating).unwrap();

    let (tx_a, rx_a) = mpsc::channel(4);
    let (tx_b, rx_b) = mpsc::channel(4);
    let mut commands = director.compute(vec![
        a.compute(ReceiverStream::new(rx_a).boxed()).boxed(),
        b.compute(ReceiverStream::new(rx_b).boxed()).boxed(),
    ]);

    let announce = commands.next().await.unwrap();
    assert_eq!(*announce.value().unwrap(), HvacCommand::mode_only(HvacMode::Heating));

    tx_b.send(reading(19.4)).await.unwrap();
    let idle = *commands.next().await.unwrap().value().unwrap();
    assert_eq!(idle.mode, Some(HvacMode::Heating));
    assert_eq!(idle.demand, Some(0.0));

    tx_a.send(reading(24.2)).await.unwrap();
    let running = *commands.next().await.unwrap().value().unwrap();
    assert_eq!(running.mode, Some(HvacMode::Cooling));
    assert_eq!(running.demand, Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn zone_demand_reaches_the_switch() {
    let den = zone("den", HvacMode::Cooling, 22.0, true);
    let director = UnitDirector::new("unit", ["den"], HvacMode::Cooling).unwrap();
    let (switch, driver) = Switch::with_null_driver("ac-relay", SwitchConfig::default(), false);
    let switch = Arc::new(switch);
    let ac = Arc::new(SwitchableHvacDevice::new("ac", HvacMode::Cooling, switch.clone(), false).unwrap());

    let (tx, rx) = mpsc::channel(4);
    let mut feed = director.connect(vec![den.compute(ReceiverStream::new(rx).boxed()).boxed()], ac);
    let mut commands = feed.commands();

    tx.send(reading(25.0)).await.unwrap();
    let status = feed.next().await.unwrap();
    assert!(!status.is_error());
    // the mode announcement goes first, then the zone driven command
    let mut seen = Vec::new();
    while let Ok(Some(command)) = tokio::time::timeout(Duration::from_millis(100), commands.next()).await {
        seen.push(*command.value().unwrap());
    }
    assert!(seen.iter().any(|c| c.demand == Some(1.0)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(switch.state().requested, Some(true));
    assert!(driver.sent().iter().any(|c| c.state));

    drop(tx);
    while feed.next().await.is_some() {}
    assert_eq!(switch.state().requested, Some(false));
}
