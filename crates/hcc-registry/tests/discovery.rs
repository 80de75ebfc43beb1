//! Entities registered in any order are found by whoever asks for them.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use hcc_registry::EntityProvider;

#[derive(Debug, Clone, PartialEq)]
struct Sensor {
    address: String,
}

#[tokio::test(start_paused = true)]
async fn consumers_and_producers_in_any_order() {
    let sensors: EntityProvider<Arc<Sensor>> = EntityProvider::new("sensor");

    let consumer = {
        let sensors = sensors.clone();
        tokio::spawn(async move {
            let den = sensors.get_by_id("zone den", "den").await;
            let attic = sensors.get_by_id("zone attic", "attic").await;
            (den, attic)
        })
    };

    for (n, address) in ["garage", "den"].into_iter().enumerate() {
        tokio::time::sleep(Duration::from_secs(n as u64 + 1)).await;
        sensors
            .register(address, Arc::new(Sensor { address: address.into() }))
            .unwrap();
    }
    sensors.close();

    let (den, attic) = consumer.await.unwrap();
    assert_eq!(den.unwrap().address, "den");
    assert!(attic.is_none());

    let all: Vec<String> = sensors.flux().map(|(key, _)| key).collect().await;
    assert_eq!(all, vec!["garage".to_string(), "den".to_string()]);
}
