use super::MqttSensorClient;
use crate::config::MqttSettings;
use rumqttc::{Publish, QoS};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_forward_publish() {
    // prepare
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let publish = Publish::new(
        "mobilealerts/11566802925f/json",
        QoS::AtLeastOnce,
        br#"{"utms":"2025-01-01T00:00:00.000Z"}"#.to_vec(),
    );

    // execute
    let forwarded = MqttSensorClient::on_sensor_message(&tx, publish);

    // validate
    assert!(forwarded);
    let msg = timeout(Duration::from_millis(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!("mobilealerts/11566802925f/json", msg.topic);
    assert_eq!(br#"{"utms":"2025-01-01T00:00:00.000Z"}"#.to_vec(), msg.payload);
}

#[tokio::test]
async fn test_forward_without_receiver() {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    drop(rx);
    let publish = Publish::new("mobilealerts/a/json", QoS::AtMostOnce, vec![]);

    assert!(!MqttSensorClient::on_sensor_message(&tx, publish));
}

#[tokio::test]
async fn test_shutdown_ends_loop() {
    // prepare
    let settings = MqttSettings {
        host: "127.0.0.1".to_owned(),
        port: 1,
        ..MqttSettings::default()
    };
    let (client, eventloop) = MqttSensorClient::new(&settings);
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // execute
    shutdown_tx.send(true).unwrap();
    let result = timeout(
        Duration::from_secs(10),
        client.dispatch_receive_loop(eventloop, tx, shutdown_rx),
    )
    .await;

    // validate
    assert!(result.is_ok());
}
