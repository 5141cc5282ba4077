use crate::config::MqttSettings;
use crate::sensor::SensorMessage;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn};

#[cfg(test)]
mod test;

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type MqttSender = UnboundedSender<SensorMessage>;

pub struct MqttSensorClient {
    cli: AsyncClient,
    topic: String,
}

impl MqttSensorClient {
    pub fn new(settings: &MqttSettings) -> (Self, EventLoop) {
        let client_id = settings
            .client_id
            .clone()
            .unwrap_or_else(|| format!("sensorlog-{}", uuid::Uuid::new_v4().simple()));
        let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_seconds.max(5)));
        options.set_clean_session(true);

        let (cli, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let client = MqttSensorClient {
            cli,
            topic: settings.topic.clone(),
        };
        (client, eventloop)
    }

    /// Polls the broker connection and forwards every publish to `sender`.
    /// Subscribes again on each (re)connect, ends on shutdown.
    pub async fn dispatch_receive_loop(
        &self,
        mut eventloop: EventLoop,
        sender: MqttSender,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(topic = %self.topic, "Start capturing sensor messages");
        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to broker");
                        if let Err(e) = self.cli.try_subscribe(self.topic.as_str(), QoS::AtLeastOnce) {
                            error!("Failed subscribing {}: {}", self.topic, e);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !Self::on_sensor_message(&sender, publish) {
                            error!("Ingestion stopped, ending MQTT loop");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!(topic = %self.topic, "Subscribed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        if self.cli.try_disconnect().is_ok() {
            // let the event loop flush the disconnect packet
            let _ = tokio::time::timeout(Duration::from_secs(1), eventloop.poll()).await;
        }
        info!("Disconnected from broker");
    }

    /// Hands a publish over to ingestion, false once nobody is listening
    fn on_sensor_message(sender: &MqttSender, publish: Publish) -> bool {
        debug!(topic = %publish.topic, bytes = publish.payload.len(), "Received message");
        let msg = SensorMessage {
            span: info_span!("mqtt_message_received"),
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        };
        sender.send(msg).is_ok()
    }
}
