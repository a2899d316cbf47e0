use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::catalog::CATALOG;
use crate::config::MqttConfig;
use crate::errors::MqttError;
use crate::flatten::FieldValue;
use crate::mqtt::context::PublishContext;
use crate::sink::{Attributes, TelemetrySink};

/// Requests queued for the event loop before publications are dropped
pub const REQUEST_QUEUE_CAPACITY: usize = 10;

/// Pause before the event loop reconnects after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct MqttPublisher {
    client: Client,
    root_topic: String,
}

impl MqttPublisher {
    pub fn new(config: &MqttConfig) -> Result<Self, MqttError> {
        let client_id = format!("varta-telemetry-{}", config.device_id);

        info!("Using MQTT TCP connection: {}:{}", config.host, config.port);
        let mut mqtt_options = MqttOptions::new(client_id, &config.host, config.port);

        if !config.username.is_empty() {
            mqtt_options.set_credentials(&config.username, &config.password);
        }

        mqtt_options.set_keep_alive(Duration::from_secs(60));

        let root_topic = format!("{}/{}", config.root, config.device_id);

        // Broker marks the device offline if we vanish
        mqtt_options.set_last_will(rumqttc::LastWill {
            topic: format!("{}/online", root_topic),
            message: b"false".to_vec().into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let (client, mut connection) = Client::new(mqtt_options, REQUEST_QUEUE_CAPACITY);

        thread::Builder::new()
            .name("mqtt-event-loop".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT connected");
                        }
                        Ok(_) => {}
                        Err(rumqttc::ConnectionError::RequestsDone) => break,
                        Err(e) => {
                            // The next iteration reconnects; publications made meanwhile are
                            // dropped once the queue is full.
                            error!("MQTT connection error: {:?}", e);
                            thread::sleep(RECONNECT_DELAY);
                        }
                    }
                }
                debug!("MQTT event loop finished");
            })
            .map_err(|e| MqttError::ClientError(e.to_string()))?;

        Ok(Self { client, root_topic })
    }

    pub fn context(&'_ self, topic: &str) -> PublishContext<'_> {
        let full_topic = if topic.is_empty() {
            self.root_topic.clone()
        } else {
            format!("{}/{}", self.root_topic, topic)
        };
        PublishContext::new(&self.client, full_topic)
    }

    pub fn publish_online_status(&self, online: bool) -> Result<(), MqttError> {
        self.context("").publish("online", &online)
    }

    /// Publishes the descriptor of every quantity as one JSON array.
    pub fn publish_catalog(&self) -> Result<(), MqttError> {
        let json = serde_json::to_string(CATALOG).map_err(|error| MqttError::SerializationError { error })?;
        self.context("").publish("catalog", &json)
    }

    /// Marks the device offline and closes the connection.
    pub fn shutdown(&self) -> Result<(), MqttError> {
        self.publish_online_status(false)?;
        self.client
            .try_disconnect()
            .map_err(|e| MqttError::ClientError(e.to_string()))
    }
}

impl TelemetrySink for MqttPublisher {
    fn publish(&self, key: &str, value: Option<&FieldValue>, _timestamp: DateTime<Utc>) {
        if let Err(e) = self.context("").publish(key, &value.cloned()) {
            warn!("{}", e);
        }
    }

    fn publish_attributes(&self, key: &str, attributes: &Attributes) {
        let result = serde_json::to_string(attributes)
            .map_err(|error| MqttError::SerializationError { error })
            .and_then(|json| self.context(key).publish("attributes", &json));
        if let Err(e) = result {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;

    fn unreachable_broker() -> MqttConfig {
        MqttConfig {
            root: "varta".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            username: String::new(),
            password: String::new(),
            device_id: "battery".to_string(),
        }
    }

    #[test]
    fn test_publish_returns_when_queue_is_full() {
        let publisher = Arc::new(MqttPublisher::new(&unreachable_broker()).unwrap());

        let (done_tx, done_rx) = mpsc::channel();
        let worker = Arc::clone(&publisher);
        thread::spawn(move || {
            for i in 0..REQUEST_QUEUE_CAPACITY * 3 {
                worker.publish("soc", Some(&FieldValue::Number(i as f64)), Utc::now());
            }
            let attributes = Attributes::from([("last_reset_date".to_string(), "2024-03-01".to_string())]);
            worker.publish_attributes("dailyNetGridImport", &attributes);
            let _ = done_tx.send(());
        });

        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());

        // The queue is full; shutdown reports that instead of hanging.
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = shutdown_tx.send(publisher.shutdown().is_ok());
        });
        assert!(shutdown_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
