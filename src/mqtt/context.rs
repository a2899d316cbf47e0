use chrono::{DateTime, Utc};
use rumqttc::{Client, QoS};

use crate::errors::MqttError;
use crate::flatten::FieldValue;

/// Payload published for a quantity without a value
pub const UNAVAILABLE: &str = "unavailable";

pub trait MqttPayload {
    fn to_payload(&self) -> String;
}

impl MqttPayload for DateTime<Utc> {
    fn to_payload(&self) -> String {
        self.to_rfc3339()
    }
}

impl MqttPayload for FieldValue {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl<T: MqttPayload> MqttPayload for Option<T> {
    fn to_payload(&self) -> String {
        match self {
            Some(value) => value.to_payload(),
            None => UNAVAILABLE.to_string(),
        }
    }
}

impl MqttPayload for String {
    fn to_payload(&self) -> String {
        self.clone()
    }
}

impl MqttPayload for bool {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl MqttPayload for f64 {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

pub struct PublishContext<'a> {
    client: &'a Client,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> PublishContext<'a> {
    pub fn new(client: &'a Client, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    /// Queues a message without waiting. A full request queue (broker
    /// unreachable) fails the publication instead of blocking the caller.
    pub fn publish<T: MqttPayload + ?Sized>(&self, topic: &str, payload: &T) -> Result<(), MqttError> {
        let full_topic = format!("{}/{}", self.topic, topic);
        self.client
            .try_publish(&full_topic, self.qos, self.retain, payload.to_payload())
            .map_err(|e| MqttError::PublishFailed {
                topic: full_topic,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_payloads() {
        assert_eq!(FieldValue::Number(42.5).to_payload(), "42.5");
        assert_eq!(FieldValue::from("Charge").to_payload(), "Charge");
        assert_eq!(Some(FieldValue::Number(3.0)).to_payload(), "3");
        assert_eq!(None::<FieldValue>.to_payload(), UNAVAILABLE);
    }
}
