pub mod context;
pub mod publisher;

pub use context::{MqttPayload, PublishContext};
pub use publisher::MqttPublisher;
