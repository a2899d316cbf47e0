//! Battery storage telemetry bridge
//!
//! Polls a home battery over two channels, integrates power into energy totals,
//! derives efficiency and autonomy metrics, and publishes everything to a
//! telemetry sink such as MQTT.

pub mod catalog;
pub mod config;
pub mod derived;
pub mod device;
pub mod errors;
pub mod flatten;
pub mod integrator;
pub mod mqtt;
pub mod pipeline;
pub mod poll;
pub mod scheduler;
pub mod sink;
pub mod store;

pub use catalog::{Channel, QuantityDescriptor, CATALOG};
pub use config::Config;
pub use derived::DerivedMetricsEngine;
pub use device::{DeviceClient, ReplayClient};
pub use flatten::{FieldValue, FlatMap, Flatten};
pub use integrator::EnergyIntegrator;
pub use mqtt::MqttPublisher;
pub use pipeline::{Pipeline, PipelineSettings};
pub use poll::{PollingCoordinator, Snapshot};
pub use sink::{LogSink, TelemetrySink};
pub use store::{JsonFileStore, MemoryStore, StateStore};
