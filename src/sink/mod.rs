//! Telemetry output
//!
//! Sinks are fire-and-forget: a failed publication is logged by the sink and
//! never reaches the component that produced the value.

pub mod raw;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::flatten::FieldValue;

pub use raw::RawPublisher;

/// Attribute map attached to a quantity, e.g. a daily reset date
pub type Attributes = BTreeMap<String, String>;

pub trait TelemetrySink: Send + Sync {
    /// Publishes a value; `None` marks the quantity unavailable.
    fn publish(&self, key: &str, value: Option<&FieldValue>, timestamp: DateTime<Utc>);

    fn publish_attributes(&self, key: &str, attributes: &Attributes);
}

/// Sink writing every reading to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&self, key: &str, value: Option<&FieldValue>, timestamp: DateTime<Utc>) {
        match value {
            Some(value) => info!("{} = {} @ {}", key, value, timestamp.to_rfc3339()),
            None => info!("{} unavailable @ {}", key, timestamp.to_rfc3339()),
        }
    }

    fn publish_attributes(&self, key: &str, attributes: &Attributes) {
        info!("{} attributes {:?}", key, attributes);
    }
}
