//! Publication of raw readings straight from a channel's snapshot

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::catalog::{self, Channel, QuantityDescriptor, Transform};
use crate::flatten::FieldValue;
use crate::poll::{PollingCoordinator, Snapshot};
use crate::sink::TelemetrySink;

/// Applies a descriptor's presentation transform to a reading.
pub fn present(descriptor: &QuantityDescriptor, value: &FieldValue) -> FieldValue {
    match (descriptor.transform, value) {
        (Transform::None, _) => value.clone(),
        (Transform::Absolute, FieldValue::Number(v)) => FieldValue::Number(v.abs()),
        (Transform::Absolute, FieldValue::Text(_)) => value.clone(),
        (Transform::StateText, _) => FieldValue::Text(code_text(value, catalog::state_text, "Unknown State")),
        (Transform::ErrorText, _) => FieldValue::Text(code_text(value, catalog::error_text, "Unknown Error")),
    }
}

fn code_text(value: &FieldValue, text: fn(i64) -> String, unknown: &str) -> String {
    let code = match value {
        FieldValue::Number(v) if v.fract() == 0.0 => Some(*v as i64),
        FieldValue::Number(_) => None,
        FieldValue::Text(t) => t.trim().parse::<i64>().ok(),
    };
    match code {
        Some(code) => text(code),
        None => format!("{} ({})", unknown, value),
    }
}

/// Publishes every raw catalog quantity of one channel when its snapshot
/// changes. Each quantity is only republished when its value changed.
pub struct RawPublisher {
    channel: Channel,
    sink: Arc<dyn TelemetrySink>,
    last: Mutex<BTreeMap<&'static str, Option<FieldValue>>>,
}

impl RawPublisher {
    pub fn new(channel: Channel, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            channel,
            sink,
            last: Mutex::new(BTreeMap::new()),
        }
    }

    /// Subscribes to the coordinator's snapshots. Publishes the current snapshot
    /// right away if there is one.
    pub fn attach(self, coordinator: &PollingCoordinator) {
        let publisher = Arc::new(self);
        if let Some(snapshot) = coordinator.current_snapshot() {
            publisher.publish_snapshot(&snapshot);
        }
        coordinator.subscribe(move |snapshot| publisher.publish_snapshot(snapshot));
    }

    pub fn publish_snapshot(&self, snapshot: &Snapshot) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        let mut published = 0;
        for descriptor in catalog::raw_for(self.channel) {
            let value = snapshot.get(descriptor.source_field).map(|v| present(descriptor, v));
            if last.get(descriptor.key) == Some(&value) {
                continue;
            }
            self.sink.publish(descriptor.key, value.as_ref(), snapshot.captured_at);
            last.insert(descriptor.key, value);
            published += 1;
        }
        debug!("Published {} changed {} readings", published, self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::FlatMap;
    use crate::sink::Attributes;
    use chrono::{DateTime, Utc};

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, Option<FieldValue>)>>,
    }

    impl TelemetrySink for Recorder {
        fn publish(&self, key: &str, value: Option<&FieldValue>, _timestamp: DateTime<Utc>) {
            self.published.lock().unwrap().push((key.to_string(), value.cloned()));
        }

        fn publish_attributes(&self, _key: &str, _attributes: &Attributes) {}
    }

    fn snapshot(pairs: &[(&str, FieldValue)]) -> Snapshot {
        let fields: FlatMap = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        Snapshot::new(fields, Utc::now())
    }

    fn value_of(recorder: &Recorder, key: &str) -> Option<Option<FieldValue>> {
        recorder
            .published
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    #[test]
    fn test_transforms() {
        let apparent = catalog::find("powerApparent").unwrap();
        assert_eq!(present(apparent, &FieldValue::Number(-1250.0)), FieldValue::Number(1250.0));

        let state = catalog::find("stateTextDerived").unwrap();
        assert_eq!(present(state, &FieldValue::Number(2.0)), FieldValue::from("Charge"));
        assert_eq!(present(state, &FieldValue::from("x")), FieldValue::from("Unknown State (x)"));

        let error = catalog::find("errorText").unwrap();
        assert_eq!(present(error, &FieldValue::Number(0.0)), FieldValue::from("No Error"));
        assert_eq!(present(error, &FieldValue::Number(77.0)), FieldValue::from("Unknown Error (77)"));

        let soc = catalog::find("stateOfCharge").unwrap();
        assert_eq!(present(soc, &FieldValue::Number(55.5)), FieldValue::Number(55.5));
    }

    #[test]
    fn test_publishes_only_changes() {
        let recorder = Arc::new(Recorder::default());
        let publisher = RawPublisher::new(Channel::Primary, recorder.clone());

        publisher.publish_snapshot(&snapshot(&[("soc", FieldValue::Number(50.0))]));
        let first_round = recorder.published.lock().unwrap().len();
        assert_eq!(first_round, catalog::raw_for(Channel::Primary).count());
        assert_eq!(value_of(&recorder, "stateOfCharge"), Some(Some(FieldValue::Number(50.0))));
        assert_eq!(value_of(&recorder, "gridPower"), Some(None));

        publisher.publish_snapshot(&snapshot(&[("soc", FieldValue::Number(50.0))]));
        assert_eq!(recorder.published.lock().unwrap().len(), first_round);

        publisher.publish_snapshot(&snapshot(&[("soc", FieldValue::Number(51.0))]));
        assert_eq!(recorder.published.lock().unwrap().len(), first_round + 1);
        assert_eq!(value_of(&recorder, "stateOfCharge"), Some(Some(FieldValue::Number(51.0))));
    }

    #[test]
    fn test_shared_source_field_feeds_every_descriptor() {
        let recorder = Arc::new(Recorder::default());
        let publisher = RawPublisher::new(Channel::Primary, recorder.clone());

        publisher.publish_snapshot(&snapshot(&[("error_code", FieldValue::Number(4.0))]));

        assert_eq!(value_of(&recorder, "errorCode"), Some(Some(FieldValue::Number(4.0))));
        assert_eq!(value_of(&recorder, "errorText"), Some(Some(FieldValue::from("Grid Error"))));
    }
}
