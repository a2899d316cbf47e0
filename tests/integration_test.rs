//! Integration tests for varta-telemetry
//!
//! These tests run the assembled pipeline against scripted device replies
//! without requiring actual battery hardware or an MQTT broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use approx::assert_relative_eq;
use chrono::{DateTime, Utc};

use varta_telemetry::catalog::{self, Channel};
use varta_telemetry::config::MqttConfig;
use varta_telemetry::device::{BatteryStatus, EnergyData, PowerReadings, PrimaryReply, SecondaryReply};
use varta_telemetry::errors::{FetchError, PipelineError};
use varta_telemetry::mqtt::context::{MqttPayload, UNAVAILABLE};
use varta_telemetry::sink::Attributes;
use varta_telemetry::{
    DeviceClient, FieldValue, JsonFileStore, MemoryStore, Pipeline, PipelineSettings, ReplayClient, StateStore,
    TelemetrySink,
};

struct ScriptedClient {
    primary: PrimaryReply,
    secondary: SecondaryReply,
    primary_down: AtomicBool,
}

impl ScriptedClient {
    fn new() -> Self {
        Self {
            primary: PrimaryReply {
                battery: BatteryStatus {
                    soc: Some(64.0),
                    state: Some(2),
                    error_code: Some(0),
                    installed_capacity: Some(6500.0),
                    ..Default::default()
                },
                power: PowerReadings {
                    to_grid_power: Some(0.0),
                    from_grid_power: Some(0.0),
                    apparent_power: Some(-1250.0),
                    charge_power: Some(1200.0),
                    discharge_power: Some(0.0),
                    ..Default::default()
                },
                ..Default::default()
            },
            secondary: SecondaryReply {
                energy: EnergyData {
                    total_grid_ac_dc: Some(300.0),
                    total_grid_dc_ac: Some(150.0),
                    total_inverter_ac_dc: Some(100.0),
                    total_inverter_dc_ac: Some(90.0),
                    total_charge_cycles: None,
                },
                ..Default::default()
            },
            primary_down: AtomicBool::new(false),
        }
    }
}

impl DeviceClient for ScriptedClient {
    fn fetch_primary(&self) -> anyhow::Result<PrimaryReply> {
        if self.primary_down.load(Ordering::SeqCst) {
            return Err(anyhow!("register read failed"));
        }
        Ok(self.primary.clone())
    }

    fn fetch_secondary(&self) -> anyhow::Result<SecondaryReply> {
        Ok(self.secondary.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(String, Option<FieldValue>)>>,
    attributes: Mutex<Vec<(String, Attributes)>>,
}

impl RecordingSink {
    /// First value published for a key; later timer ticks may add more.
    fn first(&self, key: &str) -> Option<Option<FieldValue>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn first_number(&self, key: &str) -> f64 {
        match self.first(key) {
            Some(Some(FieldValue::Number(v))) => v,
            other => panic!("{} has no numeric value: {:?}", key, other),
        }
    }
}

impl TelemetrySink for RecordingSink {
    fn publish(&self, key: &str, value: Option<&FieldValue>, _timestamp: DateTime<Utc>) {
        self.published.lock().unwrap().push((key.to_string(), value.cloned()));
    }

    fn publish_attributes(&self, key: &str, attributes: &Attributes) {
        self.attributes.lock().unwrap().push((key.to_string(), attributes.clone()));
    }
}

/// Timers far enough apart that only the start-up ticks matter
fn quiet_settings() -> PipelineSettings {
    let day = Duration::from_secs(86_400);
    PipelineSettings {
        primary_interval: day,
        secondary_interval: day,
        integration_interval: day,
        derived_interval: day,
        ..PipelineSettings::default()
    }
}

#[test]
fn test_pipeline_publishes_all_quantity_kinds() {
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(MemoryStore::new());

    let pipeline = Pipeline::start(
        Arc::new(ScriptedClient::new()),
        store.clone(),
        sink.clone(),
        &quiet_settings(),
    )
    .unwrap();

    // Raw readings with their transforms
    assert_eq!(sink.first_number("stateOfCharge"), 64.0);
    assert_eq!(sink.first_number("powerApparent"), 1250.0);
    assert_eq!(sink.first("stateTextDerived"), Some(Some(FieldValue::from("Charge"))));

    // Integrated energies start from zero
    assert_eq!(pipeline.integrators().len(), 4);
    assert_eq!(sink.first_number("energyCharged"), 0.0);

    // Derived metrics
    assert_eq!(sink.first_number(catalog::AVAILABLE_ENERGY), 4160.0);
    assert_eq!(sink.first_number(catalog::TOTAL_POWER_FLOW), 1200.0);
    assert_relative_eq!(sink.first_number(catalog::BATTERY_EFFICIENCY), 90.0);
    assert_eq!(sink.first(catalog::TIME_TO_EMPTY), Some(None));
    assert_relative_eq!(sink.first_number(catalog::TIME_TO_FULL), 117.0);
    assert_eq!(sink.first_number(catalog::DAILY_NET_GRID_IMPORT), 0.0);

    let attributes = sink.attributes.lock().unwrap().clone();
    assert!(attributes
        .iter()
        .any(|(key, attrs)| key == catalog::DAILY_NET_GRID_EXPORT && attrs.contains_key("last_reset_date")));

    pipeline.stop();
    assert!(!pipeline.primary().is_running());

    let persisted = store.snapshot();
    assert!(persisted.contains_key("energyCharged"));
    assert!(persisted[catalog::DAILY_NET_GRID_IMPORT].contains("reset_date"));
}

#[test]
fn test_primary_failure_at_startup_is_fatal() {
    let client = ScriptedClient::new();
    client.primary_down.store(true, Ordering::SeqCst);

    let result = Pipeline::start(
        Arc::new(client),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingSink::default()),
        &quiet_settings(),
    );

    match result {
        Err(PipelineError::Fetch(FetchError::Failed { channel, reason })) => {
            assert_eq!(channel, Channel::Primary);
            assert!(reason.contains("register read failed"));
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("pipeline started without a primary snapshot"),
    }
}

#[test]
fn test_disabled_secondary_leaves_dependent_metrics_unavailable() {
    let sink = Arc::new(RecordingSink::default());
    let settings = PipelineSettings {
        secondary_enabled: false,
        ..quiet_settings()
    };

    let pipeline = Pipeline::start(
        Arc::new(ScriptedClient::new()),
        Arc::new(MemoryStore::new()),
        sink.clone(),
        &settings,
    )
    .unwrap();

    assert!(pipeline.secondary().is_none());
    assert_eq!(sink.first(catalog::BATTERY_EFFICIENCY), Some(None));
    assert_eq!(sink.first(catalog::SELF_SUFFICIENCY_RATE), Some(None));
    assert_eq!(sink.first_number(catalog::AVAILABLE_ENERGY), 4160.0);
    assert_eq!(sink.first("cycleCounter"), None);
}

#[test]
fn test_restart_restores_energy_totals() {
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(MemoryStore::with_values([("energyCharged", "5.0"), ("energyToGrid", "garbage")]));

    let _pipeline = Pipeline::start(
        Arc::new(ScriptedClient::new()),
        store,
        sink.clone(),
        &quiet_settings(),
    )
    .unwrap();

    assert_eq!(sink.first_number("energyCharged"), 5.0);
    assert_eq!(sink.first_number("energyToGrid"), 0.0);
}

#[test]
fn test_replay_directory_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(ReplayClient::PRIMARY_FILE),
        r#"{"battery": {"soc": 40, "installed_capacity": 10000}, "power": {"discharge_power": 2000}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join(ReplayClient::SECONDARY_FILE),
        r#"{"energy": {"total_charge_cycles": [311, 0]}}"#,
    )
    .unwrap();
    let state_path = dir.path().join("state.json");

    let sink = Arc::new(RecordingSink::default());
    let pipeline = Pipeline::start(
        Arc::new(ReplayClient::new(dir.path())),
        Arc::new(JsonFileStore::open(&state_path)),
        sink.clone(),
        &quiet_settings(),
    )
    .unwrap();

    assert_eq!(sink.first_number("cycleCounter"), 311.0);
    assert_eq!(sink.first_number(catalog::TIME_TO_EMPTY), 120.0);
    drop(pipeline);

    let reopened = JsonFileStore::open(&state_path);
    assert!(reopened.restore("energyDischarged").is_some());
    assert!(reopened.restore(catalog::DAILY_NET_GRID_EXPORT).is_some());
}

#[test]
fn test_mqtt_config_debug_redacts_password() {
    let config = MqttConfig {
        root: "varta".to_string(),
        host: "mqtt.example.com".to_string(),
        port: 1883,
        username: "test-user".to_string(),
        password: "secret-password".to_string(),
        device_id: "battery".to_string(),
    };

    let debug_output = format!("{:?}", config);

    // Password should be redacted
    assert!(!debug_output.contains("secret-password"));
    assert!(debug_output.contains("***REDACTED***"));

    // Username should still be visible
    assert!(debug_output.contains("test-user"));
}

#[test]
fn test_mqtt_payload_formatting() {
    assert_eq!(FieldValue::Number(64.5).to_payload(), "64.5");
    assert_eq!(Some(FieldValue::from("Charge")).to_payload(), "Charge");
    assert_eq!(None::<FieldValue>.to_payload(), UNAVAILABLE);
    assert_eq!(true.to_payload(), "true");
}

#[test]
fn test_catalog_serializes_for_discovery() {
    let json = serde_json::to_value(catalog::CATALOG).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), catalog::CATALOG.len());

    let soc = entries.iter().find(|e| e["key"] == "stateOfCharge").unwrap();
    assert_eq!(soc["unit"], "%");
    assert_eq!(soc["channel"], "primary");
}
