//! Derived metrics
//!
//! The [`DerivedMetricsEngine`] recomputes every derived quantity from the latest
//! snapshots of both channels on its own timer. Metrics fail independently: an
//! error in one publishes it as unavailable and leaves the others untouched.
//!
//! The daily totals are the catalog's non-decreasing derived rows; each sums the
//! increases of the counter named by its `source_field`.
//!
//! Self-sufficiency and self-consumption only use the battery and grid
//! counters; direct PV self-use is not part of either formula.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::fields::*;
use crate::catalog::{self, round, Channel, QuantityDescriptor};
use crate::errors::{ComputeError, RestoreFailed};
use crate::flatten::FieldValue;
use crate::poll::{PollingCoordinator, Snapshot};
use crate::scheduler::Ticker;
use crate::sink::TelemetrySink;
use crate::store::StateStore;

/// Attribute carrying a daily accumulator's reset date
pub const LAST_RESET_DATE: &str = "last_reset_date";

/// Decimal places of the published daily totals
const DAILY_DECIMALS: i32 = 3;

/// Running sum of a cumulative counter's increases within one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAccumulator {
    pub reset_date: NaiveDate,
    pub accumulated_value: f64,
    pub last_counter_value: Option<f64>,
}

impl DailyAccumulator {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            reset_date: today,
            accumulated_value: 0.0,
            last_counter_value: None,
        }
    }

    /// Starts a new day if `today` differs from the reset date.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.reset_date == today {
            return false;
        }
        *self = Self::new(today);
        true
    }

    /// Applies the day boundary, then one counter reading, and returns the
    /// running value. A decreasing counter contributes nothing; the reading
    /// still becomes the new baseline.
    pub fn observe(&mut self, today: NaiveDate, counter: Option<f64>) -> f64 {
        self.roll_over(today);

        if let Some(counter) = counter {
            if let Some(last) = self.last_counter_value {
                let delta = counter - last;
                if delta > 0.0 {
                    self.accumulated_value += delta;
                } else if delta < 0.0 {
                    debug!("Counter went from {} to {}, treating as reset", last, counter);
                }
            }
            self.last_counter_value = Some(counter);
        }

        self.accumulated_value
    }
}

fn restore_accumulator(key: &str, persisted: Option<String>) -> Result<Option<DailyAccumulator>, RestoreFailed> {
    let Some(raw) = persisted else {
        return Ok(None);
    };
    serde_json::from_str(&raw).map(Some).map_err(|e| RestoreFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

struct DailyTracker {
    key: &'static str,
    counter_field: &'static str,
    accumulator: Option<DailyAccumulator>,
}

impl DailyTracker {
    fn restore(descriptor: &'static QuantityDescriptor, store: &dyn StateStore) -> Self {
        let key = descriptor.key;
        let accumulator = match restore_accumulator(key, store.restore(key)) {
            Ok(accumulator) => accumulator,
            Err(e) => {
                warn!("{}, starting a fresh day", e);
                None
            }
        };
        Self {
            key,
            counter_field: descriptor.source_field,
            accumulator,
        }
    }

    fn observe(&mut self, today: NaiveDate, secondary: Option<&Snapshot>) -> &DailyAccumulator {
        let counter = secondary.and_then(|s| s.get(self.counter_field)).and_then(FieldValue::as_f64);
        let accumulator = self.accumulator.get_or_insert_with(|| DailyAccumulator::new(today));
        accumulator.observe(today, counter);
        accumulator
    }
}

fn require(snapshot: Option<&Snapshot>, channel: Channel) -> Result<&Snapshot, ComputeError> {
    snapshot.ok_or(ComputeError::NoSnapshot(channel))
}

/// Discharged over charged energy in percent, capped at 100.
pub fn battery_efficiency(secondary: &Snapshot) -> Result<f64, ComputeError> {
    let charged = secondary.number(TOTAL_BATTERY_CHARGED)?;
    let discharged = secondary.number(TOTAL_BATTERY_DISCHARGED)?;
    if charged == 0.0 {
        return Err(ComputeError::DivisionByZero(TOTAL_BATTERY_CHARGED));
    }
    Ok((discharged / charged * 100.0).min(100.0))
}

/// Share of consumption covered by the battery, in percent.
pub fn self_sufficiency(secondary: &Snapshot) -> Result<f64, ComputeError> {
    let grid_import = secondary.number_or_zero(TOTAL_GRID_IMPORT)?;
    let battery_discharge = secondary.number_or_zero(TOTAL_BATTERY_DISCHARGED)?;
    let consumption = grid_import + battery_discharge;
    if consumption == 0.0 {
        return Ok(100.0);
    }
    Ok((battery_discharge / consumption * 100.0).clamp(0.0, 100.0))
}

/// Share of generation used locally, in percent.
pub fn self_consumption(secondary: &Snapshot) -> Result<f64, ComputeError> {
    let grid_export = secondary.number_or_zero(TOTAL_GRID_EXPORT)?;
    let battery_charge = secondary.number_or_zero(TOTAL_BATTERY_CHARGED)?;
    let generation = grid_export + battery_charge;
    if generation == 0.0 {
        return Ok(100.0);
    }
    Ok(((generation - grid_export) / generation * 100.0).clamp(0.0, 100.0))
}

/// Energy left in the battery (Wh).
pub fn available_energy(primary: &Snapshot) -> Result<f64, ComputeError> {
    let soc = primary.number(SOC)?;
    let capacity = primary.number(INSTALLED_CAPACITY)?;
    Ok(soc * capacity / 100.0)
}

/// Minutes until empty at the current discharge power.
pub fn time_to_empty(primary: &Snapshot) -> Result<f64, ComputeError> {
    let available = available_energy(primary)?;
    let discharge_power = primary.number(DISCHARGE_POWER)?;
    if discharge_power <= 0.0 {
        return Err(ComputeError::NotPositive(DISCHARGE_POWER));
    }
    Ok(available / discharge_power * 60.0)
}

/// Minutes until full at the current charge power.
pub fn time_to_full(primary: &Snapshot) -> Result<f64, ComputeError> {
    let soc = primary.number(SOC)?;
    let capacity = primary.number(INSTALLED_CAPACITY)?;
    let charge_power = primary.number(CHARGE_POWER)?;
    if charge_power <= 0.0 {
        return Err(ComputeError::NotPositive(CHARGE_POWER));
    }
    let remaining = capacity * (100.0 - soc) / 100.0;
    Ok(remaining / charge_power * 60.0)
}

/// Absolute power moving through the battery (W).
pub fn total_power_flow(primary: &Snapshot) -> Result<f64, ComputeError> {
    let charge = primary.number_or_zero(CHARGE_POWER)?;
    let discharge = primary.number_or_zero(DISCHARGE_POWER)?;
    Ok(charge.abs() + discharge.abs())
}

pub struct DerivedMetricsEngine {
    primary: Arc<PollingCoordinator>,
    secondary: Option<Arc<PollingCoordinator>>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn TelemetrySink>,
    daily: Mutex<Vec<DailyTracker>>,
    ticker: Mutex<Option<Ticker>>,
}

impl DerivedMetricsEngine {
    /// Creates the engine and restores the daily accumulators.
    pub fn new(
        primary: Arc<PollingCoordinator>,
        secondary: Option<Arc<PollingCoordinator>>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Arc<Self> {
        let daily = catalog::daily_totals()
            .map(|descriptor| DailyTracker::restore(descriptor, store.as_ref()))
            .collect();

        Arc::new(Self {
            primary,
            secondary,
            store,
            sink,
            daily: Mutex::new(daily),
            ticker: Mutex::new(None),
        })
    }

    /// Current state of a daily accumulator, if it has been created.
    pub fn daily_accumulator(&self, key: &str) -> Option<DailyAccumulator> {
        let daily = self.daily.lock().ok()?;
        daily.iter().find(|t| t.key == key)?.accumulator.clone()
    }

    /// Recomputes and publishes every derived metric.
    pub fn on_tick(&self, now: DateTime<Local>) {
        let timestamp = now.with_timezone(&Utc);
        let primary = self.primary.current_snapshot();
        let secondary = self.secondary.as_ref().and_then(|c| c.current_snapshot());
        let primary = primary.as_deref();
        let secondary = secondary.as_deref();

        self.update_daily(now.date_naive(), secondary, timestamp);

        let metrics = [
            (
                catalog::BATTERY_EFFICIENCY,
                require(secondary, Channel::Secondary).and_then(battery_efficiency),
            ),
            (
                catalog::SELF_SUFFICIENCY_RATE,
                require(secondary, Channel::Secondary).and_then(self_sufficiency),
            ),
            (
                catalog::SELF_CONSUMPTION_RATE,
                require(secondary, Channel::Secondary).and_then(self_consumption),
            ),
            (
                catalog::AVAILABLE_ENERGY,
                require(primary, Channel::Primary).and_then(available_energy),
            ),
            (
                catalog::TIME_TO_EMPTY,
                require(primary, Channel::Primary).and_then(time_to_empty),
            ),
            (
                catalog::TIME_TO_FULL,
                require(primary, Channel::Primary).and_then(time_to_full),
            ),
            (
                catalog::TOTAL_POWER_FLOW,
                require(primary, Channel::Primary).and_then(total_power_flow),
            ),
        ];

        for (key, result) in metrics {
            match result {
                Ok(value) => self.sink.publish(key, Some(&FieldValue::Number(value)), timestamp),
                Err(e) => {
                    debug!("Error calculating {}: {}", key, e);
                    self.sink.publish(key, None, timestamp);
                }
            }
        }
    }

    fn update_daily(&self, today: NaiveDate, secondary: Option<&Snapshot>, timestamp: DateTime<Utc>) {
        let Ok(mut daily) = self.daily.lock() else {
            return;
        };
        for tracker in daily.iter_mut() {
            let key = tracker.key;
            let accumulator = tracker.observe(today, secondary);

            let value = FieldValue::Number(round(accumulator.accumulated_value, DAILY_DECIMALS));
            self.sink.publish(key, Some(&value), timestamp);

            let attributes = BTreeMap::from([(LAST_RESET_DATE.to_string(), accumulator.reset_date.to_string())]);
            self.sink.publish_attributes(key, &attributes);

            match serde_json::to_string(accumulator) {
                Ok(json) => {
                    if let Err(e) = self.store.persist(key, json) {
                        warn!("Failed to persist {}: {}", key, e);
                    }
                }
                Err(e) => warn!("Failed to serialize {}: {}", key, e),
            }
        }
    }

    /// Ticks once immediately, then every `interval`.
    pub fn start(self: &Arc<Self>, interval: Duration) -> std::io::Result<()> {
        self.on_tick(Local::now());

        let weak: Weak<Self> = Arc::downgrade(self);
        let ticker = Ticker::spawn("derived-metrics", interval, move |now| {
            if let Some(engine) = weak.upgrade() {
                engine.on_tick(now.with_timezone(&Local));
            }
        })?;
        if let Ok(mut slot) = self.ticker.lock() {
            *slot = Some(ticker);
        }
        info!("Computing derived metrics every {:?}", interval);
        Ok(())
    }

    /// Stops the timer, then persists both daily accumulators.
    pub fn stop(&self) {
        let ticker = self.ticker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut ticker) = ticker {
            ticker.stop();
        }

        let Ok(daily) = self.daily.lock() else {
            return;
        };
        for tracker in daily.iter() {
            let Some(accumulator) = &tracker.accumulator else {
                continue;
            };
            let persisted = serde_json::to_string(accumulator)
                .map_err(Into::into)
                .and_then(|json| self.store.persist(tracker.key, json));
            if let Err(e) = persisted {
                warn!("Failed to persist {}: {}", tracker.key, e);
            }
        }
    }
}
