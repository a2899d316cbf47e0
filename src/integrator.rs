//! Power to energy integration
//!
//! An [`EnergyIntegrator`] samples one power field (W) from its channel's
//! snapshot on its own timer and accumulates energy (kWh) with the trapezoidal
//! rule. Only the accumulated total is persisted; after a restart the first
//! sample only re-establishes the baseline, so downtime is never integrated.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::catalog::{round, QuantityDescriptor};
use crate::errors::RestoreFailed;
use crate::flatten::FieldValue;
use crate::poll::PollingCoordinator;
use crate::scheduler::Ticker;
use crate::sink::TelemetrySink;
use crate::store::StateStore;

/// Longest sample gap that is still integrated
pub const MAX_SAMPLE_GAP: StdDuration = StdDuration::from_secs(3600);

/// Decimal places of the published total
const PUBLISH_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub power: f64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegratorState {
    /// kWh, never decreases except through [`IntegratorState::reset`]
    pub accumulated_energy: f64,
    pub last_sample: Option<Sample>,
}

impl IntegratorState {
    pub fn with_energy(accumulated_energy: f64) -> Self {
        Self {
            accumulated_energy,
            last_sample: None,
        }
    }

    /// Records a power sample and returns the energy it added (kWh).
    ///
    /// The sign of the reading is ignored. Nothing is added for the first
    /// sample, for a non-positive elapsed time, or for a gap longer than
    /// [`MAX_SAMPLE_GAP`]; the sample still becomes the new baseline.
    pub fn add_sample(&mut self, power: f64, time: DateTime<Utc>) -> f64 {
        let power = power.abs();
        let mut increment = 0.0;

        if let Some(previous) = self.last_sample {
            let elapsed = time - previous.time;
            match elapsed.to_std() {
                Ok(gap) if !gap.is_zero() && gap <= MAX_SAMPLE_GAP => {
                    let hours = gap.as_secs_f64() / 3600.0;
                    // W·h -> kWh
                    increment = (power + previous.power) / 2.0 * hours / 1000.0;
                    self.accumulated_energy += increment;
                }
                _ => debug!("Not integrating across {} gap", elapsed),
            }
        }

        self.last_sample = Some(Sample { power, time });
        increment
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Parses a persisted total. Anything but a finite non-negative number fails.
pub fn parse_energy(key: &str, persisted: Option<String>) -> Result<f64, RestoreFailed> {
    let raw = persisted.ok_or_else(|| RestoreFailed {
        key: key.to_string(),
        reason: "no persisted value".to_string(),
    })?;
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        Ok(value) => Err(RestoreFailed {
            key: key.to_string(),
            reason: format!("invalid energy {}", value),
        }),
        Err(e) => Err(RestoreFailed {
            key: key.to_string(),
            reason: format!("'{}' is not numeric: {}", raw, e),
        }),
    }
}

pub struct EnergyIntegrator {
    descriptor: &'static QuantityDescriptor,
    source: Arc<PollingCoordinator>,
    store: Arc<dyn StateStore>,
    sink: Arc<dyn TelemetrySink>,
    state: Mutex<IntegratorState>,
    ticker: Mutex<Option<Ticker>>,
}

impl EnergyIntegrator {
    /// Creates the integrator and restores its total from the store.
    pub fn new(
        descriptor: &'static QuantityDescriptor,
        source: Arc<PollingCoordinator>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Arc<Self> {
        let energy = match parse_energy(descriptor.key, store.restore(descriptor.key)) {
            Ok(energy) => {
                debug!("Restored {} = {} kWh", descriptor.key, energy);
                energy
            }
            Err(e) => {
                warn!("{}, starting from 0", e);
                0.0
            }
        };

        Arc::new(Self {
            descriptor,
            source,
            store,
            sink,
            state: Mutex::new(IntegratorState::with_energy(energy)),
            ticker: Mutex::new(None),
        })
    }

    pub fn key(&self) -> &'static str {
        self.descriptor.key
    }

    pub fn accumulated_energy(&self) -> f64 {
        self.state.lock().map(|s| s.accumulated_energy).unwrap_or(0.0)
    }

    pub fn state(&self) -> IntegratorState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Integrates the current power reading. Without a snapshot or a numeric
    /// reading the tick does nothing.
    pub fn on_tick(&self, now: DateTime<Utc>) {
        let Some(snapshot) = self.source.current_snapshot() else {
            return;
        };
        let power = match snapshot.get(self.descriptor.source_field) {
            Some(FieldValue::Number(power)) => *power,
            Some(other) => {
                debug!("{}: ignoring non-numeric power {:?}", self.descriptor.key, other);
                return;
            }
            None => return,
        };

        let energy = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.add_sample(power, now);
            state.accumulated_energy
        };

        self.persist(energy);
        let published = FieldValue::Number(round(energy, PUBLISH_DECIMALS));
        self.sink.publish(self.descriptor.key, Some(&published), now);
    }

    /// Clears the total and the baseline sample.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.reset();
        }
        info!("Reset {}", self.descriptor.key);
        self.persist(0.0);
    }

    fn persist(&self, energy: f64) {
        if let Err(e) = self.store.persist(self.descriptor.key, energy.to_string()) {
            warn!("Failed to persist {}: {}", self.descriptor.key, e);
        }
    }

    /// Ticks once immediately, then every `interval`.
    pub fn start(self: &Arc<Self>, interval: StdDuration) -> std::io::Result<()> {
        self.on_tick(Utc::now());

        let weak: Weak<Self> = Arc::downgrade(self);
        let ticker = Ticker::spawn(format!("integrate-{}", self.descriptor.key), interval, move |now| {
            if let Some(integrator) = weak.upgrade() {
                integrator.on_tick(now);
            }
        })?;
        if let Ok(mut slot) = self.ticker.lock() {
            *slot = Some(ticker);
        }
        Ok(())
    }

    /// Stops the timer, then persists the latest total.
    pub fn stop(&self) {
        let ticker = self.ticker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut ticker) = ticker {
            ticker.stop();
        }
        self.persist(self.accumulated_energy());
    }
}
