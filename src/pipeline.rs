//! Assembly of the running telemetry pipeline
//!
//! Start order: blocking first refresh per channel, raw publishers, periodic
//! polling, integrators, derived metrics. Teardown runs the other way around and
//! ends with a store flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::{self, Channel, Kind};
use crate::config::Config;
use crate::derived::DerivedMetricsEngine;
use crate::device::DeviceClient;
use crate::errors::PipelineError;
use crate::integrator::EnergyIntegrator;
use crate::poll::PollingCoordinator;
use crate::sink::{RawPublisher, TelemetrySink};
use crate::store::StateStore;

/// Timers and channel switches of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub primary_interval: Duration,
    pub primary_timeout: Duration,
    pub secondary_enabled: bool,
    pub secondary_interval: Duration,
    pub secondary_timeout: Duration,
    pub integration_interval: Duration,
    pub derived_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            primary_interval: Duration::from_secs(3),
            primary_timeout: Duration::from_secs(10),
            secondary_enabled: true,
            secondary_interval: Duration::from_secs(10),
            secondary_timeout: Duration::from_secs(15),
            integration_interval: Duration::from_secs(60),
            derived_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            primary_interval: config.device.primary_interval,
            primary_timeout: config.device.primary_timeout,
            secondary_enabled: config.device.secondary_enabled,
            secondary_interval: config.device.secondary_interval,
            secondary_timeout: config.device.secondary_timeout,
            integration_interval: config.metrics.integration_interval,
            derived_interval: config.metrics.derived_interval,
        }
    }
}

fn timer_error(component: impl Into<String>) -> impl FnOnce(std::io::Error) -> PipelineError {
    let component = component.into();
    move |source| PipelineError::Timer { component, source }
}

pub struct Pipeline {
    primary: Arc<PollingCoordinator>,
    secondary: Option<Arc<PollingCoordinator>>,
    integrators: Vec<Arc<EnergyIntegrator>>,
    engine: Arc<DerivedMetricsEngine>,
    store: Arc<dyn StateStore>,
    stopped: AtomicBool,
}

impl Pipeline {
    /// Builds and starts every component.
    ///
    /// # Errors
    /// Fails if the first refresh of an enabled channel fails, or a timer thread
    /// cannot be spawned.
    pub fn start(
        client: Arc<dyn DeviceClient>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn TelemetrySink>,
        settings: &PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let primary = PollingCoordinator::primary(Arc::clone(&client), settings.primary_timeout);
        let snapshot = primary.force_refresh()?;
        info!("First primary snapshot has {} fields", snapshot.len());

        let secondary = if settings.secondary_enabled {
            let secondary = PollingCoordinator::secondary(Arc::clone(&client), settings.secondary_timeout);
            let snapshot = secondary.force_refresh()?;
            info!("First secondary snapshot has {} fields", snapshot.len());
            Some(secondary)
        } else {
            info!("Secondary channel disabled");
            None
        };

        RawPublisher::new(Channel::Primary, Arc::clone(&sink)).attach(&primary);
        primary
            .start(settings.primary_interval)
            .map_err(timer_error("primary poller"))?;
        if let Some(secondary) = &secondary {
            RawPublisher::new(Channel::Secondary, Arc::clone(&sink)).attach(secondary);
            secondary
                .start(settings.secondary_interval)
                .map_err(timer_error("secondary poller"))?;
        }

        let mut integrators = Vec::new();
        for descriptor in catalog::of_kind(Kind::Integrated) {
            let source = match descriptor.channel {
                Channel::Primary => Arc::clone(&primary),
                Channel::Secondary => match &secondary {
                    Some(secondary) => Arc::clone(secondary),
                    None => continue,
                },
            };
            let integrator = EnergyIntegrator::new(descriptor, source, Arc::clone(&store), Arc::clone(&sink));
            integrator
                .start(settings.integration_interval)
                .map_err(timer_error(descriptor.key))?;
            integrators.push(integrator);
        }
        info!("Integrating {} energy totals", integrators.len());

        let engine = DerivedMetricsEngine::new(
            Arc::clone(&primary),
            secondary.clone(),
            Arc::clone(&store),
            Arc::clone(&sink),
        );
        engine
            .start(settings.derived_interval)
            .map_err(timer_error("derived metrics"))?;

        Ok(Self {
            primary,
            secondary,
            integrators,
            engine,
            store,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn primary(&self) -> &Arc<PollingCoordinator> {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&Arc<PollingCoordinator>> {
        self.secondary.as_ref()
    }

    pub fn integrators(&self) -> &[Arc<EnergyIntegrator>] {
        &self.integrators
    }

    pub fn engine(&self) -> &Arc<DerivedMetricsEngine> {
        &self.engine
    }

    /// Stops every timer and flushes state. Later calls do nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.primary.stop();
        if let Some(secondary) = &self.secondary {
            secondary.stop();
        }
        for integrator in &self.integrators {
            integrator.stop();
        }
        self.engine.stop();

        if let Err(e) = self.store.flush() {
            warn!("Failed to flush state: {}", e);
        }
        info!("Pipeline stopped");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
