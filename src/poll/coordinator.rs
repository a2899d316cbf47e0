//! Polling coordinator
//!
//! Polls one channel on a fixed interval and caches the last successful
//! snapshot. Periodic failures are logged and absorbed; only
//! [`PollingCoordinator::force_refresh`] reports them to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::retry::attempt_with_retry;
use super::snapshot::Snapshot;
use crate::catalog::Channel;
use crate::device::DeviceClient;
use crate::errors::FetchError;
use crate::flatten::{FlatMap, Flatten};
use crate::scheduler::Ticker;

type FetchFn = Arc<dyn Fn() -> anyhow::Result<FlatMap> + Send + Sync>;

/// Callback invoked with every new snapshot
pub type Subscriber = Box<dyn Fn(&Snapshot) + Send + Sync>;

/// Marks a fetch as running until dropped.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Outcome {
    Updated(Arc<Snapshot>),
    Skipped,
    Discarded,
}

pub struct PollingCoordinator {
    channel: Channel,
    timeout: Duration,
    fetch: FetchFn,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    in_flight: Arc<AtomicBool>,
    stopped: AtomicBool,
    subscribers: RwLock<Vec<Subscriber>>,
    ticker: Mutex<Option<Ticker>>,
}

impl PollingCoordinator {
    /// Creates a coordinator around a fetch function returning any reply shape.
    ///
    /// The reply is flattened on the fetch worker, so a slow reply never holds up
    /// the caller beyond `timeout`.
    pub fn new<R, F>(channel: Channel, timeout: Duration, fetch: F) -> Arc<Self>
    where
        R: Flatten,
        F: Fn() -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Arc::new(Self {
            channel,
            timeout,
            fetch: Arc::new(move || fetch().map(|reply| reply.flatten())),
            snapshot: RwLock::new(None),
            in_flight: Arc::new(AtomicBool::new(false)),
            stopped: AtomicBool::new(false),
            subscribers: RwLock::new(Vec::new()),
            ticker: Mutex::new(None),
        })
    }

    pub fn primary(client: Arc<dyn DeviceClient>, timeout: Duration) -> Arc<Self> {
        Self::new(Channel::Primary, timeout, move || client.fetch_primary())
    }

    pub fn secondary(client: Arc<dyn DeviceClient>, timeout: Duration) -> Arc<Self> {
        Self::new(Channel::Secondary, timeout, move || client.fetch_secondary())
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Last successful snapshot, or `None` before the first success.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().ok().and_then(|s| s.clone())
    }

    /// Registers a callback for every new snapshot.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(Box::new(subscriber));
        }
    }

    /// Fetches once, blocking until the snapshot is updated or the fetch fails.
    pub fn force_refresh(&self) -> Result<Arc<Snapshot>, FetchError> {
        match self.refresh()? {
            Outcome::Updated(snapshot) => Ok(snapshot),
            Outcome::Skipped => Err(FetchError::Busy {
                channel: self.channel,
            }),
            Outcome::Discarded => Err(FetchError::Stopped {
                channel: self.channel,
            }),
        }
    }

    fn refresh(&self) -> Result<Outcome, FetchError> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(Outcome::Discarded);
        }
        let Some(guard) = InFlight::acquire(&self.in_flight) else {
            return Ok(Outcome::Skipped);
        };

        let fetch = Arc::clone(&self.fetch);
        let fields = attempt_with_retry(self.channel, self.timeout, move || {
            let _running = &guard;
            fetch()
        })?;

        if self.stopped.load(Ordering::Acquire) {
            debug!("Discarding {} reply received after shutdown", self.channel);
            return Ok(Outcome::Discarded);
        }

        let snapshot = Arc::new(Snapshot::new(fields, Utc::now()));
        if let Ok(mut current) = self.snapshot.write() {
            *current = Some(Arc::clone(&snapshot));
        }
        debug!("{} snapshot updated with {} fields", self.channel, snapshot.len());

        if let Ok(subscribers) = self.subscribers.read() {
            for subscriber in subscribers.iter() {
                subscriber(&snapshot);
            }
        }

        Ok(Outcome::Updated(snapshot))
    }

    /// One periodic poll; failures keep the previous snapshot.
    fn poll(&self) {
        match self.refresh() {
            Ok(Outcome::Updated(_)) | Ok(Outcome::Discarded) => {}
            Ok(Outcome::Skipped) => {
                debug!("Skipping {} poll, previous fetch still running", self.channel);
            }
            Err(e) => warn!("{} poll failed, keeping last snapshot: {}", self.channel, e),
        }
    }

    /// Starts polling every `interval`. Calling it again restarts the timer.
    pub fn start(self: &Arc<Self>, interval: Duration) -> std::io::Result<()> {
        self.stopped.store(false, Ordering::Release);
        let weak: Weak<Self> = Arc::downgrade(self);
        let ticker = Ticker::spawn(format!("poll-{}", self.channel), interval, move |_| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.poll();
            }
        })?;

        if let Ok(mut slot) = self.ticker.lock() {
            // Replacing the slot drops and stops a previous timer.
            *slot = Some(ticker);
        }
        info!("Polling {} channel every {:?}", self.channel, interval);
        Ok(())
    }

    /// Stops the timer. A fetch still in flight finishes on its worker and its
    /// result is discarded.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let ticker = self.ticker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut ticker) = ticker {
            ticker.stop();
            info!("Stopped polling {} channel", self.channel);
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .map(|slot| slot.as_ref().is_some_and(Ticker::is_running))
            .unwrap_or(false)
    }
}

impl Drop for PollingCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}
