//! Periodic timers
//!
//! Each component owns one [`Ticker`]: a named background thread that calls its
//! callback on a fixed interval, aligned to wall-clock multiples of the interval.
//! Stopping (or dropping) the ticker wakes the thread immediately and joins it,
//! so no callback fires after `stop` returns.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Next wall-clock multiple of `interval` strictly after `time`.
///
/// Example: 12.3 s with a 5 s interval -> 15 s
pub fn next_interval(time: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let interval_ms = interval.num_milliseconds().max(1);
    let since_last_interval = Duration::milliseconds(time.timestamp_millis().rem_euclid(interval_ms));
    time - since_last_interval + Duration::milliseconds(interval_ms)
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn is_stopped(&self) -> bool {
        self.stopped.lock().map(|s| *s).unwrap_or(true)
    }

    /// Sleeps until `deadline` or until stopped. Returns true when stopped.
    fn wait_until(&self, deadline: DateTime<Utc>) -> bool {
        let Ok(mut stopped) = self.stopped.lock() else {
            return true;
        };
        loop {
            if *stopped {
                return true;
            }
            let remaining = deadline - Utc::now();
            let Ok(remaining) = remaining.to_std() else {
                return false;
            };
            if remaining.is_zero() {
                return false;
            }
            match self.wake.wait_timeout(stopped, remaining) {
                Ok((guard, _)) => stopped = guard,
                Err(_) => return true,
            }
        }
    }

    fn stop(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
        }
        self.wake.notify_all();
    }
}

/// Periodic trigger running on its own thread
pub struct Ticker {
    name: String,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Starts calling `tick` every `interval`. The first call happens at the next
    /// aligned boundary, not immediately.
    pub fn spawn<F>(name: impl Into<String>, interval: std::time::Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut(DateTime<Utc>) + Send + 'static,
    {
        let name = name.into();
        let interval = Duration::from_std(interval).unwrap_or(Duration::seconds(1));
        let signal = Arc::new(StopSignal::default());

        let thread_signal = Arc::clone(&signal);
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!("Timer '{}' started with interval {:?}", thread_name, interval);
            let mut next = next_interval(Utc::now(), interval);
            loop {
                if thread_signal.wait_until(next) {
                    break;
                }
                let now = Utc::now();
                next = next_interval(now, interval);
                tick(now);
                if thread_signal.is_stopped() {
                    break;
                }
            }
            debug!("Timer '{}' stopped", thread_name);
        })?;

        Ok(Self {
            name,
            signal,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and waits for a running callback to return.
    pub fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside its own callback; the loop exits on return.
                return;
            }
            if handle.join().is_err() {
                warn!("Timer '{}' panicked", self.name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
