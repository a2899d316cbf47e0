//! Bounded retry with a wall-clock timeout

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::catalog::Channel;
use crate::errors::FetchError;

/// Runs `fetch` at most twice on a worker thread and waits at most `timeout`
/// for the whole sequence.
///
/// The second attempt only happens if the first one fails. When the timeout
/// elapses the worker is left to finish on its own; whatever it produces is
/// dropped.
pub fn attempt_with_retry<T, F>(channel: Channel, timeout: Duration, mut fetch: F) -> Result<T, FetchError>
where
    T: Send + 'static,
    F: FnMut() -> anyhow::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);

    thread::Builder::new()
        .name(format!("fetch-{}", channel))
        .spawn(move || {
            let result = match fetch() {
                Ok(value) => Ok(value),
                Err(first) => {
                    debug!("First {} fetch attempt failed, retrying: {:#}", channel, first);
                    fetch().map_err(|second| {
                        warn!("Can not retrieve {} data from the device: {:#}", channel, second);
                        FetchError::Failed {
                            channel,
                            reason: format!("{:#}", second),
                        }
                    })
                }
            };
            // Release whatever the closure holds before the caller can observe
            // the result.
            drop(fetch);
            // The receiver is gone if the caller timed out.
            let _ = tx.send(result);
        })
        .map_err(|source| FetchError::Worker { channel, source })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("{} fetch timed out after {:?}", channel, timeout);
            Err(FetchError::TimedOut { channel, timeout })
        }
        Err(RecvTimeoutError::Disconnected) => Err(FetchError::Failed {
            channel,
            reason: "fetch worker exited without a result".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting<F>(calls: &Arc<AtomicUsize>, f: F) -> impl FnMut() -> anyhow::Result<u32> + Send + 'static
    where
        F: Fn(usize) -> anyhow::Result<u32> + Send + 'static,
    {
        let calls = Arc::clone(calls);
        move || f(calls.fetch_add(1, Ordering::SeqCst))
    }

    #[test]
    fn test_first_attempt_success_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = attempt_with_retry(
            Channel::Primary,
            Duration::from_secs(1),
            counting(&calls, |_| Ok(7)),
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_failure_is_absorbed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = attempt_with_retry(
            Channel::Secondary,
            Duration::from_secs(1),
            counting(&calls, |n| if n == 0 { Err(anyhow!("blip")) } else { Ok(3) }),
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_two_failures_report_channel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = attempt_with_retry(
            Channel::Secondary,
            Duration::from_secs(1),
            counting(&calls, |n| Err(anyhow!("refused #{}", n))),
        );

        match result {
            Err(FetchError::Failed { channel, reason }) => {
                assert_eq!(channel, Channel::Secondary);
                assert!(reason.contains("refused #1"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timeout_is_reported_distinctly() {
        let started = std::time::Instant::now();
        let result = attempt_with_retry(Channel::Primary, Duration::from_millis(50), || {
            thread::sleep(Duration::from_millis(400));
            Ok(1)
        });

        assert!(matches!(result, Err(FetchError::TimedOut { channel: Channel::Primary, .. })));
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[test]
    fn test_timeout_covers_both_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = attempt_with_retry(
            Channel::Primary,
            Duration::from_millis(150),
            counting(&calls, |_| {
                thread::sleep(Duration::from_millis(100));
                Err(anyhow!("slow failure"))
            }),
        );
        assert!(matches!(result, Err(FetchError::TimedOut { .. })));
    }
}
