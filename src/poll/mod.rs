//! Per-channel polling
//!
//! A [`PollingCoordinator`] owns one channel's timer and its last good
//! [`Snapshot`]. Both channels share the retry policy in [`retry`].

pub mod coordinator;
pub mod retry;
pub mod snapshot;

pub use coordinator::PollingCoordinator;
pub use retry::attempt_with_retry;
pub use snapshot::Snapshot;
