//! Device access module
//!
//! The wire protocols themselves live outside this crate; the core only sees a
//! [`DeviceClient`] returning typed replies for each channel.

pub mod client;
pub mod types;

pub use client::{DeviceClient, ReplayClient};
pub use types::*;
