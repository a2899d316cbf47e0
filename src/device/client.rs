//! Device client capability
//!
//! Calls are synchronous and may block. Any error is treated as a uniform
//! failure by the polling layer and only logged.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{PrimaryReply, SecondaryReply};

/// Access to both device channels
pub trait DeviceClient: Send + Sync {
    fn fetch_primary(&self) -> anyhow::Result<PrimaryReply>;
    fn fetch_secondary(&self) -> anyhow::Result<SecondaryReply>;
}

/// Client that replays device replies captured as JSON files
///
/// Every fetch re-reads `primary.json` or `secondary.json` from the replay
/// directory, so the files can be rewritten while the bridge runs.
pub struct ReplayClient {
    dir: PathBuf,
}

impl ReplayClient {
    pub const PRIMARY_FILE: &'static str = "primary.json";
    pub const SECONDARY_FILE: &'static str = "secondary.json";

    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> anyhow::Result<T> {
        let path = self.dir.join(file);
        debug!("Reading reply from {}", path.display());
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

impl DeviceClient for ReplayClient {
    fn fetch_primary(&self) -> anyhow::Result<PrimaryReply> {
        self.read(Self::PRIMARY_FILE)
    }

    fn fetch_secondary(&self) -> anyhow::Result<SecondaryReply> {
        self.read(Self::SECONDARY_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_reads_current_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let client = ReplayClient::new(dir.path());

        fs::write(
            dir.path().join(ReplayClient::PRIMARY_FILE),
            r#"{"battery": {"soc": 50}}"#,
        )
        .unwrap();
        assert_eq!(client.fetch_primary().unwrap().battery.soc, Some(50.0));

        fs::write(
            dir.path().join(ReplayClient::PRIMARY_FILE),
            r#"{"battery": {"soc": 51}}"#,
        )
        .unwrap();
        assert_eq!(client.fetch_primary().unwrap().battery.soc, Some(51.0));
    }

    #[test]
    fn test_missing_or_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ReplayClient::new(dir.path());
        assert!(client.fetch_secondary().is_err());

        fs::write(dir.path().join(ReplayClient::SECONDARY_FILE), "not json").unwrap();
        let error = client.fetch_secondary().unwrap_err();
        assert!(error.to_string().contains("Failed to parse"));
    }
}
