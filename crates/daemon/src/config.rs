//! Daemon Configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Runtime configuration assembled from command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Network name → WebSocket endpoint of its consensus node.
    pub endpoints: HashMap<String, String>,
    /// Directory holding the event log and the archive.
    pub data_dir: PathBuf,
    /// Poll interval for the periodic jobs, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            data_dir: PathBuf::from("./data"),
            poll_interval_secs: 60,
        }
    }
}

impl RelayConfig {
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("log")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join("archive")
    }
}

/// Parse one `name=url` endpoint flag.
pub fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok((name.to_string(), url.to_string()))
        }
        _ => Err(format!("expected `name=url`, got `{raw}`")),
    }
}
