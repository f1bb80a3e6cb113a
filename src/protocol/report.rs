use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Telemetry carried in every heartbeat frame, serialized as JSON.
///
/// `ip` is never trusted from the sender: the collector overwrites it with
/// the peer address of the session that delivered the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub run_mode: String,
    /// Unix seconds at collection time on the sender.
    #[serde(default)]
    pub timestamp: u64,
    pub metrics: BTreeMap<String, f64>,
}

impl Report {
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}
