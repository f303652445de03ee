//! Centralized runtime constants and the settings-store seam.
//!
//! Presentation settings (quick filter, sort key) are owned by an external
//! key-value store. [`SettingsStore`] is that seam; [`MemorySettings`] is an
//! in-process implementation for embedding and tests.

use dashmap::DashMap;

/// Telemetry endpoint used when neither the CLI nor the environment names one.
///
/// Plain `ws://` only: the WebSocket client is built without TLS, so a
/// `wss://` endpoint fails to connect and surfaces as `StreamDisconnected`.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:9090/connections";

/// Environment variable consulted for the telemetry endpoint.
pub const ENDPOINT_ENV_VAR: &str = "CONNLENS_ENDPOINT";

/// Quick-filter pattern applied when the store has none (hides DNS and direct traffic).
pub const DEFAULT_QUICK_FILTER_REGEX: &str = "dns|direct";

/// Quick filter is off until the user turns it on.
pub const DEFAULT_QUICK_FILTER_ENABLED: bool = false;

/// Sort key applied when the store has none.
pub const DEFAULT_SORT_TYPE: &str = "host";

pub const KEY_QUICK_FILTER_REGEX: &str = "config/quick-filter-regex";
pub const KEY_QUICK_FILTER_ENABLED: &str = "config/quick-filter-enabled";
pub const KEY_CONNECTION_SORT_TYPE: &str = "config/connection-sort-type";

/// Capacity of the in-process broadcast feed. Slow subscribers skip ahead past this.
pub const BROADCAST_CAPACITY: usize = 64;

/// Interval at which the binary logs a totals summary (seconds).
pub const SUMMARY_INTERVAL_SECS: u64 = 5;

/// Generic string key-value settings store.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

/// In-memory settings store. Concurrent readers never block each other.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: DashMap<String, String>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }
}

/// Resolve the telemetry endpoint: CLI argument, then environment, then default.
pub fn resolve_endpoint(cli_arg: Option<String>, env_value: Option<String>) -> String {
    cli_arg
        .filter(|s| !s.trim().is_empty())
        .or_else(|| env_value.filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
}
