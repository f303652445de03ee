//! Wire types for the connections feed and the snapshot decoder.
//!
//! Each stream message is one complete point-in-time report:
//! `{ connections: [...], downloadTotal, uploadTotal, memory }`.
//! Decoding is a pure transform; a message that fails to decode is
//! dropped by the caller without touching derived state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// Per-connection metadata as reported by the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub network: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub conn_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub host: String,
    #[serde(rename = "destinationIP", default, deserialize_with = "null_as_default")]
    pub destination_ip: String,
    #[serde(default, deserialize_with = "port_as_string")]
    pub destination_port: String,
    #[serde(rename = "sourceIP", default, deserialize_with = "null_as_default")]
    pub source_ip: String,
    #[serde(default, deserialize_with = "port_as_string")]
    pub source_port: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub process_path: String,
}

impl ConnectionMetadata {
    /// Host name when known, otherwise the destination IP.
    pub fn host_or_ip(&self) -> &str {
        if self.host.is_empty() {
            &self.destination_ip
        } else {
            &self.host
        }
    }
}

/// One connection as it appears in a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Opaque identifier, stable for the connection's lifetime.
    pub id: String,
    pub metadata: ConnectionMetadata,
    /// Cumulative bytes uploaded.
    pub upload: u64,
    /// Cumulative bytes downloaded.
    pub download: u64,
    pub start: DateTime<Utc>,
    /// Proxy hops, outermost first.
    #[serde(default, deserialize_with = "null_as_default")]
    pub chains: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rule: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rule_payload: String,
}

impl ConnectionRecord {
    /// Chain names concatenated without separator.
    pub fn joined_chains(&self) -> String {
        self.chains.concat()
    }
}

/// A decoded stream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub connections: Vec<ConnectionRecord>,
    pub download_total: u64,
    pub upload_total: u64,
    /// Proxy process memory in bytes; older controllers omit it.
    #[serde(default)]
    pub memory: u64,
}

/// Decode one raw message (UTF-8 JSON, text or binary frame) into a [`Snapshot`].
pub fn decode_snapshot(raw: &[u8]) -> Result<Snapshot, AppError> {
    Ok(serde_json::from_slice(raw)?)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Ports arrive as strings from some controllers and numbers from others.
fn port_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Port>::deserialize(deserializer)? {
        Some(Port::Text(s)) => s,
        Some(Port::Number(n)) => n.to_string(),
        None => String::new(),
    })
}
