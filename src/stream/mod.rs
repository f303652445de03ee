//! Telemetry feed backends.
//!
//! A [`SnapshotSource`] hands out one [`Subscription`] per session start:
//! a stream of raw messages, each expected to decode as one snapshot.
//! - WebSocket controller endpoint (`ws_backend`)
//! - In-process broadcast feed ([`BroadcastSource`])

pub mod ws_backend;

use std::pin::Pin;

use futures_util::{stream, Stream};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config;
use crate::error::AppError;

pub use ws_backend::WsSource;

/// One undecoded stream message (UTF-8 JSON, from a text or binary frame).
pub type RawMessage = Vec<u8>;

/// A live feed. Dropping it cancels the underlying transport.
pub type Subscription = Pin<Box<dyn Stream<Item = Result<RawMessage, AppError>> + Send>>;

/// Something that can open a telemetry feed.
pub trait SnapshotSource: Send + Sync {
    /// Open a new feed. Errors are delivered as stream items, not returned here.
    fn subscribe(&self) -> Subscription;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// In-process feed: messages published here fan out to every open subscription.
///
/// A subscriber that falls more than the channel capacity behind skips
/// ahead. Each snapshot is a complete report, so only intermediate speeds
/// are lost.
#[derive(Debug, Clone)]
pub struct BroadcastSource {
    tx: broadcast::Sender<RawMessage>,
}

impl BroadcastSource {
    pub fn new() -> Self {
        Self::with_capacity(config::BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a message; returns how many subscriptions received it.
    pub fn publish(&self, message: impl Into<RawMessage>) -> usize {
        self.tx.send(message.into()).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for BroadcastSource {
    fn subscribe(&self) -> Subscription {
        let rx = self.tx.subscribe();
        Box::pin(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        let item: Result<RawMessage, AppError> = Ok(message);
                        return Some((item, rx));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Feed subscriber lagged; skipped {skipped} snapshots");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }))
    }

    fn describe(&self) -> String {
        "in-process broadcast feed".to_string()
    }
}
