//! WebSocket feed from a proxy controller's `/connections` endpoint.
//!
//! Reconnection is the caller's decision: the stream ends after a close
//! frame or transport error, and the session exposes `resubscribe` to
//! resume feeding.

use futures_util::{future, stream, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{RawMessage, SnapshotSource, Subscription};
use crate::error::AppError;

/// Controller WebSocket endpoint, e.g. `ws://127.0.0.1:9090/connections`.
/// TLS (`wss://`) is not supported.
#[derive(Debug, Clone)]
pub struct WsSource {
    url: String,
}

impl WsSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SnapshotSource for WsSource {
    fn subscribe(&self) -> Subscription {
        let url = self.url.clone();
        let connect = async move {
            let result = connect_async(url.as_str()).await;
            match &result {
                Ok(_) => tracing::info!("Connected to telemetry feed at {url}"),
                Err(e) => tracing::warn!("Failed to connect to {url}: {e}"),
            }
            result
        };

        Box::pin(stream::once(connect).flat_map(|result| match result {
            Ok((ws, _response)) => frames(ws).left_stream(),
            Err(e) => {
                let item: Result<RawMessage, AppError> = Err(e.into());
                stream::once(future::ready(item)).right_stream()
            }
        }))
    }

    fn describe(&self) -> String {
        format!("websocket feed {}", self.url)
    }
}

fn frames(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> impl Stream<Item = Result<RawMessage, AppError>> + Send {
    ws.filter_map(|frame| future::ready(frame_to_message(frame)))
}

/// Map one WebSocket frame to a feed item. Control frames yield nothing.
fn frame_to_message(
    frame: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<RawMessage, AppError>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
        Ok(Message::Binary(data)) => Some(Ok(data)),
        Ok(Message::Close(frame)) => {
            let reason = frame
                .map(|f| f.reason.to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "closed by peer".to_string());
            Some(Err(AppError::StreamDisconnected(reason)))
        }
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}
