pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use commands::AppState;
use config::MemorySettings;
use error::AppError;
use stream::WsSource;

pub use crate::core::{ConnectionsState, RenderedView, SortKey, TrackedConnection, ViewQuery};
pub use session::{Session, SessionStatus};

/// Connect to `endpoint` and keep the reconciled view live until Ctrl-C.
///
/// Logs a totals summary periodically and resubscribes after the feed drops.
pub async fn run(endpoint: String) -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in connlens: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connlens=info,connlens_lib=info".into()),
        )
        .init();

    let source = Arc::new(WsSource::new(endpoint));
    let settings = Arc::new(MemorySettings::new());
    let app = AppState::new(source, settings);

    commands::session::start_session(&app)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(config::SUMMARY_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log_summary(&app)?;
                if let Some(AppError::StreamDisconnected(reason)) = app.session.last_error() {
                    tracing::info!("Feed dropped ({reason}); resubscribing");
                    app.session.resubscribe()?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                commands::session::stop_session(&app)?;
                break;
            }
        }
    }

    Ok(())
}

fn log_summary(app: &AppState) -> Result<(), AppError> {
    use crate::core::format::{format_bytes, format_speed};

    let totals = commands::connections::get_totals(app)?;
    let rendered = commands::connections::get_connections(app)?;
    let state = app.session.state();
    tracing::info!(
        "\u{2193} {} ({}) \u{2191} {} ({}) | shown {} active {} closed {} | mem {}",
        format_speed(totals.download_speed),
        format_bytes(totals.download_total),
        format_speed(totals.upload_speed),
        format_bytes(totals.upload_total),
        rendered.connections.len(),
        state.active.len(),
        state.closed.len(),
        format_bytes(totals.memory)
    );
    if let Some(top) = rendered.connections.first() {
        tracing::debug!(
            "Top: {} via {} ({})",
            top.record.metadata.host_or_ip(),
            top.record.chains.join(" > "),
            format_speed(top.download_speed)
        );
    }
    Ok(())
}
