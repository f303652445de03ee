//! Session lifecycle: one live subscription feeding the reconcile pipeline.
//!
//! `Session` owns the published [`ConnectionsState`]. Each subscription runs
//! in its own task and processes messages strictly one at a time. Every
//! subscription is tagged with a generation; reconcile-and-publish happens
//! under the pipeline lock and only for the current generation, so once
//! `stop()` or `start()` returns, nothing from the old subscription can
//! mutate state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::snapshot::decode_snapshot;
use crate::core::traffic::{ConnectionsState, ReconcileOutcome, Totals};
use crate::error::AppError;
use crate::stream::{SnapshotSource, Subscription};

/// Externally visible session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Uninitialized,
    Running,
    Paused,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running,
    Terminated,
}

struct Control {
    lifecycle: Lifecycle,
    task: Option<JoinHandle<()>>,
}

/// State shared between the session handle and its pipeline task.
struct Shared {
    state: ArcSwap<ConnectionsState>,
    /// Generation allowed to publish. Held for the whole reconcile-and-publish step.
    pipeline: Mutex<u64>,
    paused: AtomicBool,
    last_error: Mutex<Option<AppError>>,
    updates: watch::Sender<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new() -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            state: ArcSwap::from_pointee(ConnectionsState::new()),
            pipeline: Mutex::new(0),
            paused: AtomicBool::new(false),
            last_error: Mutex::new(None),
            updates,
        }
    }

    /// Swap in a new state. Caller must hold the pipeline lock.
    fn publish(&self, next: ConnectionsState) {
        let revision = next.revision;
        self.state.store(Arc::new(next));
        self.updates.send_replace(revision);
    }

    /// Run one message through decode -> rate -> reconcile -> publish.
    ///
    /// `generation` of `None` means "whatever is current". Returns
    /// `Ok(None)` when the message came from a superseded subscription.
    fn ingest(
        &self,
        raw: &[u8],
        generation: Option<u64>,
    ) -> Result<Option<ReconcileOutcome>, AppError> {
        let decoded = decode_snapshot(raw);

        let current = lock(&self.pipeline);
        if generation.is_some_and(|g| g != *current) {
            tracing::debug!("Dropping message from superseded subscription");
            return Ok(None);
        }

        let snapshot = match decoded {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Skipping snapshot: {e}");
                *lock(&self.last_error) = Some(e.clone());
                return Err(e);
            }
        };

        let frozen = self.paused.load(Ordering::SeqCst);
        let (next, outcome) = self.state.load().apply(snapshot, frozen);
        tracing::debug!(
            "Snapshot #{}: +{} ={} -{} (frozen: {}), active {}, closed {}",
            next.snapshots_seen,
            outcome.opened,
            outcome.persisted,
            outcome.closed,
            outcome.frozen,
            next.active.len(),
            next.closed.len()
        );
        self.publish(next);
        drop(current);
        Ok(Some(outcome))
    }

    /// Record a transport error if `generation` is still current.
    fn record_stream_error(&self, generation: u64, err: AppError) {
        let current = lock(&self.pipeline);
        if *current == generation {
            tracing::warn!("Telemetry stream error: {err}");
            *lock(&self.last_error) = Some(err);
        }
    }
}

async fn run_pipeline(shared: Arc<Shared>, mut subscription: Subscription, generation: u64) {
    while let Some(item) = subscription.next().await {
        match item {
            Ok(raw) => {
                // Decode failures are recorded inside; keep consuming.
                let _ = shared.ingest(&raw, Some(generation));
            }
            Err(e) => shared.record_stream_error(generation, e),
        }
    }
    shared.record_stream_error(
        generation,
        AppError::StreamDisconnected("stream ended".to_string()),
    );
}

/// Owns the live subscription and the derived connection state.
pub struct Session {
    source: Arc<dyn SnapshotSource>,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl Session {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            source,
            shared: Arc::new(Shared::new()),
            control: Mutex::new(Control {
                lifecycle: Lifecycle::Uninitialized,
                task: None,
            }),
        }
    }

    /// Tear down any previous subscription, reset all state, and subscribe afresh.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut control = lock(&self.control);
        let generation = {
            let mut current = lock(&self.shared.pipeline);
            *current += 1;
            if let Some(task) = control.task.take() {
                task.abort();
                tracing::info!("Tore down previous subscription");
            }
            let fresh = ConnectionsState::reset_from(&self.shared.state.load());
            self.shared.publish(fresh);
            *lock(&self.shared.last_error) = None;
            *current
        };

        control.task = Some(self.spawn_pipeline(generation));
        control.lifecycle = Lifecycle::Running;
        tracing::info!("Session started on {}", self.source.describe());
    }

    /// Cancel the subscription. State stays as last observed until the next `start()`.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        {
            let mut current = lock(&self.shared.pipeline);
            *current += 1;
        }
        if let Some(task) = control.task.take() {
            task.abort();
        }
        if control.lifecycle != Lifecycle::Uninitialized {
            control.lifecycle = Lifecycle::Terminated;
        }
        tracing::info!("Session stopped");
    }

    /// Reconnection hook: open a new subscription without clearing state.
    pub fn resubscribe(&self) -> Result<(), AppError> {
        let mut control = lock(&self.control);
        if control.lifecycle == Lifecycle::Uninitialized {
            return Err(AppError::InvalidInput(
                "Session has not been started".to_string(),
            ));
        }
        let generation = {
            let mut current = lock(&self.shared.pipeline);
            *current += 1;
            *lock(&self.shared.last_error) = None;
            *current
        };
        if let Some(task) = control.task.take() {
            task.abort();
        }
        control.task = Some(self.spawn_pipeline(generation));
        control.lifecycle = Lifecycle::Running;
        tracing::info!("Resubscribed to {}", self.source.describe());
        Ok(())
    }

    /// Freeze the active/closed sets. Aggregates keep updating.
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("Connection list paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("Connection list resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        match lock(&self.control).lifecycle {
            Lifecycle::Uninitialized => SessionStatus::Uninitialized,
            Lifecycle::Terminated => SessionStatus::Terminated,
            Lifecycle::Running if self.is_paused() => SessionStatus::Paused,
            Lifecycle::Running => SessionStatus::Running,
        }
    }

    /// Push one raw message through the pipeline directly.
    pub fn ingest(&self, raw: &[u8]) -> Result<ReconcileOutcome, AppError> {
        Ok(self.shared.ingest(raw, None)?.unwrap_or_default())
    }

    /// The current published state. Always a complete post-snapshot view.
    pub fn state(&self) -> Arc<ConnectionsState> {
        self.shared.state.load_full()
    }

    pub fn totals(&self) -> Totals {
        self.shared.state.load().totals
    }

    /// Most recent recoverable error (malformed snapshot or stream failure).
    pub fn last_error(&self) -> Option<AppError> {
        lock(&self.shared.last_error).clone()
    }

    /// Receiver notified with the state revision after every publish.
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.shared.updates.subscribe()
    }

    fn spawn_pipeline(&self, generation: u64) -> JoinHandle<()> {
        let subscription = self.source.subscribe();
        tokio::spawn(run_pipeline(
            Arc::clone(&self.shared),
            subscription,
            generation,
        ))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.control).task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::tests::{make_record, make_snapshot};
    use crate::core::snapshot::ConnectionRecord;
    use crate::stream::BroadcastSource;
    use futures_util::stream;
    use std::time::Duration;

    struct ScriptedSource(Vec<Vec<u8>>);

    impl SnapshotSource for ScriptedSource {
        fn subscribe(&self) -> Subscription {
            Box::pin(stream::iter(self.0.clone().into_iter().map(Ok::<_, AppError>)))
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn message(records: Vec<ConnectionRecord>, download_total: u64, upload_total: u64) -> Vec<u8> {
        serde_json::to_vec(&make_snapshot(records, download_total, upload_total)).unwrap()
    }

    async fn wait_for(session: &Session, pred: impl Fn(&ConnectionsState) -> bool) {
        let mut rx = session.subscribe_updates();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let state = session.state();
                if pred(state.as_ref()) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out waiting for session state");
    }

    fn broadcast_session() -> (Arc<BroadcastSource>, Session) {
        let source = Arc::new(BroadcastSource::new());
        let session = Session::new(source.clone());
        (source, session)
    }

    #[tokio::test]
    async fn test_start_processes_snapshots_in_order() {
        let (source, session) = broadcast_session();
        assert_eq!(session.status(), SessionStatus::Uninitialized);
        session.start();
        assert_eq!(session.status(), SessionStatus::Running);

        source.publish(message(vec![make_record("x", 100, 0)], 5000, 100));
        source.publish(message(vec![make_record("x", 150, 0)], 5600, 180));
        wait_for(&session, |s| s.snapshots_seen == 2).await;

        let state = session.state();
        assert_eq!(state.find_active("x").unwrap().download_speed, 50);
        assert_eq!(state.totals.download_speed, 600);
        assert_eq!(state.totals.upload_speed, 80);
    }

    #[tokio::test]
    async fn test_first_snapshot_has_zero_aggregate_speed() {
        let (source, session) = broadcast_session();
        session.start();
        source.publish(message(vec![], 123_456, 789));
        wait_for(&session, |s| s.snapshots_seen == 1).await;

        let totals = session.totals();
        assert_eq!(totals.download_total, 123_456);
        assert_eq!(totals.download_speed, 0);
        assert_eq!(totals.upload_speed, 0);
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let (source, session) = broadcast_session();
        session.start();
        source.publish(message(vec![make_record("a", 1, 1)], 10, 10));
        source.publish(b"{\"connections\": [".to_vec());
        source.publish(message(vec![make_record("a", 4, 1)], 20, 10));
        wait_for(&session, |s| s.snapshots_seen == 2).await;

        let state = session.state();
        assert_eq!(state.find_active("a").unwrap().download_speed, 3);
        assert_eq!(session.last_error().unwrap().kind(), "MalformedSnapshot");
    }

    #[tokio::test]
    async fn test_restart_resets_everything_before_next_snapshot() {
        let (source, session) = broadcast_session();
        session.start();
        source.publish(message(vec![make_record("a", 1, 1)], 10, 10));
        source.publish(message(vec![make_record("b", 1, 1)], 20, 10));
        wait_for(&session, |s| s.snapshots_seen == 2).await;
        assert_eq!(session.state().closed.len(), 1);

        session.start();
        let state = session.state();
        assert!(state.active.is_empty());
        assert!(state.closed.is_empty());
        assert_eq!(state.totals, Totals::default());
        assert_eq!(state.snapshots_seen, 0);
        assert!(session.last_error().is_none());

        source.publish(message(vec![make_record("b", 9, 9)], 900, 900));
        wait_for(&session, |s| s.snapshots_seen == 1).await;
        let state = session.state();
        assert_eq!(state.totals.download_speed, 0);
        assert_eq!(state.find_active("b").unwrap().download_speed, 0);
    }

    #[tokio::test]
    async fn test_restart_keeps_single_subscription() {
        let (source, session) = broadcast_session();
        session.start();
        session.start();
        session.start();
        tokio::time::timeout(Duration::from_secs(2), async {
            while source.subscriber_count() != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("old subscriptions were not released");
    }

    #[tokio::test]
    async fn test_stop_prevents_further_mutation_and_keeps_state() {
        let (source, session) = broadcast_session();
        session.start();
        source.publish(message(vec![make_record("a", 1, 1)], 10, 10));
        wait_for(&session, |s| s.snapshots_seen == 1).await;

        session.stop();
        assert_eq!(session.status(), SessionStatus::Terminated);
        source.publish(message(vec![], 99, 99));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = session.state();
        assert_eq!(state.snapshots_seen, 1);
        assert_eq!(state.active.len(), 1);
        assert_eq!(state.totals.download_total, 10);
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_publish() {
        let (_source, session) = broadcast_session();
        session.start();
        let stale = *lock(&session.shared.pipeline);
        session.stop();

        let outcome = session
            .shared
            .ingest(&message(vec![make_record("a", 0, 0)], 1, 1), Some(stale))
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(session.state().snapshots_seen, 0);
    }

    #[tokio::test]
    async fn test_pause_freezes_sets_until_resume() {
        let (source, session) = broadcast_session();
        session.start();
        source.publish(message(vec![make_record("a", 10, 0), make_record("b", 0, 0)], 100, 0));
        wait_for(&session, |s| s.snapshots_seen == 1).await;
        let frozen_active = session.state().active.clone();

        session.pause();
        assert_eq!(session.status(), SessionStatus::Paused);
        source.publish(message(vec![make_record("c", 0, 0)], 300, 0));
        source.publish(message(vec![make_record("d", 0, 0)], 700, 0));
        wait_for(&session, |s| s.snapshots_seen == 3).await;

        let state = session.state();
        assert_eq!(state.active, frozen_active);
        assert!(state.closed.is_empty());
        assert_eq!(state.totals.download_total, 700);
        assert_eq!(state.totals.download_speed, 400);

        session.resume();
        assert_eq!(session.status(), SessionStatus::Running);
        source.publish(message(vec![make_record("a", 60, 0)], 800, 0));
        wait_for(&session, |s| s.snapshots_seen == 4).await;

        let state = session.state();
        assert_eq!(state.find_active("a").unwrap().download_speed, 50);
        let closed: Vec<&str> = state.closed.iter().map(|c| c.id()).collect();
        assert_eq!(closed, vec!["b"]);
    }

    #[tokio::test]
    async fn test_pause_survives_start() {
        let (source, session) = broadcast_session();
        session.pause();
        session.start();
        assert_eq!(session.status(), SessionStatus::Paused);

        source.publish(message(vec![make_record("a", 10, 0)], 100, 0));
        source.publish(message(vec![make_record("b", 10, 0)], 250, 0));
        wait_for(&session, |s| s.snapshots_seen == 2).await;

        assert_eq!(session.status(), SessionStatus::Paused);
        let state = session.state();
        assert!(state.active.is_empty());
        assert!(state.closed.is_empty());
        assert_eq!(state.totals.download_total, 250);
        assert_eq!(state.totals.download_speed, 150);

        session.start();
        assert!(session.is_paused());
        assert!(session.state().active.is_empty());
    }

    #[tokio::test]
    async fn test_stream_end_records_disconnect() {
        let source = Arc::new(ScriptedSource(vec![
            message(vec![make_record("a", 0, 0)], 1, 1),
            message(vec![make_record("a", 5, 0)], 6, 1),
        ]));
        let session = Session::new(source);
        session.start();

        tokio::time::timeout(Duration::from_secs(2), async {
            while session.last_error().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("disconnect was not recorded");

        assert_eq!(session.last_error().unwrap().kind(), "StreamDisconnected");
        let state = session.state();
        assert_eq!(state.snapshots_seen, 2);
        assert_eq!(state.find_active("a").unwrap().download_speed, 5);
    }

    #[tokio::test]
    async fn test_resubscribe_keeps_state() {
        let (source, session) = broadcast_session();
        assert!(session.resubscribe().is_err());

        session.start();
        source.publish(message(vec![make_record("a", 10, 0)], 10, 0));
        wait_for(&session, |s| s.snapshots_seen == 1).await;

        session.resubscribe().unwrap();
        source.publish(message(vec![make_record("a", 25, 0)], 30, 0));
        wait_for(&session, |s| s.snapshots_seen == 2).await;

        let state = session.state();
        assert_eq!(state.find_active("a").unwrap().download_speed, 15);
        assert_eq!(state.totals.download_speed, 20);
    }

    #[tokio::test]
    async fn test_direct_ingest_runs_pipeline() {
        let (_source, session) = broadcast_session();
        let outcome = session
            .ingest(&message(vec![make_record("a", 0, 0)], 0, 0))
            .unwrap();
        assert_eq!(outcome.opened, 1);
        assert_eq!(session.ingest(b"nope").unwrap_err().kind(), "MalformedSnapshot");
        assert_eq!(session.state().active.len(), 1);
    }
}
