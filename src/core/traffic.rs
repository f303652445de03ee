//! Per-connection traffic state and the lifecycle reconciler.
//!
//! [`ConnectionsState`] is an immutable value: each snapshot produces a new
//! state from the previous one, which the session then publishes in a single
//! swap. Readers therefore see either the full pre- or post-snapshot state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::rate::{derive_aggregate_speed, derive_connection_speed};
use super::snapshot::{ConnectionRecord, Snapshot};

/// A connection record plus the speeds derived for it in the latest snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedConnection {
    #[serde(flatten)]
    pub record: ConnectionRecord,
    /// Bytes downloaded since the previous snapshot.
    pub download_speed: u64,
    /// Bytes uploaded since the previous snapshot.
    pub upload_speed: u64,
}

impl TrackedConnection {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Process-wide counters from the latest snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub download_total: u64,
    pub upload_total: u64,
    pub download_speed: u64,
    pub upload_speed: u64,
    pub memory: u64,
}

/// What one reconciliation step changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub opened: usize,
    pub persisted: usize,
    pub closed: usize,
    /// True when the connection sets were frozen and left untouched.
    pub frozen: bool,
}

/// Derived session state: active and closed connections plus aggregates.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsState {
    pub active: Vec<Arc<TrackedConnection>>,
    /// Connections that vanished from the feed this session, oldest first.
    pub closed: Vec<Arc<TrackedConnection>>,
    pub totals: Totals,
    /// Snapshots applied since the session started, including frozen ones.
    pub snapshots_seen: u64,
    /// Bumped on every published change.
    pub revision: u64,
}

impl ConnectionsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state for a new session, keeping the revision monotonic for observers.
    pub fn reset_from(prev: &ConnectionsState) -> Self {
        Self {
            revision: prev.revision + 1,
            ..Self::default()
        }
    }

    /// Apply one snapshot and return the next state.
    ///
    /// Aggregates and memory always refresh. When `frozen`, the active and
    /// closed sets are carried over untouched so the next unfrozen snapshot
    /// reconciles against the state as of the freeze.
    ///
    /// Duplicate ids within `snapshot` are all kept, in order; each is matched
    /// against the previous entry with that id (the last one, if the previous
    /// active set itself held duplicates).
    pub fn apply(&self, snapshot: Snapshot, frozen: bool) -> (ConnectionsState, ReconcileOutcome) {
        let is_first = self.snapshots_seen == 0;
        let totals = Totals {
            download_total: snapshot.download_total,
            upload_total: snapshot.upload_total,
            download_speed: derive_aggregate_speed(
                self.totals.download_total,
                snapshot.download_total,
                is_first,
            ),
            upload_speed: derive_aggregate_speed(
                self.totals.upload_total,
                snapshot.upload_total,
                is_first,
            ),
            memory: snapshot.memory,
        };

        if frozen {
            let next = ConnectionsState {
                active: self.active.clone(),
                closed: self.closed.clone(),
                totals,
                snapshots_seen: self.snapshots_seen + 1,
                revision: self.revision + 1,
            };
            let outcome = ReconcileOutcome {
                frozen: true,
                ..ReconcileOutcome::default()
            };
            return (next, outcome);
        }

        let prev_by_id: HashMap<&str, &TrackedConnection> = self
            .active
            .iter()
            .map(|c| (c.id(), c.as_ref()))
            .collect();

        let newly_closed: Vec<Arc<TrackedConnection>> = {
            let incoming_ids: HashSet<&str> =
                snapshot.connections.iter().map(|c| c.id.as_str()).collect();
            self.active
                .iter()
                .filter(|c| !incoming_ids.contains(c.id()))
                .cloned()
                .collect()
        };

        let mut opened = 0;
        let mut persisted = 0;
        let active: Vec<Arc<TrackedConnection>> = snapshot
            .connections
            .into_iter()
            .map(|record| {
                let prev = prev_by_id.get(record.id.as_str()).map(|c| &c.record);
                if prev.is_some() {
                    persisted += 1;
                } else {
                    opened += 1;
                }
                let speed = derive_connection_speed(prev, &record);
                Arc::new(TrackedConnection {
                    record,
                    download_speed: speed.download,
                    upload_speed: speed.upload,
                })
            })
            .collect();

        let outcome = ReconcileOutcome {
            opened,
            persisted,
            closed: newly_closed.len(),
            frozen: false,
        };

        let mut closed = Vec::with_capacity(self.closed.len() + newly_closed.len());
        closed.extend(self.closed.iter().cloned());
        closed.extend(newly_closed);

        let next = ConnectionsState {
            active,
            closed,
            totals,
            snapshots_seen: self.snapshots_seen + 1,
            revision: self.revision + 1,
        };
        (next, outcome)
    }

    pub fn find_active(&self, id: &str) -> Option<&TrackedConnection> {
        self.active.iter().find(|c| c.id() == id).map(Arc::as_ref)
    }
}
