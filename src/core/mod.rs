//! Core logic: snapshot decoding, rate derivation, lifecycle reconciliation, presentation.
//!
//! - [`snapshot`] — wire types and [`decode_snapshot`]
//! - [`rate`] — speeds from cumulative counters
//! - [`ConnectionsState`] — active/closed sets and the per-snapshot reconciler
//! - [`ConnectionView`] / [`render_connections`] — filtered, sorted projection
//! - [`format`] — human-readable byte and speed strings

pub mod format;
pub mod rate;
pub mod snapshot;
pub mod traffic;
pub mod view;

pub use rate::Speed;
pub use snapshot::{decode_snapshot, ConnectionMetadata, ConnectionRecord, Snapshot};
pub use traffic::{ConnectionsState, ReconcileOutcome, Totals, TrackedConnection};
pub use view::{
    render_connections, ConnectionSet, ConnectionView, Prepared, RenderJob, RenderedView, SortKey,
    ViewQuery,
};
