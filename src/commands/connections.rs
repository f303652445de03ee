//! Presentation queries and view settings.

use std::sync::{Arc, MutexGuard, PoisonError};

use crate::core::traffic::Totals;
use crate::core::view::{
    ConnectionSet, ConnectionView, Prepared, RenderedView, SortKey, ViewQuery,
};
use crate::error::AppError;

use super::state::AppState;

fn view(state: &AppState) -> MutexGuard<'_, ConnectionView> {
    state.view.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `update` against the view, then persist the resulting query.
fn update_query(state: &AppState, update: impl FnOnce(&mut ConnectionView)) {
    let mut view = view(state);
    update(&mut view);
    view.query().persist(state.settings.as_ref());
}

/// The filtered, sorted connection list for the current settings.
///
/// The view lock is held only to look up or store the memoized result;
/// filtering and sorting run unlocked, so concurrent readers do not queue.
pub fn get_connections(state: &AppState) -> Result<Arc<RenderedView>, AppError> {
    let snapshot = state.session.state();
    let job = match view(state).prepare(snapshot.revision) {
        Prepared::Cached(rendered) => return Ok(rendered),
        Prepared::Stale(job) => job,
    };
    let rendered = Arc::new(job.run(&snapshot));
    view(state).offer(&job, Arc::clone(&rendered));
    Ok(rendered)
}

/// Aggregate totals, speeds, and memory from the latest snapshot.
pub fn get_totals(state: &AppState) -> Result<Totals, AppError> {
    Ok(state.session.totals())
}

pub fn get_view_query(state: &AppState) -> Result<ViewQuery, AppError> {
    Ok(view(state).query().clone())
}

/// Set the sort key by its wire name (`host`, `downloadSpeed`, ...).
pub fn set_sort_type(state: &AppState, sort_type: &str) -> Result<(), AppError> {
    let key: SortKey = sort_type.parse()?;
    update_query(state, |v| v.set_sort(key));
    tracing::debug!("Connection sort set to {}", key.as_str());
    Ok(())
}

/// Configure the exclusion filter. An invalid pattern is accepted and reported on render.
pub fn set_quick_filter(state: &AppState, enabled: bool, pattern: String) -> Result<(), AppError> {
    update_query(state, |v| v.set_quick_filter(enabled, pattern));
    Ok(())
}

pub fn set_connection_filter(state: &AppState, filter: String) -> Result<(), AppError> {
    update_query(state, |v| v.set_filter(filter));
    Ok(())
}

/// Toggle between the active and closed connection lists.
pub fn show_active_connections(state: &AppState, active: bool) -> Result<(), AppError> {
    let set = if active {
        ConnectionSet::Active
    } else {
        ConnectionSet::Closed
    };
    update_query(state, |v| v.show(set));
    Ok(())
}
