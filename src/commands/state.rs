//! Shared application state behind the command handlers.

use std::sync::{Arc, Mutex};

use crate::config::SettingsStore;
use crate::core::view::{ConnectionView, ViewQuery};
use crate::session::Session;
use crate::stream::SnapshotSource;

/// Shared application state.
pub struct AppState {
    pub session: Arc<Session>,
    /// Memoized presentation view; its query mirrors the settings store.
    /// Locked briefly per read; rendering happens outside the lock.
    pub view: Mutex<ConnectionView>,
    pub settings: Arc<dyn SettingsStore>,
}

impl AppState {
    /// Build state with the view query restored from `settings`.
    pub fn new(source: Arc<dyn SnapshotSource>, settings: Arc<dyn SettingsStore>) -> Self {
        let query = ViewQuery::load(settings.as_ref());
        Self {
            session: Arc::new(Session::new(source)),
            view: Mutex::new(ConnectionView::new(query)),
            settings,
        }
    }
}
