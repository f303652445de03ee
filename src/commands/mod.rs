//! Command handlers for a renderer, organized by functional domain.
//!
//! - `connections`: rendered list, totals, and view settings
//! - `session`: start/stop/pause/resume and status
//! - `state`: Shared `AppState` definition

pub mod connections;
pub mod session;
mod state;

pub use state::AppState;
