//! Session control commands: start, stop, pause, resume.

use crate::error::AppError;
use crate::session::SessionStatus;

use super::state::AppState;

/// Start (or restart) the session. Any previous subscription is torn down first.
pub fn start_session(state: &AppState) -> Result<(), AppError> {
    state.session.start();
    Ok(())
}

pub fn stop_session(state: &AppState) -> Result<(), AppError> {
    state.session.stop();
    Ok(())
}

pub fn pause_session(state: &AppState) -> Result<(), AppError> {
    state.session.pause();
    Ok(())
}

pub fn resume_session(state: &AppState) -> Result<(), AppError> {
    state.session.resume();
    Ok(())
}

pub fn get_session_status(state: &AppState) -> Result<SessionStatus, AppError> {
    Ok(state.session.status())
}

/// Most recent recoverable pipeline or stream error, if any.
pub fn get_last_error(state: &AppState) -> Result<Option<AppError>, AppError> {
    Ok(state.session.last_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::MemorySettings;
    use crate::stream::BroadcastSource;

    #[tokio::test]
    async fn test_session_commands_drive_status() {
        let state = AppState::new(
            Arc::new(BroadcastSource::new()),
            Arc::new(MemorySettings::new()),
        );
        assert_eq!(get_session_status(&state).unwrap(), SessionStatus::Uninitialized);

        start_session(&state).unwrap();
        assert_eq!(get_session_status(&state).unwrap(), SessionStatus::Running);

        pause_session(&state).unwrap();
        assert_eq!(get_session_status(&state).unwrap(), SessionStatus::Paused);

        resume_session(&state).unwrap();
        assert_eq!(get_session_status(&state).unwrap(), SessionStatus::Running);

        stop_session(&state).unwrap();
        assert_eq!(get_session_status(&state).unwrap(), SessionStatus::Terminated);
        assert!(get_last_error(&state).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(SessionStatus::Paused).unwrap();
        assert_eq!(json, "paused");
    }
}
