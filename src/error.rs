use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{capture::SessionState, capture::onboarding::OnboardingError};

/// Failures while creating or tearing down a capture folder.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("capture folder already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("failed to create {path}: {source}")]
    Creation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} does not exist after creation")]
    Missing(PathBuf),

    #[error("failed to remove {path}: {source}")]
    Removal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome taxonomy of a reconstruction run.
///
/// Only `Processing` is a user-facing failure. `Input` is reported back to the
/// caller that tried to start the run. Cancellation is not an error; the run
/// ends with a `Cancelled` event instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconstructionError {
    #[error("invalid reconstruction input: {0}")]
    Input(String),

    #[error("reconstruction failed: {0}")]
    Processing(String),
}

/// Errors surfaced by the orchestration facade to the presentation layer.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("object capture is not supported on this device")]
    UnsupportedDevice,

    #[error("capture storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to start capture: {0}")]
    CaptureStart(String),

    #[error("capture failed: {0}")]
    CaptureRuntime(String),

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),

    #[error(transparent)]
    Onboarding(#[from] OnboardingError),

    #[error("{action} is not valid while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error("no active capture session")]
    NoActiveSession,
}

impl CaptureError {
    /// Whether the error should reach the user through `onError`.
    pub fn is_user_facing(&self) -> bool {
        match self {
            CaptureError::Reconstruction(ReconstructionError::Input(_)) => false,
            CaptureError::InvalidState { .. } | CaptureError::NoActiveSession => false,
            CaptureError::Onboarding(_) => false,
            _ => true,
        }
    }
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_runtime_failures_are_user_facing() {
        assert!(CaptureError::CaptureRuntime("tracking lost".into()).is_user_facing());
        assert!(CaptureError::from(ReconstructionError::Processing("alignment".into()))
            .is_user_facing());
        assert!(!CaptureError::from(ReconstructionError::Input("no images".into()))
            .is_user_facing());
        assert!(!CaptureError::NoActiveSession.is_user_facing());
    }

    #[test]
    fn invalid_state_message_names_action_and_state() {
        let err = CaptureError::InvalidState {
            action: "finish",
            state: SessionState::Ready,
        };
        assert_eq!(err.to_string(), "finish is not valid while ready");
    }
}
