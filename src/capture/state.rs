use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::platform::{CaptureFailure, PlatformCaptureState};

/// Externally observable session state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    NotStarted,
    Initializing,
    Ready,
    Detecting,
    Capturing,
    Finishing,
    Completed,
    PrepareToReconstruct,
    Reconstructing,
    Viewing,
    Restart,
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::NotStarted
    }
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::NotStarted => "notStarted",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Detecting => "detecting",
            SessionState::Capturing => "capturing",
            SessionState::Finishing => "finishing",
            SessionState::Completed => "completed",
            SessionState::PrepareToReconstruct => "prepareToReconstruct",
            SessionState::Reconstructing => "reconstructing",
            SessionState::Viewing => "viewing",
            SessionState::Restart => "restart",
            SessionState::Failed => "failed",
        }
    }

    /// States in which a capture primitive is live.
    pub fn is_capture_phase(self) -> bool {
        matches!(
            self,
            SessionState::Initializing
                | SessionState::Ready
                | SessionState::Detecting
                | SessionState::Capturing
                | SessionState::Finishing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&PlatformCaptureState> for SessionState {
    fn from(state: &PlatformCaptureState) -> Self {
        match state {
            PlatformCaptureState::Initializing => SessionState::Initializing,
            PlatformCaptureState::Ready => SessionState::Ready,
            PlatformCaptureState::Detecting => SessionState::Detecting,
            PlatformCaptureState::Capturing => SessionState::Capturing,
            PlatformCaptureState::Finishing => SessionState::Finishing,
            PlatformCaptureState::Completed => SessionState::Completed,
            PlatformCaptureState::Failed(CaptureFailure::Cancelled) => SessionState::Restart,
            PlatformCaptureState::Failed(CaptureFailure::Other(_)) => SessionState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    Object,
    Area,
}

impl Default for CaptureMode {
    fn default() -> Self {
        CaptureMode::Object
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "object" => Ok(CaptureMode::Object),
            "area" => Ok(CaptureMode::Area),
            other => Err(format!("unknown capture mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Orbit {
    Orbit1,
    Orbit2,
    Orbit3,
}

impl Default for Orbit {
    fn default() -> Self {
        Orbit::Orbit1
    }
}

impl Orbit {
    /// The following orbit; the last one stays put.
    pub fn next(self) -> Self {
        match self {
            Orbit::Orbit1 => Orbit::Orbit2,
            Orbit::Orbit2 | Orbit::Orbit3 => Orbit::Orbit3,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Orbit::Orbit1 => 1,
            Orbit::Orbit2 => 2,
            Orbit::Orbit3 => 3,
        }
    }
}
