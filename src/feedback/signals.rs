use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureMode;

/// Capture-quality condition reported by the capture primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackSignal {
    ObjectTooFar,
    ObjectTooClose,
    EnvironmentTooDark,
    EnvironmentLowLight,
    MovingTooFast,
    OutOfFieldOfView,
    ObjectNotFlippable,
    OverCapturing,
}

pub type FeedbackSet = BTreeSet<FeedbackSignal>;

impl FeedbackSignal {
    /// Text shown to the user, `None` for signals that only drive capture logic
    /// or that are meaningless in the current mode.
    pub fn message(self, mode: CaptureMode) -> Option<&'static str> {
        match self {
            FeedbackSignal::ObjectTooFar if mode == CaptureMode::Area => None,
            FeedbackSignal::ObjectTooFar => Some("Move Closer"),
            FeedbackSignal::ObjectTooClose if mode == CaptureMode::Area => None,
            FeedbackSignal::ObjectTooClose => Some("Move Farther Away"),
            FeedbackSignal::EnvironmentTooDark => Some("More Light Required"),
            FeedbackSignal::EnvironmentLowLight => Some("More Light Recommended"),
            FeedbackSignal::MovingTooFast => Some("Move slower"),
            FeedbackSignal::OutOfFieldOfView => Some("Aim at your object"),
            FeedbackSignal::ObjectNotFlippable | FeedbackSignal::OverCapturing => None,
        }
    }
}

/// Signals that entered and left the active set between two updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackDelta {
    pub added: Vec<FeedbackSignal>,
    pub removed: Vec<FeedbackSignal>,
}

impl FeedbackDelta {
    pub fn between(previous: &FeedbackSet, current: &FeedbackSet) -> Self {
        Self {
            added: current.difference(previous).copied().collect(),
            removed: previous.difference(current).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
