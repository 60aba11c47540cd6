//! Review-screen flow between orbits. Every state accepts a fixed set of
//! inputs; anything else is rejected.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CaptureMode, Orbit};

const ENABLE_LOGS: bool = true;

use crate::log_info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OnboardingState {
    Dismiss,
    TooFewImages,
    FirstSegment,
    FirstSegmentNeedsWork,
    FirstSegmentComplete,
    SecondSegment,
    SecondSegmentNeedsWork,
    SecondSegmentComplete,
    ThirdSegment,
    ThirdSegmentNeedsWork,
    ThirdSegmentComplete,
    FlipObject,
    FlipObjectASecondTime,
    FlippingObjectNotRecommended,
    CaptureFromLowerAngle,
    CaptureFromHigherAngle,
    Reconstruction,
    AdditionalOrbitOnCurrentSegment,
    CaptureInAreaMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum OnboardingInput {
    #[serde(rename_all = "camelCase")]
    Continue { is_flippable: bool },
    #[serde(rename_all = "camelCase")]
    Skip { is_flippable: bool },
    Finish,
    ObjectCannotBeFlipped,
    FlipObjectAnyway,
    SaveDraft,
}

/// Button pressed on a review screen. Flippability is filled in from the
/// capture session when the action becomes an [`OnboardingInput`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ReviewAction {
    Continue,
    Skip,
    Finish,
    ObjectCannotBeFlipped,
    FlipObjectAnyway,
    SaveDraft,
}

impl ReviewAction {
    pub fn input(self, is_flippable: bool) -> OnboardingInput {
        match self {
            ReviewAction::Continue => OnboardingInput::Continue { is_flippable },
            ReviewAction::Skip => OnboardingInput::Skip { is_flippable },
            ReviewAction::Finish => OnboardingInput::Finish,
            ReviewAction::ObjectCannotBeFlipped => OnboardingInput::ObjectCannotBeFlipped,
            ReviewAction::FlipObjectAnyway => OnboardingInput::FlipObjectAnyway,
            ReviewAction::SaveDraft => OnboardingInput::SaveDraft,
        }
    }
}

impl FromStr for ReviewAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(value.trim().to_string()))
            .map_err(|_| format!("unknown review action '{value}'"))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OnboardingError {
    #[error("no review transitions exist from {0:?}")]
    NoTransitionExists(OnboardingState),
    #[error("{input:?} is not accepted in {from:?}")]
    InvalidTransition {
        from: OnboardingState,
        input: OnboardingInput,
    },
    #[error("{0:?} is not a valid starting review state")]
    InvalidInitialState(OnboardingState),
}

const INITIAL_STATES: [OnboardingState; 8] = [
    OnboardingState::TooFewImages,
    OnboardingState::FirstSegmentNeedsWork,
    OnboardingState::FirstSegmentComplete,
    OnboardingState::SecondSegmentNeedsWork,
    OnboardingState::SecondSegmentComplete,
    OnboardingState::ThirdSegmentNeedsWork,
    OnboardingState::ThirdSegmentComplete,
    OnboardingState::CaptureInAreaMode,
];

fn either_continue() -> Vec<OnboardingInput> {
    vec![
        OnboardingInput::Continue { is_flippable: true },
        OnboardingInput::Continue { is_flippable: false },
    ]
}

fn only(input: OnboardingInput) -> Vec<OnboardingInput> {
    vec![input]
}

/// Ordered `(inputs, destination)` pairs for `state`, `None` when the state is
/// a leaf of the flow.
fn transitions(state: OnboardingState) -> Option<Vec<(Vec<OnboardingInput>, OnboardingState)>> {
    use OnboardingInput::*;
    use OnboardingState::*;

    let table = match state {
        TooFewImages => vec![(either_continue(), FirstSegment)],
        FirstSegmentNeedsWork => vec![
            (either_continue(), FirstSegment),
            (only(Skip { is_flippable: true }), FlipObject),
            (only(Skip { is_flippable: false }), FlippingObjectNotRecommended),
        ],
        FirstSegmentComplete => vec![
            (only(Finish), Reconstruction),
            (only(Continue { is_flippable: true }), FlipObject),
            (only(Continue { is_flippable: false }), FlippingObjectNotRecommended),
        ],
        FlipObject => vec![
            (either_continue(), SecondSegment),
            (only(ObjectCannotBeFlipped), CaptureFromLowerAngle),
        ],
        FlippingObjectNotRecommended => vec![
            (either_continue(), CaptureFromLowerAngle),
            (only(FlipObjectAnyway), FlipObject),
        ],
        CaptureFromLowerAngle => vec![
            (only(Finish), Reconstruction),
            (either_continue(), AdditionalOrbitOnCurrentSegment),
        ],
        SecondSegmentNeedsWork => vec![
            (either_continue(), Dismiss),
            (only(Skip { is_flippable: true }), FlipObjectASecondTime),
            (only(Skip { is_flippable: false }), CaptureFromHigherAngle),
        ],
        SecondSegmentComplete => vec![
            (only(Continue { is_flippable: true }), FlipObjectASecondTime),
            (only(Continue { is_flippable: false }), CaptureFromHigherAngle),
        ],
        FlipObjectASecondTime => vec![
            (only(Finish), Reconstruction),
            (either_continue(), ThirdSegment),
        ],
        CaptureFromHigherAngle => vec![
            (only(Finish), Reconstruction),
            (either_continue(), AdditionalOrbitOnCurrentSegment),
        ],
        ThirdSegmentNeedsWork => vec![(only(Finish), Reconstruction), (either_continue(), Dismiss)],
        ThirdSegmentComplete => vec![(only(Finish), Reconstruction)],
        CaptureInAreaMode => vec![(only(Finish), Reconstruction), (only(SaveDraft), Dismiss)],
        _ => return None,
    };
    Some(table)
}

/// Review state implied by the capture progress when the review screen opens.
pub fn review_entry_state(
    mode: CaptureMode,
    orbit: Orbit,
    shots: u32,
    min_num_images: u32,
    orbit_completed: bool,
) -> OnboardingState {
    if mode == CaptureMode::Area {
        return OnboardingState::CaptureInAreaMode;
    }
    if shots < min_num_images {
        return OnboardingState::TooFewImages;
    }
    match (orbit, orbit_completed) {
        (Orbit::Orbit1, true) => OnboardingState::FirstSegmentComplete,
        (Orbit::Orbit1, false) => OnboardingState::FirstSegmentNeedsWork,
        (Orbit::Orbit2, true) => OnboardingState::SecondSegmentComplete,
        (Orbit::Orbit2, false) => OnboardingState::SecondSegmentNeedsWork,
        (Orbit::Orbit3, true) => OnboardingState::ThirdSegmentComplete,
        (Orbit::Orbit3, false) => OnboardingState::ThirdSegmentNeedsWork,
    }
}

#[derive(Debug, Clone)]
pub struct OnboardingStateMachine {
    current: OnboardingState,
}

impl Default for OnboardingStateMachine {
    fn default() -> Self {
        Self {
            current: OnboardingState::FirstSegment,
        }
    }
}

impl OnboardingStateMachine {
    /// Starts at `state`, or at `FirstSegment` when `state` is not a valid entry point.
    pub fn new(state: OnboardingState) -> Self {
        if INITIAL_STATES.contains(&state) {
            Self { current: state }
        } else {
            Self::default()
        }
    }

    pub fn current(&self) -> OnboardingState {
        self.current
    }

    pub fn enter(&mut self, input: OnboardingInput) -> Result<OnboardingState, OnboardingError> {
        let table =
            transitions(self.current).ok_or(OnboardingError::NoTransitionExists(self.current))?;
        let destination = table
            .into_iter()
            .find(|(inputs, _)| inputs.contains(&input))
            .map(|(_, destination)| destination)
            .ok_or(OnboardingError::InvalidTransition {
                from: self.current,
                input,
            })?;

        log_info!("Onboarding state transition {:?} -> {:?}", self.current, destination);
        self.current = destination;
        Ok(destination)
    }

    /// Inputs accepted in the current state, in table order.
    pub fn current_inputs(&self) -> Vec<OnboardingInput> {
        transitions(self.current)
            .map(|table| table.into_iter().flat_map(|(inputs, _)| inputs).collect())
            .unwrap_or_default()
    }

    pub fn reset(&mut self, state: OnboardingState) -> Result<(), OnboardingError> {
        if !INITIAL_STATES.contains(&state) {
            return Err(OnboardingError::InvalidInitialState(state));
        }
        self.current = state;
        Ok(())
    }
}
