pub mod controller;
pub mod onboarding;
pub mod state;

pub use controller::{CaptureEvent, CaptureEventSink, CaptureSessionController};
pub use onboarding::{
    OnboardingError, OnboardingInput, OnboardingState, OnboardingStateMachine, ReviewAction,
};
pub use state::{CaptureMode, Orbit, SessionState};
