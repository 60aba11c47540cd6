use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{
    onboarding::{review_entry_state, OnboardingState},
    CaptureMode, Orbit,
};
use crate::{
    error::{CaptureError, Result},
    feedback::{FeedbackDelta, FeedbackSet, FeedbackSignal},
    platform::{CaptureConfiguration, ObjectCaptureSession, PlatformCaptureState},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Update pushed by the capture primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    State(PlatformCaptureState),
    ShotCount(u32),
    Feedback(FeedbackSet),
}

/// Receives capture updates tagged with the session generation that produced them.
#[async_trait]
pub trait CaptureEventSink: Send + Sync + 'static {
    async fn on_capture_event(&self, generation: u64, event: CaptureEvent);
}

/// Drives one guided capture session on top of the platform primitive.
pub struct CaptureSessionController {
    session: Arc<dyn ObjectCaptureSession>,
    mode: CaptureMode,
    orbit: Orbit,
    min_num_images: u32,
    shot_count: u32,
    feedback: FeedbackSet,
    is_object_flipped: bool,
    has_indicated_object_cannot_be_flipped: bool,
    has_indicated_flip_object_anyway: bool,
    listeners: Option<CancellationToken>,
}

impl CaptureSessionController {
    pub fn new(session: Arc<dyn ObjectCaptureSession>, mode: CaptureMode, min_num_images: u32) -> Self {
        Self {
            session,
            mode,
            orbit: Orbit::Orbit1,
            min_num_images,
            shot_count: 0,
            feedback: FeedbackSet::new(),
            is_object_flipped: false,
            has_indicated_object_cannot_be_flipped: false,
            has_indicated_flip_object_anyway: false,
            listeners: None,
        }
    }

    /// Starts the state and feedback listener loops. Both stop together when
    /// [`stop_listeners`](Self::stop_listeners) is called or the controller is dropped.
    pub fn spawn_listeners(&mut self, generation: u64, sink: Arc<dyn CaptureEventSink>) {
        self.stop_listeners();
        let token = CancellationToken::new();

        let mut states = self.session.state_updates();
        let mut shots = self.session.shot_count_updates();
        let state_token = token.clone();
        let state_sink = sink.clone();
        tokio::spawn(async move {
            let mut shots_open = true;
            loop {
                let event = tokio::select! {
                    _ = state_token.cancelled() => break,
                    state = states.next() => match state {
                        Some(state) => CaptureEvent::State(state),
                        None => break,
                    },
                    count = shots.next(), if shots_open => match count {
                        Some(count) => CaptureEvent::ShotCount(count),
                        None => {
                            shots_open = false;
                            continue;
                        }
                    },
                };
                state_sink.on_capture_event(generation, event).await;
            }
            log_debug!("capture state listener {generation} stopped");
        });

        let mut feedback = self.session.feedback_updates();
        let feedback_token = token.clone();
        tokio::spawn(async move {
            loop {
                let set = tokio::select! {
                    _ = feedback_token.cancelled() => break,
                    set = feedback.next() => match set {
                        Some(set) => set,
                        None => break,
                    },
                };
                sink.on_capture_event(generation, CaptureEvent::Feedback(set)).await;
            }
            log_debug!("capture feedback listener {generation} stopped");
        });

        self.listeners = Some(token);
    }

    pub fn stop_listeners(&mut self) {
        if let Some(token) = self.listeners.take() {
            token.cancel();
        }
    }

    pub async fn start(&self, images: &Path, checkpoint: &Path) -> Result<()> {
        let config = CaptureConfiguration {
            is_over_capture_enabled: true,
            checkpoint_directory: checkpoint.to_path_buf(),
        };
        self.session
            .start(images, config)
            .await
            .map_err(|err| CaptureError::CaptureStart(err.to_string()))
    }

    /// Begins bounding-box detection, or capturing right away in area mode.
    /// `Ok(false)` means no object was found.
    pub async fn detect_object(&self) -> Result<bool> {
        if self.mode == CaptureMode::Area {
            self.session.start_capturing().await;
            return Ok(true);
        }
        self.session
            .start_detecting()
            .await
            .map_err(|err| CaptureError::CaptureRuntime(err.to_string()))
    }

    pub async fn reset_detection(&self) {
        self.session.reset_detection().await;
    }

    pub async fn begin_capture(&self) {
        self.session.start_capturing().await;
    }

    pub async fn begin_new_orbit_pass(&mut self, flipped: bool) {
        if flipped {
            self.is_object_flipped = true;
            self.session.begin_new_scan_pass_after_flip().await;
        } else {
            self.session.begin_new_scan_pass().await;
        }
        self.orbit = self.orbit.next();
        log_info!(
            "Starting orbit {} (flipped: {})",
            self.orbit.index(),
            self.is_object_flipped
        );
    }

    /// Asks the primitive to wrap up. Returns `false` without side effects while
    /// fewer than the minimum number of shots have been taken.
    pub async fn finish(&mut self) -> bool {
        let shots = self.refresh_shot_count();
        if shots < self.min_num_images {
            log_info!(
                "Ignoring finish with {shots} shots, {} required",
                self.min_num_images
            );
            return false;
        }
        self.session.finish().await;
        true
    }

    /// Finishes regardless of the shot count.
    pub async fn finish_now(&self) {
        self.session.finish().await;
    }

    /// Tears the listeners down, then waits for the primitive to acknowledge.
    pub async fn cancel(&mut self) {
        self.stop_listeners();
        self.session.cancel().await;
    }

    pub async fn pause(&self) {
        self.session.pause().await;
    }

    pub async fn resume(&self) {
        self.session.resume().await;
    }

    pub fn platform_state(&self) -> PlatformCaptureState {
        self.session.state()
    }

    /// Records the incoming signal set and returns what changed, `None` when nothing did.
    pub fn diff_feedback(&mut self, set: FeedbackSet) -> Option<FeedbackDelta> {
        let delta = FeedbackDelta::between(&self.feedback, &set);
        self.feedback = set;
        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    /// Returns the new count when it grew.
    pub fn observe_shot_count(&mut self, count: u32) -> Option<u32> {
        if count <= self.shot_count {
            return None;
        }
        self.shot_count = count;
        Some(count)
    }

    /// Pulls the count from the primitive, never letting it go backwards.
    pub fn refresh_shot_count(&mut self) -> u32 {
        let count = self.session.number_of_shots_taken();
        self.observe_shot_count(count);
        self.shot_count
    }

    pub fn shot_count(&self) -> u32 {
        self.shot_count
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn orbit(&self) -> Orbit {
        self.orbit
    }

    pub fn is_object_flipped(&self) -> bool {
        self.is_object_flipped
    }

    pub fn indicate_object_cannot_be_flipped(&mut self) {
        self.has_indicated_object_cannot_be_flipped = true;
        self.has_indicated_flip_object_anyway = false;
    }

    pub fn indicate_flip_object_anyway(&mut self) {
        self.has_indicated_flip_object_anyway = true;
        self.has_indicated_object_cannot_be_flipped = false;
    }

    /// The user's explicit choice wins over what the primitive reports.
    pub fn is_object_flippable(&self) -> bool {
        if self.has_indicated_object_cannot_be_flipped {
            return false;
        }
        if self.has_indicated_flip_object_anyway {
            return true;
        }
        !self.session.feedback().contains(&FeedbackSignal::ObjectNotFlippable)
            && !self.feedback.contains(&FeedbackSignal::ObjectNotFlippable)
    }

    /// Where the review flow should open given the progress so far.
    pub fn review_entry_state(&mut self) -> OnboardingState {
        let shots = self.refresh_shot_count();
        review_entry_state(
            self.mode,
            self.orbit,
            shots,
            self.min_num_images,
            self.session.user_completed_scan_pass(),
        )
    }
}

impl Drop for CaptureSessionController {
    fn drop(&mut self) {
        self.stop_listeners();
    }
}
