//! Orchestration facade: the one handle the presentation layer talks to.
//!
//! It owns the live capture controller, the reconstruction job and the capture
//! folder, and routes every state change through [`AppDataModel::perform_transition`]
//! so their lifetimes always match the reported state.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::{
    bridge::EventBridge,
    capture::{
        CaptureEvent, CaptureEventSink, CaptureMode, CaptureSessionController, OnboardingInput,
        OnboardingState, OnboardingStateMachine, Orbit, ReviewAction, SessionState,
    },
    error::{CaptureError, Result},
    feedback::FeedbackAggregator,
    platform::{CaptureDevice, CaptureFailure, PlatformCaptureState, ReconstructionEngine},
    reconstruction::{
        DetailLevel, ReconstructionController, ReconstructionEvent, ReconstructionEventSink,
        ReconstructionJob,
    },
    settings::CaptureSettings,
    storage::SessionStorage,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Paths of a finished reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifacts {
    pub model_path: PathBuf,
    pub preview_path: PathBuf,
}

struct Shared {
    settings: CaptureSettings,
    device: Arc<dyn CaptureDevice>,
    engine: Arc<dyn ReconstructionEngine>,
    bridge: Arc<EventBridge>,
    feedback: FeedbackAggregator,
    state_tx: watch::Sender<SessionState>,
    image_count_tx: watch::Sender<u32>,
}

struct ModelInner {
    state: SessionState,
    mode: CaptureMode,
    /// Bumped whenever a capture session's listeners are retired.
    generation: u64,
    capture: Option<CaptureSessionController>,
    storage: Option<SessionStorage>,
    reconstruction: Option<ReconstructionController>,
    job_id: u64,
    save_draft: bool,
    /// Set only when a reconstruction run failed; the images are still a valid input.
    reconstruction_retryable: bool,
    overlay_sheets_shown: bool,
    review: Option<OnboardingStateMachine>,
    last_error: Option<String>,
    model: Option<ModelArtifacts>,
}

#[derive(Clone)]
pub struct AppDataModel {
    inner: Arc<Mutex<ModelInner>>,
    shared: Arc<Shared>,
}

impl AppDataModel {
    pub fn new(
        settings: CaptureSettings,
        device: Arc<dyn CaptureDevice>,
        engine: Arc<dyn ReconstructionEngine>,
        bridge: Arc<EventBridge>,
    ) -> Self {
        let feedback = FeedbackAggregator::new(settings.feedback_min_duration());
        let feedback_bridge = bridge.clone();
        feedback.set_observer(Arc::new(move |messages: &[String]| {
            feedback_bridge.feedback_changed(messages)
        }));

        let (state_tx, _) = watch::channel(SessionState::NotStarted);
        let (image_count_tx, _) = watch::channel(0);

        Self {
            inner: Arc::new(Mutex::new(ModelInner {
                state: SessionState::NotStarted,
                mode: CaptureMode::Object,
                generation: 0,
                capture: None,
                storage: None,
                reconstruction: None,
                job_id: 0,
                save_draft: false,
                reconstruction_retryable: false,
                overlay_sheets_shown: false,
                review: None,
                last_error: None,
                model: None,
            })),
            shared: Arc::new(Shared {
                settings,
                device,
                engine,
                bridge,
                feedback,
                state_tx,
                image_count_tx,
            }),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.shared.device.is_supported()
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.shared.settings
    }

    /// Latest state without waiting on in-flight actions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_image_count(&self) -> watch::Receiver<u32> {
        self.shared.image_count_tx.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    pub async fn capture_folder(&self) -> Option<PathBuf> {
        let inner = self.inner.lock().await;
        inner
            .storage
            .as_ref()
            .map(|storage| storage.capture_folder().to_path_buf())
    }

    pub async fn model(&self) -> Option<ModelArtifacts> {
        self.inner.lock().await.model.clone()
    }

    pub async fn capture_mode(&self) -> CaptureMode {
        self.inner.lock().await.mode
    }

    pub async fn orbit(&self) -> Option<Orbit> {
        let inner = self.inner.lock().await;
        inner.capture.as_ref().map(CaptureSessionController::orbit)
    }

    pub async fn visible_feedback(&self) -> Vec<String> {
        self.shared.feedback.visible_messages()
    }

    /// Shots taken in the live session, or frames on disk once capture has ended.
    pub async fn image_count(&self) -> u32 {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(capture) = inner.capture.as_mut() {
            let before = capture.shot_count();
            let count = capture.refresh_shot_count();
            if count > before {
                self.publish_shot_count(count);
            }
            return count;
        }
        inner
            .storage
            .as_ref()
            .map(|storage| storage.image_count() as u32)
            .unwrap_or(0)
    }

    /// Tears down whatever session is live, then allocates a capture folder and
    /// starts a fresh capture.
    pub async fn start_new_capture(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if !self.shared.device.is_supported() {
            log_warn!("Object capture is not supported on this device");
            return Err(CaptureError::UnsupportedDevice);
        }

        self.teardown(inner).await;

        let storage = match SessionStorage::create(&self.shared.settings.capture_root) {
            Ok(storage) => storage,
            Err(err) => {
                log_error!("Failed to create capture folder: {err}");
                inner.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };

        inner.generation += 1;
        let mut controller = CaptureSessionController::new(
            self.shared.device.create_session(),
            inner.mode,
            self.shared.settings.min_num_images,
        );
        controller.spawn_listeners(inner.generation, Arc::new(self.clone()));

        inner.save_draft = false;
        inner.reconstruction_retryable = false;
        inner.review = None;
        inner.model = None;
        inner.last_error = None;
        self.shared.bridge.reset();
        self.shared.feedback.clear();
        self.shared.image_count_tx.send_replace(0);
        self.perform_transition(inner, SessionState::Initializing);

        if let Err(err) = controller
            .start(storage.images_folder(), storage.checkpoint_folder())
            .await
        {
            log_error!("Failed to start capture session: {err}");
            drop(controller);
            inner.generation += 1;
            if let Err(cleanup) = storage.remove_all() {
                log_warn!("Failed to remove capture folder after start failure: {cleanup}");
            }
            inner.last_error = Some(err.to_string());
            self.perform_transition(inner, SessionState::Failed);
            return Err(err);
        }

        log_info!("Capture session started in {}", storage.capture_folder().display());
        inner.storage = Some(storage);
        inner.capture = Some(controller);
        Ok(())
    }

    /// `Ok(false)` when no object was found.
    pub async fn detect_object(&self) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let capture = live_capture(&mut guard, "detectObject", &[SessionState::Ready])?;
        capture.detect_object().await
    }

    pub async fn reset_detection(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let capture = live_capture(&mut guard, "resetDetection", &[SessionState::Detecting])?;
        capture.reset_detection().await;
        Ok(())
    }

    pub async fn begin_capture(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let allowed: &[SessionState] = if guard.mode == CaptureMode::Area {
            &[SessionState::Ready, SessionState::Detecting]
        } else {
            &[SessionState::Detecting]
        };
        let capture = live_capture(&mut guard, "beginCapture", allowed)?;
        capture.begin_capture().await;
        Ok(())
    }

    pub async fn begin_new_orbit_pass(&self, flipped: bool) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let capture = live_capture(
            &mut guard,
            "beginNewOrbitPass",
            &[SessionState::Ready, SessionState::Capturing],
        )?;
        capture.begin_new_orbit_pass(flipped).await;
        Ok(())
    }

    /// `Ok(false)` without any state change while too few shots have been taken.
    pub async fn finish(&self) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let capture = live_capture(
            &mut guard,
            "finish",
            &[SessionState::Ready, SessionState::Detecting, SessionState::Capturing],
        )?;
        Ok(capture.finish().await)
    }

    /// Finishes the capture now and skips reconstruction; the images stay on disk.
    pub async fn save_draft(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let capture = live_capture(
            inner,
            "saveDraft",
            &[SessionState::Ready, SessionState::Detecting, SessionState::Capturing],
        )?;
        capture.finish_now().await;
        inner.save_draft = true;
        Ok(())
    }

    /// Cancels whatever is live and returns to `ready`. Calling it again is a no-op.
    pub async fn cancel(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if let Some(mut capture) = inner.capture.take() {
            inner.generation += 1;
            capture.cancel().await;
            drop(capture);
            self.perform_transition(inner, SessionState::Restart);
            return Ok(());
        }

        match inner.state {
            SessionState::Reconstructing => {
                if let Some(job) = inner.reconstruction.as_ref() {
                    job.cancel();
                }
            }
            SessionState::Completed | SessionState::PrepareToReconstruct | SessionState::Failed => {
                self.perform_transition(inner, SessionState::Restart);
            }
            state => log_debug!("cancel while {state} has nothing to do"),
        }
        Ok(())
    }

    pub async fn start_reconstruction(&self, detail: DetailLevel) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let retry = inner.state == SessionState::Failed && inner.reconstruction_retryable;
        if inner.state != SessionState::PrepareToReconstruct && !retry {
            return Err(CaptureError::InvalidState {
                action: "startReconstruction",
                state: inner.state,
            });
        }
        let storage = inner.storage.clone().ok_or(CaptureError::NoActiveSession)?;

        let settings = &self.shared.settings;
        let job = ReconstructionJob {
            model_path: storage.model_path(&settings.model_file_name),
            preview_path: storage.preview_path(&settings.preview_file_name),
            storage,
            detail,
            object_masking: inner.mode == CaptureMode::Object,
            progress_delta: f64::from(settings.progress_report_delta),
            preview_max_dimension: settings.preview_max_dimension,
        };

        inner.job_id += 1;
        match ReconstructionController::start(
            self.shared.engine.as_ref(),
            inner.job_id,
            job,
            Arc::new(self.clone()),
        ) {
            Ok(controller) => {
                inner.reconstruction = Some(controller);
                inner.reconstruction_retryable = false;
                inner.last_error = None;
                self.perform_transition(inner, SessionState::Reconstructing);
                Ok(())
            }
            Err(err) => {
                log_warn!("Reconstruction rejected its input: {err}");
                inner.last_error = Some(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Requests cancellation and returns immediately; the run reports `restart`
    /// once the engine stops.
    pub async fn cancel_reconstruction(&self) {
        let inner = self.inner.lock().await;
        if let Some(job) = inner.reconstruction.as_ref() {
            job.cancel();
        }
    }

    /// Closes out a finished or failed session and returns to `ready`.
    pub async fn end_capture(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        match inner.state {
            SessionState::Viewing | SessionState::Failed | SessionState::PrepareToReconstruct => {
                self.perform_transition(inner, SessionState::Completed);
                Ok(())
            }
            state => Err(CaptureError::InvalidState {
                action: "endCapture",
                state,
            }),
        }
    }

    pub async fn remove_capture_folder(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.capture.is_some() || inner.state == SessionState::Reconstructing {
            return Err(CaptureError::InvalidState {
                action: "removeCaptureFolder",
                state: inner.state,
            });
        }
        if let Some(storage) = inner.storage.take() {
            storage.remove_all()?;
        }
        Ok(())
    }

    pub async fn set_capture_mode(&self, mode: CaptureMode) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.capture.is_some() {
            return Err(CaptureError::InvalidState {
                action: "setCaptureMode",
                state: inner.state,
            });
        }
        inner.mode = mode;
        Ok(())
    }

    /// Overlay sheets cover the camera, so the capture is paused while they show.
    pub async fn set_overlay_sheets_shown(&self, shown: bool) {
        let mut inner = self.inner.lock().await;
        if inner.overlay_sheets_shown == shown {
            return;
        }
        inner.overlay_sheets_shown = shown;
        if let Some(capture) = inner.capture.as_ref() {
            if shown {
                capture.pause().await;
            } else {
                capture.resume().await;
            }
        }
    }

    /// Called when the host is about to exit. An unfinished capture leaves nothing behind.
    pub async fn handle_app_termination(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.generation += 1;
        if let Some(job) = inner.reconstruction.take() {
            job.cancel();
        }
        let was_capturing = match inner.capture.take() {
            Some(mut capture) => {
                capture.cancel().await;
                true
            }
            None => false,
        };
        if was_capturing || inner.state.is_capture_phase() {
            if let Some(storage) = inner.storage.take() {
                if let Err(err) = storage.remove_all() {
                    log_warn!("Failed to remove capture folder on termination: {err}");
                }
            }
        }
    }

    /// Opens the review flow at the state implied by the capture progress.
    pub async fn begin_review(&self) -> Result<OnboardingState> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let capture = inner.capture.as_mut().ok_or(CaptureError::NoActiveSession)?;
        let machine = OnboardingStateMachine::new(capture.review_entry_state());
        let current = machine.current();
        inner.review = Some(machine);
        Ok(current)
    }

    pub async fn review_inputs(&self) -> Vec<OnboardingInput> {
        let inner = self.inner.lock().await;
        inner
            .review
            .as_ref()
            .map(OnboardingStateMachine::current_inputs)
            .unwrap_or_default()
    }

    /// Feeds a review button press through the flow and performs what the
    /// destination screen implies for the capture.
    pub async fn review_action(&self, action: ReviewAction) -> Result<OnboardingState> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let state = inner.state;
        let capture = inner.capture.as_mut().ok_or(CaptureError::NoActiveSession)?;
        let review = inner.review.as_mut().ok_or(CaptureError::InvalidState {
            action: "reviewAction",
            state,
        })?;

        match action {
            ReviewAction::ObjectCannotBeFlipped => capture.indicate_object_cannot_be_flipped(),
            ReviewAction::FlipObjectAnyway => capture.indicate_flip_object_anyway(),
            _ => {}
        }
        let input = action.input(capture.is_object_flippable());
        let next = review.enter(input)?;

        match next {
            OnboardingState::Dismiss | OnboardingState::FirstSegment => {
                inner.review = None;
            }
            OnboardingState::SecondSegment
            | OnboardingState::ThirdSegment
            | OnboardingState::AdditionalOrbitOnCurrentSegment => {
                inner.review = None;
                let flipped = capture.is_object_flippable();
                capture.begin_new_orbit_pass(flipped).await;
            }
            OnboardingState::Reconstruction => {
                inner.review = None;
                capture.finish_now().await;
            }
            _ => {}
        }
        if input == OnboardingInput::SaveDraft {
            inner.save_draft = true;
            capture.finish_now().await;
        }
        Ok(next)
    }

    /// Single dispatch point for state changes. Applies the side effects of
    /// entering each state and follows any automatic transition it implies.
    fn perform_transition(&self, inner: &mut ModelInner, to: SessionState) {
        let mut next = Some(to);
        while let Some(to) = next.take() {
            let from = inner.state;
            if from == to {
                continue;
            }
            log_info!("State transition {from} -> {to}");
            inner.state = to;
            self.shared.state_tx.send_replace(to);
            self.shared.bridge.state_changed(to);
            next = self.enter_state(inner, from, to);
        }
    }

    fn enter_state(
        &self,
        inner: &mut ModelInner,
        from: SessionState,
        to: SessionState,
    ) -> Option<SessionState> {
        match to {
            SessionState::Completed => {
                self.release_capture(inner);
                if !from.is_capture_phase() {
                    // A finished model or an unreconstructed capture stays on disk
                    // once closed. A capture that broke mid-session is not kept.
                    if from == SessionState::Failed && !inner.reconstruction_retryable {
                        if let Some(storage) = inner.storage.take() {
                            if let Err(err) = storage.remove_all() {
                                log_warn!("Failed to remove failed capture folder: {err}");
                            }
                        }
                    }
                    self.reset_session(inner);
                    return Some(SessionState::Ready);
                }
                if std::mem::take(&mut inner.save_draft) {
                    if let Some(storage) = inner.storage.as_ref() {
                        log_info!("Draft kept in {}", storage.capture_folder().display());
                    }
                    self.reset_session(inner);
                    return Some(SessionState::Ready);
                }
                Some(SessionState::PrepareToReconstruct)
            }
            SessionState::Viewing => {
                inner.reconstruction = None;
                if let Some(storage) = inner.storage.as_ref() {
                    let reclaimed = if self.shared.settings.retain_images_after_reconstruction {
                        storage.remove_checkpoint()
                    } else {
                        storage.remove_scratch()
                    };
                    if let Err(err) = reclaimed {
                        log_warn!("Failed to reclaim reconstruction scratch data: {err}");
                    }
                }
                if let Some(model) = inner.model.as_ref() {
                    self.shared
                        .bridge
                        .model_complete(&model.model_path, &model.preview_path);
                }
                None
            }
            SessionState::Failed => {
                inner.reconstruction = None;
                self.release_capture(inner);
                None
            }
            SessionState::Restart => {
                if let Some(job) = inner.reconstruction.take() {
                    job.cancel();
                }
                self.release_capture(inner);
                if let Some(storage) = inner.storage.take() {
                    if let Err(err) = storage.remove_all() {
                        log_warn!("Failed to remove cancelled capture folder: {err}");
                    }
                }
                self.reset_session(inner);
                Some(SessionState::Ready)
            }
            _ => None,
        }
    }

    async fn teardown(&self, inner: &mut ModelInner) {
        inner.generation += 1;
        if let Some(job) = inner.reconstruction.take() {
            job.cancel();
        }
        if let Some(mut capture) = inner.capture.take() {
            log_info!("Tearing down the live capture session before starting a new one");
            capture.cancel().await;
        }
        // Drafts and closed sessions no longer hold storage. A viewed model is
        // kept the same way `end_capture` keeps it; anything else is abandoned.
        if let Some(storage) = inner.storage.take() {
            if inner.state == SessionState::Viewing {
                log_info!("Keeping model in {}", storage.capture_folder().display());
            } else if let Err(err) = storage.remove_all() {
                log_warn!("Failed to remove abandoned capture folder: {err}");
            }
        }
        inner.review = None;
    }

    fn release_capture(&self, inner: &mut ModelInner) {
        if let Some(mut capture) = inner.capture.take() {
            capture.stop_listeners();
        }
        inner.generation += 1;
        inner.review = None;
        self.shared.feedback.clear();
    }

    fn reset_session(&self, inner: &mut ModelInner) {
        inner.storage = None;
        inner.review = None;
        inner.save_draft = false;
        inner.reconstruction_retryable = false;
        inner.model = None;
        self.shared.bridge.reset();
        self.shared.image_count_tx.send_replace(0);
    }

    fn publish_shot_count(&self, count: u32) {
        self.shared.image_count_tx.send_replace(count);
        self.shared.bridge.shot_count_changed(count);
    }

    fn apply_platform_state(&self, inner: &mut ModelInner, state: PlatformCaptureState) {
        if let PlatformCaptureState::Failed(CaptureFailure::Other(message)) = &state {
            inner.reconstruction_retryable = false;
            self.report_failure(inner, &CaptureError::CaptureRuntime(message.clone()));
        }
        self.perform_transition(inner, SessionState::from(&state));
    }

    /// Records a failure and forwards it to `onError` if the user should see it.
    fn report_failure(&self, inner: &mut ModelInner, err: &CaptureError) {
        log_error!("{err}");
        inner.last_error = Some(err.to_string());
        if err.is_user_facing() {
            self.shared.bridge.error(&err.to_string());
        }
    }
}

/// The live capture controller, if the primitive is in one of `allowed`.
fn live_capture<'a>(
    inner: &'a mut ModelInner,
    action: &'static str,
    allowed: &[SessionState],
) -> Result<&'a mut CaptureSessionController> {
    let state = inner.state;
    let capture = inner
        .capture
        .as_mut()
        .ok_or(CaptureError::InvalidState { action, state })?;
    let platform_state = SessionState::from(&capture.platform_state());
    if !allowed.contains(&platform_state) {
        return Err(CaptureError::InvalidState {
            action,
            state: platform_state,
        });
    }
    Ok(capture)
}

#[async_trait]
impl CaptureEventSink for AppDataModel {
    async fn on_capture_event(&self, generation: u64, event: CaptureEvent) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if generation != inner.generation {
            log_debug!("Ignoring {event:?} from retired capture session {generation}");
            return;
        }
        match event {
            CaptureEvent::State(state) => self.apply_platform_state(inner, state),
            CaptureEvent::ShotCount(count) => {
                let Some(capture) = inner.capture.as_mut() else {
                    return;
                };
                if let Some(count) = capture.observe_shot_count(count) {
                    self.publish_shot_count(count);
                }
            }
            CaptureEvent::Feedback(set) => {
                let Some(capture) = inner.capture.as_mut() else {
                    return;
                };
                if let Some(delta) = capture.diff_feedback(set) {
                    log_debug!("Feedback delta {delta:?}");
                    self.shared.feedback.apply(&delta, capture.mode());
                }
            }
        }
    }
}

#[async_trait]
impl ReconstructionEventSink for AppDataModel {
    async fn on_reconstruction_event(&self, job_id: u64, event: ReconstructionEvent) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let Some(job) = inner.reconstruction.as_ref() else {
            log_debug!("Ignoring {event:?}, no reconstruction is running");
            return;
        };
        if job.id() != job_id {
            log_debug!("Ignoring {event:?} from retired reconstruction {job_id}");
            return;
        }

        match event {
            ReconstructionEvent::Progress(update) => {
                if inner.state == SessionState::Reconstructing && !job.is_cancelled() {
                    self.shared.bridge.processing_progress(&update);
                }
            }
            ReconstructionEvent::Completed {
                model_path,
                preview_path,
            } => {
                inner.model = Some(ModelArtifacts {
                    model_path,
                    preview_path,
                });
                self.perform_transition(inner, SessionState::Viewing);
            }
            ReconstructionEvent::Failed(err) => {
                self.report_failure(inner, &CaptureError::from(err));
                inner.reconstruction_retryable = true;
                self.perform_transition(inner, SessionState::Failed);
            }
            ReconstructionEvent::Cancelled => {
                inner.reconstruction = None;
                self.perform_transition(inner, SessionState::Restart);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::ChannelEmitter,
        platform::simulated::{SimulatedDevice, SimulatedEngine},
    };

    fn model(root: &std::path::Path, device: Arc<SimulatedDevice>) -> AppDataModel {
        let (emitter, _rx) = ChannelEmitter::new();
        AppDataModel::new(
            CaptureSettings::default().with_capture_root(root),
            device,
            Arc::new(SimulatedEngine::scripted(SimulatedEngine::successful_run())),
            Arc::new(EventBridge::new(Arc::new(emitter))),
        )
    }

    #[tokio::test]
    async fn actions_outside_their_state_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let model = model(root.path(), Arc::new(SimulatedDevice::new()));

        let err = model.detect_object().await.unwrap_err();
        assert!(matches!(err, CaptureError::InvalidState { action: "detectObject", .. }));

        model.start_new_capture().await.unwrap();
        let err = model.reset_detection().await.unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidState {
                action: "resetDetection",
                state: SessionState::Ready
            }
        ));
        let err = model.start_reconstruction(DetailLevel::Low).await.unwrap_err();
        assert!(matches!(err, CaptureError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn capture_mode_is_fixed_while_capturing() {
        let root = tempfile::tempdir().unwrap();
        let model = model(root.path(), Arc::new(SimulatedDevice::new()));
        model.set_capture_mode(CaptureMode::Area).await.unwrap();
        model.start_new_capture().await.unwrap();
        assert!(model.set_capture_mode(CaptureMode::Object).await.is_err());
        assert_eq!(model.capture_mode().await, CaptureMode::Area);
    }

    #[tokio::test]
    async fn overlay_sheets_pause_and_resume_capture() {
        let root = tempfile::tempdir().unwrap();
        let device = Arc::new(SimulatedDevice::new());
        let model = model(root.path(), device.clone());
        model.start_new_capture().await.unwrap();

        model.set_overlay_sheets_shown(true).await;
        model.set_overlay_sheets_shown(true).await;
        model.set_overlay_sheets_shown(false).await;

        let calls = device.last_session().unwrap().calls();
        assert_eq!(calls, vec!["start", "pause", "resume"]);
    }

    #[tokio::test]
    async fn termination_mid_capture_removes_the_folder() {
        let root = tempfile::tempdir().unwrap();
        let model = model(root.path(), Arc::new(SimulatedDevice::new()));
        model.start_new_capture().await.unwrap();
        let folder = model.capture_folder().await.unwrap();
        assert!(folder.is_dir());

        model.handle_app_termination().await;
        assert!(!folder.exists());
    }

    #[tokio::test]
    async fn review_flow_flips_into_second_orbit() {
        let root = tempfile::tempdir().unwrap();
        let device = Arc::new(SimulatedDevice::new());
        let model = model(root.path(), device.clone());
        model.start_new_capture().await.unwrap();
        model.detect_object().await.unwrap();
        model.begin_capture().await.unwrap();

        let session = device.last_session().unwrap();
        session.take_shots(12);
        session.set_user_completed_scan_pass(true);

        assert_eq!(
            model.begin_review().await.unwrap(),
            OnboardingState::FirstSegmentComplete
        );
        assert_eq!(
            model.review_action(ReviewAction::Continue).await.unwrap(),
            OnboardingState::FlipObject
        );
        assert_eq!(
            model.review_action(ReviewAction::Continue).await.unwrap(),
            OnboardingState::SecondSegment
        );
        assert_eq!(model.orbit().await, Some(Orbit::Orbit2));
        assert!(session.calls().contains(&"begin_new_scan_pass_after_flip"));
        assert!(model.review_inputs().await.is_empty());
    }

    #[tokio::test]
    async fn object_that_cannot_be_flipped_gets_a_same_side_orbit() {
        let root = tempfile::tempdir().unwrap();
        let device = Arc::new(SimulatedDevice::new());
        let model = model(root.path(), device.clone());
        model.start_new_capture().await.unwrap();
        model.detect_object().await.unwrap();
        model.begin_capture().await.unwrap();

        let session = device.last_session().unwrap();
        session.take_shots(12);
        session.set_user_completed_scan_pass(true);

        model.begin_review().await.unwrap();
        model.review_action(ReviewAction::Continue).await.unwrap();
        assert_eq!(
            model
                .review_action(ReviewAction::ObjectCannotBeFlipped)
                .await
                .unwrap(),
            OnboardingState::CaptureFromLowerAngle
        );
        assert_eq!(
            model.review_action(ReviewAction::Continue).await.unwrap(),
            OnboardingState::AdditionalOrbitOnCurrentSegment
        );

        assert_eq!(model.orbit().await, Some(Orbit::Orbit2));
        let calls = session.calls();
        assert!(calls.contains(&"begin_new_scan_pass"));
        assert!(!calls.contains(&"begin_new_scan_pass_after_flip"));
    }

    #[tokio::test]
    async fn review_input_outside_the_flow_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let device = Arc::new(SimulatedDevice::new());
        let model = model(root.path(), device.clone());
        model.start_new_capture().await.unwrap();
        device.last_session().unwrap().take_shots(2);

        assert_eq!(model.begin_review().await.unwrap(), OnboardingState::TooFewImages);
        let err = model.review_action(ReviewAction::Finish).await.unwrap_err();
        assert!(matches!(err, CaptureError::Onboarding(_)));
    }
}
