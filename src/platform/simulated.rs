//! In-process stand-ins for the platform capabilities. The headless binary and
//! the test suites drive sessions through these.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures::{
    channel::mpsc::{unbounded, UnboundedSender},
    stream::{BoxStream, StreamExt},
};

use super::{
    CaptureConfiguration, CaptureDevice, CaptureFailure, ObjectCaptureSession, PhotogrammetrySession,
    PlatformCaptureState, PlatformError, ReconstructionConfiguration, ReconstructionEngine,
    ReconstructionOutput, ReconstructionRequest,
};
use crate::feedback::FeedbackSet;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fan-out of a value to every subscriber still listening.
struct Broadcast<T> {
    senders: Vec<UnboundedSender<T>>,
}

impl<T: Clone + Send + 'static> Broadcast<T> {
    fn new() -> Self {
        Self {
            senders: Vec::new(),
        }
    }

    fn subscribe(&mut self) -> BoxStream<'static, T> {
        let (tx, rx) = unbounded();
        self.senders.push(tx);
        rx.boxed()
    }

    fn send(&mut self, value: T) {
        self.senders
            .retain(|sender| sender.unbounded_send(value.clone()).is_ok());
    }

    fn close(&mut self) {
        self.senders.clear();
    }
}

pub struct SimulatedDevice {
    supported: bool,
    fail_start: Option<String>,
    detects_object: bool,
    sessions: Mutex<Vec<Arc<SimulatedCaptureSession>>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self {
            supported: true,
            fail_start: None,
            detects_object: true,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Sessions created by this device refuse to start.
    pub fn failing_start(message: impl Into<String>) -> Self {
        Self {
            fail_start: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn without_object(mut self) -> Self {
        self.detects_object = false;
        self
    }

    pub fn sessions_created(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn last_session(&self) -> Option<Arc<SimulatedCaptureSession>> {
        lock(&self.sessions).last().cloned()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for SimulatedDevice {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn create_session(&self) -> Arc<dyn ObjectCaptureSession> {
        let session = Arc::new(SimulatedCaptureSession::new(
            self.fail_start.clone(),
            self.detects_object,
        ));
        lock(&self.sessions).push(session.clone());
        session
    }
}

struct CaptureInner {
    state: PlatformCaptureState,
    shots: u32,
    user_completed_scan_pass: bool,
    feedback: FeedbackSet,
    images: Option<PathBuf>,
    config: Option<CaptureConfiguration>,
    calls: Vec<&'static str>,
    states: Broadcast<PlatformCaptureState>,
    shot_counts: Broadcast<u32>,
    feedbacks: Broadcast<FeedbackSet>,
}

pub struct SimulatedCaptureSession {
    fail_start: Option<String>,
    detects_object: bool,
    inner: Mutex<CaptureInner>,
}

impl SimulatedCaptureSession {
    fn new(fail_start: Option<String>, detects_object: bool) -> Self {
        Self {
            fail_start,
            detects_object,
            inner: Mutex::new(CaptureInner {
                state: PlatformCaptureState::Initializing,
                shots: 0,
                user_completed_scan_pass: false,
                feedback: FeedbackSet::new(),
                images: None,
                config: None,
                calls: Vec::new(),
                states: Broadcast::new(),
                shot_counts: Broadcast::new(),
                feedbacks: Broadcast::new(),
            }),
        }
    }

    /// Publishes a new state to every listener.
    pub fn set_state(&self, state: PlatformCaptureState) {
        let mut inner = lock(&self.inner);
        log_debug!("simulated capture {:?} -> {:?}", inner.state, state);
        inner.state = state.clone();
        inner.states.send(state);
    }

    pub fn set_feedback(&self, feedback: FeedbackSet) {
        let mut inner = lock(&self.inner);
        inner.feedback = feedback.clone();
        inner.feedbacks.send(feedback);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.set_state(PlatformCaptureState::Failed(CaptureFailure::Other(message.into())));
    }

    pub fn set_user_completed_scan_pass(&self, completed: bool) {
        lock(&self.inner).user_completed_scan_pass = completed;
    }

    /// Writes `count` frames into the images folder and publishes the new total.
    pub fn take_shots(&self, count: u32) {
        let mut inner = lock(&self.inner);
        for _ in 0..count {
            inner.shots += 1;
            if let Some(images) = &inner.images {
                let frame = images.join(format!("IMG_{:04}.HEIC", inner.shots));
                if let Err(err) = fs::write(&frame, simulated_frame()) {
                    log_warn!("Failed to write simulated frame {}: {err}", frame.display());
                }
            }
        }
        let shots = inner.shots;
        inner.shot_counts.send(shots);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.inner).calls.clone()
    }

    pub fn configuration(&self) -> Option<CaptureConfiguration> {
        lock(&self.inner).config.clone()
    }

    fn record(&self, call: &'static str) {
        lock(&self.inner).calls.push(call);
    }
}

#[async_trait]
impl ObjectCaptureSession for SimulatedCaptureSession {
    async fn start(&self, images: &Path, config: CaptureConfiguration) -> Result<(), PlatformError> {
        self.record("start");
        if let Some(message) = &self.fail_start {
            return Err(PlatformError::new(message.clone()));
        }
        {
            let mut inner = lock(&self.inner);
            inner.images = Some(images.to_path_buf());
            inner.config = Some(config);
        }
        self.set_state(PlatformCaptureState::Ready);
        Ok(())
    }

    async fn start_detecting(&self) -> Result<bool, PlatformError> {
        self.record("start_detecting");
        if !self.detects_object {
            return Ok(false);
        }
        self.set_state(PlatformCaptureState::Detecting);
        Ok(true)
    }

    async fn reset_detection(&self) {
        self.record("reset_detection");
        self.set_state(PlatformCaptureState::Ready);
    }

    async fn start_capturing(&self) {
        self.record("start_capturing");
        self.set_state(PlatformCaptureState::Capturing);
    }

    async fn begin_new_scan_pass(&self) {
        self.record("begin_new_scan_pass");
        lock(&self.inner).user_completed_scan_pass = false;
    }

    async fn begin_new_scan_pass_after_flip(&self) {
        self.record("begin_new_scan_pass_after_flip");
        lock(&self.inner).user_completed_scan_pass = false;
        self.set_state(PlatformCaptureState::Ready);
    }

    async fn finish(&self) {
        self.record("finish");
        self.set_state(PlatformCaptureState::Finishing);
        self.set_state(PlatformCaptureState::Completed);
    }

    async fn cancel(&self) {
        self.record("cancel");
        if matches!(self.state(), PlatformCaptureState::Failed(_)) {
            return;
        }
        self.set_state(PlatformCaptureState::Failed(CaptureFailure::Cancelled));
    }

    async fn pause(&self) {
        self.record("pause");
    }

    async fn resume(&self) {
        self.record("resume");
    }

    fn state(&self) -> PlatformCaptureState {
        lock(&self.inner).state.clone()
    }

    fn number_of_shots_taken(&self) -> u32 {
        lock(&self.inner).shots
    }

    fn user_completed_scan_pass(&self) -> bool {
        lock(&self.inner).user_completed_scan_pass
    }

    fn feedback(&self) -> FeedbackSet {
        lock(&self.inner).feedback.clone()
    }

    fn state_updates(&self) -> BoxStream<'static, PlatformCaptureState> {
        lock(&self.inner).states.subscribe()
    }

    fn shot_count_updates(&self) -> BoxStream<'static, u32> {
        lock(&self.inner).shot_counts.subscribe()
    }

    fn feedback_updates(&self) -> BoxStream<'static, FeedbackSet> {
        lock(&self.inner).feedbacks.subscribe()
    }
}

/// Tiny valid PNG so preview generation has something real to decode.
fn simulated_frame() -> Vec<u8> {
    let mut bytes = Vec::new();
    let frame = image::RgbImage::from_pixel(8, 8, image::Rgb([180, 120, 60]));
    if let Err(err) = image::DynamicImage::ImageRgb8(frame).write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    ) {
        log_warn!("Failed to encode simulated frame: {err}");
    }
    bytes
}

/// Photogrammetry engine that either replays a script or waits for outputs
/// pushed by hand through [`SimulatedPhotogrammetrySession::push`].
pub struct SimulatedEngine {
    script: Option<Vec<ReconstructionOutput>>,
    reject_input: Option<String>,
    sessions: Mutex<Vec<Arc<SimulatedPhotogrammetrySession>>>,
}

impl SimulatedEngine {
    pub fn scripted(outputs: Vec<ReconstructionOutput>) -> Self {
        Self {
            script: Some(outputs),
            reject_input: None,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn manual() -> Self {
        Self {
            script: None,
            reject_input: None,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            reject_input: Some(message.into()),
            ..Self::manual()
        }
    }

    /// A full successful run followed by the terminal markers the real engine
    /// keeps emitting afterwards.
    pub fn successful_run() -> Vec<ReconstructionOutput> {
        use super::ProcessingStage::*;
        vec![
            ReconstructionOutput::InputComplete,
            ReconstructionOutput::RequestProgressInfo {
                stage: Some(Preprocessing),
                estimated_remaining: None,
            },
            ReconstructionOutput::RequestProgress { fraction: 0.1 },
            ReconstructionOutput::RequestProgressInfo {
                stage: Some(ImageAlignment),
                estimated_remaining: Some(std::time::Duration::from_secs(30)),
            },
            ReconstructionOutput::RequestProgress { fraction: 0.45 },
            ReconstructionOutput::RequestProgressInfo {
                stage: Some(MeshGeneration),
                estimated_remaining: Some(std::time::Duration::from_secs(12)),
            },
            ReconstructionOutput::RequestProgress { fraction: 0.8 },
            ReconstructionOutput::RequestProgress { fraction: 1.0 },
            ReconstructionOutput::RequestComplete,
            ReconstructionOutput::ProcessingComplete,
            ReconstructionOutput::ProcessingComplete,
            ReconstructionOutput::RequestProgress { fraction: 0.0 },
        ]
    }

    pub fn last_session(&self) -> Option<Arc<SimulatedPhotogrammetrySession>> {
        lock(&self.sessions).last().cloned()
    }
}

impl ReconstructionEngine for SimulatedEngine {
    fn create_session(
        &self,
        input: &Path,
        config: ReconstructionConfiguration,
    ) -> Result<Arc<dyn PhotogrammetrySession>, PlatformError> {
        if let Some(message) = &self.reject_input {
            return Err(PlatformError::new(message.clone()));
        }
        let session = Arc::new(SimulatedPhotogrammetrySession {
            input: input.to_path_buf(),
            config,
            script: self.script.clone(),
            inner: Mutex::new(PhotogrammetryInner {
                outputs: Broadcast::new(),
                requests: Vec::new(),
                cancelled: false,
            }),
        });
        lock(&self.sessions).push(session.clone());
        Ok(session)
    }
}

struct PhotogrammetryInner {
    outputs: Broadcast<ReconstructionOutput>,
    requests: Vec<ReconstructionRequest>,
    cancelled: bool,
}

pub struct SimulatedPhotogrammetrySession {
    input: PathBuf,
    config: ReconstructionConfiguration,
    script: Option<Vec<ReconstructionOutput>>,
    inner: Mutex<PhotogrammetryInner>,
}

impl SimulatedPhotogrammetrySession {
    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn configuration(&self) -> &ReconstructionConfiguration {
        &self.config
    }

    pub fn requests(&self) -> Vec<ReconstructionRequest> {
        lock(&self.inner).requests.clone()
    }

    pub fn was_cancelled(&self) -> bool {
        lock(&self.inner).cancelled
    }

    pub fn push(&self, output: ReconstructionOutput) {
        lock(&self.inner).outputs.send(output);
    }

    /// Writes the requested model files and reports completion.
    pub fn complete(&self) {
        self.write_models();
        self.push(ReconstructionOutput::RequestComplete);
        self.push(ReconstructionOutput::ProcessingComplete);
    }

    /// Ends the output sequence.
    pub fn close(&self) {
        lock(&self.inner).outputs.close();
    }

    fn write_models(&self) {
        for request in self.requests() {
            let ReconstructionRequest::ModelFile { url, .. } = request;
            if let Err(err) = fs::write(&url, b"simulated usdz payload") {
                log_warn!("Failed to write simulated model {}: {err}", url.display());
            }
        }
    }
}

impl PhotogrammetrySession for SimulatedPhotogrammetrySession {
    fn outputs(&self) -> BoxStream<'static, ReconstructionOutput> {
        lock(&self.inner).outputs.subscribe()
    }

    fn process(&self, requests: Vec<ReconstructionRequest>) -> Result<(), PlatformError> {
        lock(&self.inner).requests.extend(requests);
        let Some(script) = &self.script else {
            return Ok(());
        };
        if script.contains(&ReconstructionOutput::RequestComplete) {
            self.write_models();
        }
        let mut inner = lock(&self.inner);
        for output in script {
            inner.outputs.send(output.clone());
        }
        Ok(())
    }

    fn cancel(&self) {
        let mut inner = lock(&self.inner);
        inner.cancelled = true;
        inner.outputs.send(ReconstructionOutput::ProcessingCancelled);
    }
}
