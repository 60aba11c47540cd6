#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use guided_capture_lib::{
    bridge::{self, BridgeEvent},
    platform::simulated::{SimulatedCaptureSession, SimulatedDevice, SimulatedEngine},
    AppDataModel, CaptureSettings, ChannelEmitter, EventBridge,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub root: TempDir,
    pub device: Arc<SimulatedDevice>,
    pub engine: Arc<SimulatedEngine>,
    pub model: AppDataModel,
    events: UnboundedReceiver<BridgeEvent>,
    /// Every event received so far, in arrival order.
    pub seen: Vec<BridgeEvent>,
}

impl Harness {
    pub fn new(device: SimulatedDevice, engine: SimulatedEngine) -> Self {
        Self::with_settings(device, engine, |settings| settings)
    }

    pub fn with_settings(
        device: SimulatedDevice,
        engine: SimulatedEngine,
        configure: impl FnOnce(CaptureSettings) -> CaptureSettings,
    ) -> Self {
        let root = tempfile::tempdir().expect("capture root");
        let device = Arc::new(device);
        let engine = Arc::new(engine);
        let (emitter, events) = ChannelEmitter::new();
        let settings = configure(CaptureSettings::default().with_capture_root(root.path()));
        let model = AppDataModel::new(
            settings,
            device.clone(),
            engine.clone(),
            Arc::new(EventBridge::new(Arc::new(emitter))),
        );
        Self {
            root,
            device,
            engine,
            model,
            events,
            seen: Vec::new(),
        }
    }

    pub fn session(&self) -> Arc<SimulatedCaptureSession> {
        self.device.last_session().expect("capture session")
    }

    /// Receives events until one matches, panicking if none arrives in time.
    pub async fn wait_for(&mut self, matches: impl Fn(&BridgeEvent) -> bool) -> BridgeEvent {
        loop {
            let event = tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .expect("timed out waiting for bridge event")
                .expect("bridge closed");
            self.seen.push(event.clone());
            if matches(&event) {
                return event;
            }
        }
    }

    pub async fn wait_for_state(&mut self, state: &str) {
        self.wait_for(|event| is_state(event, state)).await;
    }

    pub async fn wait_for_event(&mut self, name: &str) -> BridgeEvent {
        self.wait_for(|event| event.name == name).await
    }

    /// Lets in-flight listeners run, then collects whatever they emitted.
    pub async fn settle(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
    }

    pub fn states(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter(|event| event.name == bridge::STATE_CHANGED)
            .filter_map(|event| event.payload["state"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.seen.iter().filter(|event| event.name == name).count()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.seen
            .iter()
            .filter(|event| event.name == bridge::PROCESSING_PROGRESS)
            .filter_map(|event| event.payload["progress"].as_f64())
            .collect()
    }

    /// Runs a session up to `capturing` with `shots` frames on disk.
    pub async fn capture_with_shots(&mut self, shots: u32) {
        self.model.start_new_capture().await.expect("start capture");
        self.wait_for_state("ready").await;
        assert!(self.model.detect_object().await.expect("detect"));
        self.wait_for_state("detecting").await;
        self.model.begin_capture().await.expect("begin capture");
        self.wait_for_state("capturing").await;
        self.session().take_shots(shots);
        self.wait_for_event(bridge::SHOT_COUNT_CHANGED).await;
    }

    /// Runs a session through `finish` to `prepareToReconstruct`.
    pub async fn captured_session(&mut self, shots: u32) {
        self.capture_with_shots(shots).await;
        assert!(self.model.finish().await.expect("finish"));
        self.wait_for_state("prepareToReconstruct").await;
    }
}

pub fn is_state(event: &BridgeEvent, state: &str) -> bool {
    event.name == bridge::STATE_CHANGED && event.payload["state"] == Value::from(state)
}
