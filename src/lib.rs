pub mod app;
pub mod bridge;
pub mod capture;
pub mod error;
pub mod feedback;
pub mod platform;
pub mod reconstruction;
pub mod settings;
pub mod storage;
mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context};
use tokio::sync::watch;

pub use app::{AppDataModel, ModelArtifacts};
pub use bridge::{commands::CaptureModule, BridgeEvent, ChannelEmitter, Emitter, EventBridge};
pub use capture::{CaptureMode, Orbit, SessionState};
pub use error::{CaptureError, ReconstructionError, StorageError};
pub use reconstruction::DetailLevel;
pub use settings::{CaptureSettings, SettingsStore};

use platform::simulated::{SimulatedDevice, SimulatedEngine};

const SETTINGS_PATH_ENV: &str = "GUIDED_CAPTURE_SETTINGS";
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one simulated capture and reconstruction end to end, logging every
/// bridge event along the way.
pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Guided capture starting up...");

    let settings_path = std::env::var_os(SETTINGS_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("guided-capture-settings.json"));
    let settings = SettingsStore::new(settings_path)?.settings();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(simulated_session(settings))
}

async fn simulated_session(settings: CaptureSettings) -> anyhow::Result<()> {
    let (emitter, mut events) = ChannelEmitter::new();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log::info!("{} {}", event.name, event.payload);
        }
    });

    let device = Arc::new(SimulatedDevice::new());
    let min_num_images = settings.min_num_images;
    let model = AppDataModel::new(
        settings,
        device.clone(),
        Arc::new(SimulatedEngine::scripted(SimulatedEngine::successful_run())),
        Arc::new(EventBridge::new(Arc::new(emitter))),
    );
    let module = CaptureModule::new(model.clone());
    let mut states = model.subscribe_state();

    module.start_new_capture().await.map_err(|e| anyhow!(e))?;
    wait_for_state(&mut states, SessionState::Ready).await?;

    if !module.detect_object().await.map_err(|e| anyhow!(e))? {
        bail!("Simulated device did not find an object");
    }
    wait_for_state(&mut states, SessionState::Detecting).await?;
    module.begin_capture().await.map_err(|e| anyhow!(e))?;
    wait_for_state(&mut states, SessionState::Capturing).await?;

    let session = device
        .last_session()
        .context("Simulated device did not create a session")?;
    session.take_shots(min_num_images + 2);
    session.set_user_completed_scan_pass(true);

    if !module.finish().await.map_err(|e| anyhow!(e))? {
        bail!("Capture finished with too few images");
    }
    wait_for_state(&mut states, SessionState::PrepareToReconstruct).await?;

    module
        .start_reconstruction(None)
        .await
        .map_err(|e| anyhow!(e))?;
    let state = wait_for_any(&mut states, &[SessionState::Viewing, SessionState::Failed]).await?;
    if state == SessionState::Failed {
        let message = model.last_error().await.unwrap_or_default();
        bail!("Reconstruction failed: {message}");
    }

    if let Some(artifacts) = model.model().await {
        log::info!(
            "Model written to {} (preview {})",
            artifacts.model_path.display(),
            artifacts.preview_path.display()
        );
    }
    module.end_capture().await.map_err(|e| anyhow!(e))?;
    wait_for_state(&mut states, SessionState::Ready).await?;
    Ok(())
}

async fn wait_for_state(
    states: &mut watch::Receiver<SessionState>,
    target: SessionState,
) -> anyhow::Result<()> {
    wait_for_any(states, &[target]).await.map(|_| ())
}

async fn wait_for_any(
    states: &mut watch::Receiver<SessionState>,
    targets: &[SessionState],
) -> anyhow::Result<SessionState> {
    let state = tokio::time::timeout(STEP_TIMEOUT, states.wait_for(|state| targets.contains(state)))
        .await
        .with_context(|| format!("Timed out waiting for {targets:?}"))?
        .context("Session state channel closed")?;
    Ok(*state)
}
