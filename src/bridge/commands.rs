//! Inbound command surface for the presentation layer.
//!
//! Each command maps facade errors to a `String`. The synchronous getters read
//! cached values so the script side never waits behind an in-flight action.

use tokio::sync::watch;

use crate::{
    app::{AppDataModel, ModelArtifacts},
    capture::{CaptureMode, OnboardingInput, OnboardingState, ReviewAction, SessionState},
    reconstruction::DetailLevel,
};

#[derive(Clone)]
struct CachedValues {
    is_supported: bool,
    state: watch::Receiver<SessionState>,
    image_count: watch::Receiver<u32>,
}

#[derive(Clone)]
pub struct CaptureModule {
    model: AppDataModel,
    cached: CachedValues,
}

impl CaptureModule {
    pub fn new(model: AppDataModel) -> Self {
        let cached = CachedValues {
            is_supported: model.is_supported(),
            state: model.subscribe_state(),
            image_count: model.subscribe_image_count(),
        };
        Self { model, cached }
    }

    pub fn model(&self) -> &AppDataModel {
        &self.model
    }

    pub fn is_supported(&self) -> bool {
        self.cached.is_supported
    }

    pub fn get_current_state(&self) -> String {
        self.cached.state.borrow().as_str().to_string()
    }

    pub fn get_image_count(&self) -> u32 {
        *self.cached.image_count.borrow()
    }

    /// Asks the live session for its shot count instead of the cached value.
    pub async fn get_image_count_async(&self) -> Result<u32, String> {
        Ok(self.model.image_count().await)
    }

    pub async fn start_new_capture(&self) -> Result<(), String> {
        self.model.start_new_capture().await.map_err(|e| e.to_string())
    }

    pub async fn detect_object(&self) -> Result<bool, String> {
        self.model.detect_object().await.map_err(|e| e.to_string())
    }

    pub async fn reset_detection(&self) -> Result<(), String> {
        self.model.reset_detection().await.map_err(|e| e.to_string())
    }

    pub async fn begin_capture(&self) -> Result<(), String> {
        self.model.begin_capture().await.map_err(|e| e.to_string())
    }

    pub async fn begin_new_orbit_pass(&self, flipped: bool) -> Result<(), String> {
        self.model
            .begin_new_orbit_pass(flipped)
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn finish(&self) -> Result<bool, String> {
        self.model.finish().await.map_err(|e| e.to_string())
    }

    pub async fn save_draft(&self) -> Result<(), String> {
        self.model.save_draft().await.map_err(|e| e.to_string())
    }

    pub async fn cancel(&self) -> Result<(), String> {
        self.model.cancel().await.map_err(|e| e.to_string())
    }

    pub async fn start_reconstruction(&self, detail_level: Option<String>) -> Result<(), String> {
        let detail = match detail_level {
            Some(value) => value.parse::<DetailLevel>().map_err(|e| e.to_string())?,
            None => self.model.settings().default_detail_level,
        };
        self.model
            .start_reconstruction(detail)
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn cancel_reconstruction(&self) -> Result<(), String> {
        self.model.cancel_reconstruction().await;
        Ok(())
    }

    pub async fn end_capture(&self) -> Result<(), String> {
        self.model.end_capture().await.map_err(|e| e.to_string())
    }

    pub async fn remove_capture_folder(&self) -> Result<(), String> {
        self.model
            .remove_capture_folder()
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn set_capture_mode(&self, mode: String) -> Result<(), String> {
        let mode: CaptureMode = mode.parse()?;
        self.model
            .set_capture_mode(mode)
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn set_overlay_sheets_shown(&self, shown: bool) -> Result<(), String> {
        self.model.set_overlay_sheets_shown(shown).await;
        Ok(())
    }

    pub async fn handle_app_termination(&self) -> Result<(), String> {
        self.model.handle_app_termination().await;
        Ok(())
    }

    pub async fn begin_review(&self) -> Result<OnboardingState, String> {
        self.model.begin_review().await.map_err(|e| e.to_string())
    }

    pub async fn get_review_inputs(&self) -> Result<Vec<OnboardingInput>, String> {
        Ok(self.model.review_inputs().await)
    }

    pub async fn review_action(&self, action: String) -> Result<OnboardingState, String> {
        let action: ReviewAction = action.parse()?;
        self.model
            .review_action(action)
            .await
            .map_err(|e| e.to_string())
    }

    pub async fn get_last_error(&self) -> Result<Option<String>, String> {
        Ok(self.model.last_error().await)
    }

    pub async fn get_capture_folder(&self) -> Result<Option<String>, String> {
        Ok(self
            .model
            .capture_folder()
            .await
            .map(|path| path.display().to_string()))
    }

    pub async fn get_model(&self) -> Result<Option<ModelArtifacts>, String> {
        Ok(self.model.model().await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        bridge::{ChannelEmitter, EventBridge},
        platform::simulated::{SimulatedDevice, SimulatedEngine},
        settings::CaptureSettings,
    };

    fn module(root: &std::path::Path, device: SimulatedDevice) -> CaptureModule {
        let (emitter, _rx) = ChannelEmitter::new();
        let model = AppDataModel::new(
            CaptureSettings::default().with_capture_root(root),
            Arc::new(device),
            Arc::new(SimulatedEngine::manual()),
            Arc::new(EventBridge::new(Arc::new(emitter))),
        );
        CaptureModule::new(model)
    }

    #[tokio::test]
    async fn cached_values_are_readable_without_awaiting() {
        let root = tempfile::tempdir().unwrap();
        let module = module(root.path(), SimulatedDevice::new());
        assert!(module.is_supported());
        assert_eq!(module.get_current_state(), "notStarted");
        assert_eq!(module.get_image_count(), 0);

        module.start_new_capture().await.unwrap();
        assert!(matches!(
            module.get_current_state().as_str(),
            "initializing" | "ready"
        ));
    }

    #[tokio::test]
    async fn unsupported_device_is_reported_as_a_string_error() {
        let root = tempfile::tempdir().unwrap();
        let module = module(root.path(), SimulatedDevice::unsupported());
        assert!(!module.is_supported());
        let err = module.start_new_capture().await.unwrap_err();
        assert_eq!(err, "object capture is not supported on this device");
    }

    #[tokio::test]
    async fn malformed_arguments_are_rejected_before_reaching_the_model() {
        let root = tempfile::tempdir().unwrap();
        let module = module(root.path(), SimulatedDevice::new());
        assert!(module.set_capture_mode("room".into()).await.is_err());
        assert!(module.review_action("flipTwice".into()).await.is_err());
        assert!(module
            .start_reconstruction(Some("ultra".into()))
            .await
            .unwrap_err()
            .contains("ultra"));
    }
}
