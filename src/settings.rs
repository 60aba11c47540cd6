use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::RwLock,
    time::Duration,
};

use crate::reconstruction::DetailLevel;

const CAPTURE_ROOT_ENV: &str = "GUIDED_CAPTURE_ROOT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Directory that holds one timestamped folder per capture session.
    pub capture_root: PathBuf,
    /// Shots required before `finish` is accepted.
    pub min_num_images: u32,
    /// Floor on how long a feedback message stays visible.
    pub feedback_min_duration_ms: u64,
    /// Fraction change below which progress updates are not re-emitted.
    pub progress_report_delta: f32,
    pub model_file_name: String,
    pub preview_file_name: String,
    pub preview_max_dimension: u32,
    pub default_detail_level: DetailLevel,
    /// Keep `Images/` after a model has been produced.
    pub retain_images_after_reconstruction: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let capture_root = std::env::var_os(CAPTURE_ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("captures"));

        Self {
            capture_root,
            min_num_images: 10,
            feedback_min_duration_ms: 2_000,
            progress_report_delta: 0.01,
            model_file_name: "model-mobile.usdz".into(),
            preview_file_name: "preview.png".into(),
            preview_max_dimension: 512,
            default_detail_level: DetailLevel::Medium,
            retain_images_after_reconstruction: false,
        }
    }
}

impl CaptureSettings {
    pub fn with_capture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.capture_root = root.into();
        self
    }

    pub fn feedback_min_duration(&self) -> Duration {
        Duration::from_millis(self.feedback_min_duration_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CaptureSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring malformed settings at {}: {err}",
                    path.display()
                );
                CaptureSettings::default()
            })
        } else {
            CaptureSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> CaptureSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: CaptureSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &CaptureSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
