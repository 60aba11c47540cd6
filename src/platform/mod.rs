//! Contracts for the platform capabilities the orchestrator drives: the guided
//! capture primitive, the photogrammetry engine and the device capability gate.

pub mod simulated;

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::{feedback::FeedbackSet, reconstruction::DetailLevel};

/// Error reported by a platform capability, carried as its description.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
    /// The session was cancelled by the user.
    Cancelled,
    Other(String),
}

/// State published by the capture primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCaptureState {
    Initializing,
    Ready,
    Detecting,
    Capturing,
    Finishing,
    Completed,
    Failed(CaptureFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfiguration {
    pub is_over_capture_enabled: bool,
    pub checkpoint_directory: PathBuf,
}

#[async_trait]
pub trait ObjectCaptureSession: Send + Sync {
    async fn start(&self, images: &Path, config: CaptureConfiguration) -> Result<(), PlatformError>;

    /// `Ok(false)` means no object was found, which is not an error.
    async fn start_detecting(&self) -> Result<bool, PlatformError>;
    async fn reset_detection(&self);
    async fn start_capturing(&self);
    /// Keeps capturing on the same side of the object.
    async fn begin_new_scan_pass(&self);
    /// Returns to detection once the object has been turned over.
    async fn begin_new_scan_pass_after_flip(&self);
    async fn finish(&self);
    /// Returns once the primitive has acknowledged the cancellation.
    async fn cancel(&self);
    async fn pause(&self);
    async fn resume(&self);

    fn state(&self) -> PlatformCaptureState;
    fn number_of_shots_taken(&self) -> u32;
    fn user_completed_scan_pass(&self) -> bool;
    fn feedback(&self) -> FeedbackSet;

    fn state_updates(&self) -> BoxStream<'static, PlatformCaptureState>;
    fn shot_count_updates(&self) -> BoxStream<'static, u32>;
    fn feedback_updates(&self) -> BoxStream<'static, FeedbackSet>;
}

/// Boolean capability gate plus session factory.
pub trait CaptureDevice: Send + Sync {
    fn is_supported(&self) -> bool;
    fn create_session(&self) -> Arc<dyn ObjectCaptureSession>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStage {
    Preprocessing,
    ImageAlignment,
    PointCloudGeneration,
    MeshGeneration,
    TextureMapping,
    Optimization,
}

impl ProcessingStage {
    pub fn label(self) -> &'static str {
        match self {
            ProcessingStage::Preprocessing => "Preprocessing",
            ProcessingStage::ImageAlignment => "Aligning Images",
            ProcessingStage::PointCloudGeneration => "Generating Point Cloud",
            ProcessingStage::MeshGeneration => "Generating Mesh",
            ProcessingStage::TextureMapping => "Mapping Texture",
            ProcessingStage::Optimization => "Optimizing",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionConfiguration {
    pub checkpoint_directory: PathBuf,
    pub is_object_masking_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionRequest {
    ModelFile { url: PathBuf, detail: DetailLevel },
}

/// Output of a photogrammetry session. The sequence does not end on its own
/// after a run finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconstructionOutput {
    InputComplete,
    RequestProgress {
        fraction: f64,
    },
    RequestProgressInfo {
        stage: Option<ProcessingStage>,
        estimated_remaining: Option<Duration>,
    },
    RequestComplete,
    RequestError {
        message: String,
    },
    InvalidSample {
        id: u64,
        reason: String,
    },
    SkippedSample {
        id: u64,
    },
    AutomaticDownsampling,
    StitchingIncomplete,
    ProcessingComplete,
    ProcessingCancelled,
}

impl ReconstructionOutput {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconstructionOutput::ProcessingComplete | ReconstructionOutput::ProcessingCancelled
        )
    }
}

pub trait PhotogrammetrySession: Send + Sync {
    fn outputs(&self) -> BoxStream<'static, ReconstructionOutput>;
    fn process(&self, requests: Vec<ReconstructionRequest>) -> Result<(), PlatformError>;
    fn cancel(&self);
}

pub trait ReconstructionEngine: Send + Sync {
    /// Fails when the engine rejects the input folder.
    fn create_session(
        &self,
        input: &Path,
        config: ReconstructionConfiguration,
    ) -> Result<Arc<dyn PhotogrammetrySession>, PlatformError>;
}
