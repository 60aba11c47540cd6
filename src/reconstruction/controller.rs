use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};

use super::{filter::UntilProcessingComplete, progress::ProgressThrottle, DetailLevel, ProgressUpdate};
use crate::{
    error::ReconstructionError,
    platform::{
        PhotogrammetrySession, ReconstructionConfiguration, ReconstructionEngine,
        ReconstructionOutput, ReconstructionRequest,
    },
    storage::SessionStorage,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Everything one reconstruction run needs.
#[derive(Debug, Clone)]
pub struct ReconstructionJob {
    pub storage: SessionStorage,
    pub model_path: PathBuf,
    pub preview_path: PathBuf,
    pub detail: DetailLevel,
    pub object_masking: bool,
    pub progress_delta: f64,
    pub preview_max_dimension: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconstructionEvent {
    Progress(ProgressUpdate),
    Completed {
        model_path: PathBuf,
        preview_path: PathBuf,
    },
    Failed(ReconstructionError),
    Cancelled,
}

impl ReconstructionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReconstructionEvent::Progress(_))
    }
}

#[async_trait]
pub trait ReconstructionEventSink: Send + Sync + 'static {
    async fn on_reconstruction_event(&self, job_id: u64, event: ReconstructionEvent);
}

/// Handle on a running reconstruction. Each run delivers exactly one terminal event.
pub struct ReconstructionController {
    id: u64,
    session: Arc<dyn PhotogrammetrySession>,
    cancelled: Arc<AtomicBool>,
}

impl ReconstructionController {
    /// Validates the input, hands the job to the engine and returns while the
    /// run continues in the background.
    pub fn start(
        engine: &dyn ReconstructionEngine,
        id: u64,
        job: ReconstructionJob,
        sink: Arc<dyn ReconstructionEventSink>,
    ) -> Result<Self, ReconstructionError> {
        let images = job.storage.images_folder().to_path_buf();
        if !job.storage.has_images_folder() {
            return Err(ReconstructionError::Input(format!(
                "images folder {} does not exist",
                images.display()
            )));
        }
        if job.storage.image_count() == 0 {
            return Err(ReconstructionError::Input(format!(
                "no captured images in {}",
                images.display()
            )));
        }

        let config = ReconstructionConfiguration {
            checkpoint_directory: job.storage.checkpoint_folder().to_path_buf(),
            is_object_masking_enabled: job.object_masking,
        };
        let session = engine
            .create_session(&images, config)
            .map_err(|err| ReconstructionError::Input(err.to_string()))?;

        let outputs = session.outputs();
        session
            .process(vec![ReconstructionRequest::ModelFile {
                url: job.model_path.clone(),
                detail: job.detail,
            }])
            .map_err(|err| ReconstructionError::Input(err.to_string()))?;

        log_info!(
            "Reconstruction {id} started for {} at {} detail",
            images.display(),
            job.detail
        );

        let cancelled = Arc::new(AtomicBool::new(false));
        tokio::spawn(consume(id, outputs, cancelled.clone(), job, sink));

        Ok(Self {
            id,
            session,
            cancelled,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Flags the run as cancelled and asks the engine to stop. Does not wait.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        log_info!("Cancelling reconstruction {}", self.id);
        self.session.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

async fn consume(
    id: u64,
    outputs: BoxStream<'static, ReconstructionOutput>,
    cancelled: Arc<AtomicBool>,
    job: ReconstructionJob,
    sink: Arc<dyn ReconstructionEventSink>,
) {
    let mut outputs = UntilProcessingComplete::new(outputs);
    let mut throttle = ProgressThrottle::new(job.progress_delta);
    let mut request_error: Option<String> = None;
    let mut processing_complete = false;

    while let Some(output) = outputs.next().await {
        if cancelled.load(Ordering::SeqCst) {
            continue;
        }
        let update = match output {
            ReconstructionOutput::RequestProgress { fraction } => throttle.fraction(fraction),
            ReconstructionOutput::RequestProgressInfo {
                stage,
                estimated_remaining,
            } => throttle.stage(stage.map(|stage| stage.label()), estimated_remaining),
            ReconstructionOutput::RequestError { message } => {
                log_error!("Reconstruction {id} request failed: {message}");
                request_error.get_or_insert(message);
                None
            }
            ReconstructionOutput::ProcessingComplete => {
                processing_complete = true;
                None
            }
            ReconstructionOutput::ProcessingCancelled => {
                cancelled.store(true, Ordering::SeqCst);
                None
            }
            ReconstructionOutput::InvalidSample { id: sample, reason } => {
                log_warn!("Reconstruction {id} skipped invalid sample {sample}: {reason}");
                None
            }
            ReconstructionOutput::SkippedSample { id: sample } => {
                log_warn!("Reconstruction {id} skipped sample {sample}");
                None
            }
            ReconstructionOutput::AutomaticDownsampling => {
                log_warn!("Reconstruction {id} downsampled its input");
                None
            }
            ReconstructionOutput::StitchingIncomplete => {
                log_warn!("Reconstruction {id} could not stitch every sample");
                None
            }
            ReconstructionOutput::InputComplete | ReconstructionOutput::RequestComplete => None,
        };
        if let Some(update) = update {
            sink.on_reconstruction_event(id, ReconstructionEvent::Progress(update))
                .await;
        }
    }

    let event = if cancelled.load(Ordering::SeqCst) {
        log_info!("Reconstruction {id} cancelled");
        ReconstructionEvent::Cancelled
    } else if let Some(message) = request_error {
        ReconstructionEvent::Failed(ReconstructionError::Processing(message))
    } else if processing_complete {
        finish_run(id, job).await
    } else {
        ReconstructionEvent::Failed(ReconstructionError::Processing(
            "reconstruction output ended before processing completed".into(),
        ))
    };
    sink.on_reconstruction_event(id, event).await;
}

async fn finish_run(id: u64, job: ReconstructionJob) -> ReconstructionEvent {
    let model_path = job.model_path.clone();
    let finalized = tokio::task::spawn_blocking(move || finalize(&job)).await;
    match finalized {
        Ok(Ok(preview_path)) => {
            log_info!(
                "Reconstruction {id} produced {} (preview {})",
                model_path.display(),
                preview_path.display()
            );
            ReconstructionEvent::Completed {
                model_path,
                preview_path,
            }
        }
        Ok(Err(err)) => ReconstructionEvent::Failed(err),
        Err(join_err) => ReconstructionEvent::Failed(ReconstructionError::Processing(format!(
            "finalizing model failed: {join_err}"
        ))),
    }
}

/// Checks the exported model and writes the preview. Returns the preview path.
fn finalize(job: &ReconstructionJob) -> Result<PathBuf, ReconstructionError> {
    let metadata = fs::metadata(&job.model_path).map_err(|err| {
        ReconstructionError::Processing(format!(
            "model file {} is missing: {err}",
            job.model_path.display()
        ))
    })?;
    if metadata.len() == 0 {
        return Err(ReconstructionError::Processing(format!(
            "model file {} is empty",
            job.model_path.display()
        )));
    }
    Ok(write_preview(job))
}

/// Thumbnail of the first frame, else a raw copy of it, else the model itself.
fn write_preview(job: &ReconstructionJob) -> PathBuf {
    let Some(first) = job.storage.first_image() else {
        return job.model_path.clone();
    };

    match render_thumbnail(&first, &job.preview_path, job.preview_max_dimension) {
        Ok(()) => return job.preview_path.clone(),
        Err(err) => log_warn!("Preview thumbnail failed, copying frame instead: {err:#}"),
    }

    let copy = match first.extension() {
        Some(ext) => job.preview_path.with_extension(ext),
        None => job.preview_path.clone(),
    };
    match fs::copy(&first, &copy) {
        Ok(_) => copy,
        Err(err) => {
            log_warn!("Failed to copy {} as preview: {err}", first.display());
            job.model_path.clone()
        }
    }
}

fn render_thumbnail(source: &Path, destination: &Path, max_dimension: u32) -> anyhow::Result<()> {
    let frame = image::open(source)
        .with_context(|| format!("Failed to decode {}", source.display()))?;
    frame
        .thumbnail(max_dimension, max_dimension)
        .save(destination)
        .with_context(|| format!("Failed to write preview {}", destination.display()))
}
