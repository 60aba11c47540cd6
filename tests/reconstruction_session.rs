mod common;

use std::fs;

use common::Harness;
use guided_capture_lib::{
    bridge,
    platform::{
        simulated::{SimulatedDevice, SimulatedEngine},
        ReconstructionOutput,
    },
    CaptureError, DetailLevel, ReconstructionError, SessionState,
};

#[tokio::test]
async fn successful_run_reports_the_model_and_reclaims_scratch() {
    let mut harness = Harness::new(
        SimulatedDevice::new(),
        SimulatedEngine::scripted(SimulatedEngine::successful_run()),
    );
    harness.captured_session(12).await;
    let folder = harness.model.capture_folder().await.unwrap();

    harness
        .model
        .start_reconstruction(DetailLevel::High)
        .await
        .unwrap();
    let complete = harness.wait_for_event(bridge::MODEL_COMPLETE).await;
    harness.settle().await;

    let model_path = folder.join("Models").join("model-mobile.usdz");
    assert_eq!(complete.payload["modelPath"], model_path.display().to_string());
    assert!(fs::metadata(&model_path).unwrap().len() > 0);
    assert!(!folder.join("Images").exists());
    assert!(!folder.join("Checkpoint").exists());
    assert_eq!(harness.model.state().await, SessionState::Viewing);
    assert_eq!(harness.count(bridge::ERROR), 0);

    let session = harness.engine.last_session().unwrap();
    assert!(session.configuration().is_object_masking_enabled);
    assert_eq!(session.input(), folder.join("Images"));

    // The engine keeps emitting after completion; none of it reaches the bridge.
    let progress = harness.progress_values();
    assert_eq!(progress.last().copied(), Some(1.0));
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(harness.count(bridge::MODEL_COMPLETE), 1);

    harness.model.end_capture().await.unwrap();
    harness.wait_for_state("ready").await;
    assert!(folder.join("Models").exists());
}

#[tokio::test]
async fn small_progress_steps_are_held_back() {
    let mut harness = Harness::new(SimulatedDevice::new(), SimulatedEngine::manual());
    harness.captured_session(12).await;
    harness
        .model
        .start_reconstruction(DetailLevel::Medium)
        .await
        .unwrap();
    harness.wait_for_state("reconstructing").await;

    let session = harness.engine.last_session().unwrap();
    for fraction in [0.10, 0.105, 0.30, 0.20] {
        session.push(ReconstructionOutput::RequestProgress { fraction });
    }
    session.complete();
    harness.wait_for_event(bridge::MODEL_COMPLETE).await;

    assert_eq!(harness.progress_values(), vec![0.10, 0.30]);
}

#[tokio::test]
async fn cancelling_mid_run_restarts_without_a_model() {
    let mut harness = Harness::new(SimulatedDevice::new(), SimulatedEngine::manual());
    harness.captured_session(12).await;
    let folder = harness.model.capture_folder().await.unwrap();
    harness
        .model
        .start_reconstruction(DetailLevel::Low)
        .await
        .unwrap();
    harness.wait_for_state("reconstructing").await;

    let session = harness.engine.last_session().unwrap();
    session.push(ReconstructionOutput::RequestProgress { fraction: 0.4 });
    harness.wait_for_event(bridge::PROCESSING_PROGRESS).await;

    harness.model.cancel_reconstruction().await;
    harness.model.cancel_reconstruction().await;
    harness.wait_for_state("ready").await;

    // Late outputs from the cancelled engine are dropped.
    session.push(ReconstructionOutput::RequestProgress { fraction: 0.9 });
    session.complete();
    harness.settle().await;

    assert!(session.was_cancelled());
    assert_eq!(harness.count(bridge::MODEL_COMPLETE), 0);
    assert_eq!(harness.count(bridge::ERROR), 0);
    assert_eq!(
        harness.states().iter().filter(|state| *state == "restart").count(),
        1
    );
    assert_eq!(harness.progress_values(), vec![0.4]);
    assert!(!folder.exists());
}

#[tokio::test]
async fn request_error_fails_once_and_keeps_images_for_retry() {
    let mut harness = Harness::new(
        SimulatedDevice::new(),
        SimulatedEngine::scripted(vec![
            ReconstructionOutput::RequestProgress { fraction: 0.2 },
            ReconstructionOutput::RequestError {
                message: "alignment failed".into(),
            },
            ReconstructionOutput::RequestError {
                message: "mesh failed".into(),
            },
            ReconstructionOutput::ProcessingComplete,
        ]),
    );
    harness.captured_session(12).await;
    let folder = harness.model.capture_folder().await.unwrap();

    harness
        .model
        .start_reconstruction(DetailLevel::Medium)
        .await
        .unwrap();
    harness.wait_for_state("failed").await;
    harness.settle().await;

    assert_eq!(harness.count(bridge::ERROR), 1);
    let error = harness
        .seen
        .iter()
        .find(|event| event.name == bridge::ERROR)
        .unwrap();
    assert_eq!(error.payload["message"], "reconstruction failed: alignment failed");
    assert_eq!(fs::read_dir(folder.join("Images")).unwrap().count(), 12);
    assert_eq!(harness.count(bridge::MODEL_COMPLETE), 0);

    // Retrying from the failed state starts a fresh run on the same images.
    harness
        .model
        .start_reconstruction(DetailLevel::Low)
        .await
        .unwrap();
    harness.wait_for_state("failed").await;
    assert_eq!(harness.count(bridge::ERROR), 2);

    // Closing after a processing failure keeps the capture on disk.
    harness.model.end_capture().await.unwrap();
    harness.wait_for_state("ready").await;
    assert_eq!(fs::read_dir(folder.join("Images")).unwrap().count(), 12);
    assert!(harness.model.capture_folder().await.is_none());
}

#[tokio::test]
async fn rejected_input_is_returned_to_the_caller_only() {
    let mut harness = Harness::new(
        SimulatedDevice::new(),
        SimulatedEngine::rejecting("unreadable images"),
    );
    harness.captured_session(12).await;

    let err = harness
        .model
        .start_reconstruction(DetailLevel::Medium)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Reconstruction(ReconstructionError::Input(_))
    ));
    harness.settle().await;

    assert_eq!(harness.model.state().await, SessionState::PrepareToReconstruct);
    assert_eq!(harness.count(bridge::ERROR), 0);
    assert!(harness.model.last_error().await.is_some());
    assert!(harness.model.capture_folder().await.unwrap().exists());
}

#[tokio::test]
async fn cancel_before_reconstruction_discards_the_capture() {
    let mut harness = Harness::new(SimulatedDevice::new(), SimulatedEngine::manual());
    harness.captured_session(12).await;
    let folder = harness.model.capture_folder().await.unwrap();

    harness.model.cancel().await.unwrap();
    harness.wait_for_state("ready").await;

    assert!(!folder.exists());
    assert!(harness
        .model
        .start_reconstruction(DetailLevel::Medium)
        .await
        .is_err());
}

#[tokio::test]
async fn folder_cannot_be_removed_while_reconstructing() {
    let mut harness = Harness::new(SimulatedDevice::new(), SimulatedEngine::manual());
    harness.captured_session(12).await;
    harness
        .model
        .start_reconstruction(DetailLevel::Medium)
        .await
        .unwrap();
    harness.wait_for_state("reconstructing").await;

    let err = harness.model.remove_capture_folder().await.unwrap_err();
    assert!(matches!(err, CaptureError::InvalidState { .. }));
    assert!(harness.model.capture_folder().await.unwrap().exists());
}

#[tokio::test]
async fn starting_again_during_reconstruction_removes_the_old_folder() {
    let mut harness = Harness::new(SimulatedDevice::new(), SimulatedEngine::manual());
    harness.captured_session(12).await;
    let folder = harness.model.capture_folder().await.unwrap();
    harness
        .model
        .start_reconstruction(DetailLevel::Medium)
        .await
        .unwrap();
    harness.wait_for_state("reconstructing").await;
    let run = harness.engine.last_session().unwrap();

    harness.model.start_new_capture().await.unwrap();
    harness.wait_for_state("ready").await;
    run.push(ReconstructionOutput::RequestProgress { fraction: 0.5 });
    harness.settle().await;

    assert!(run.was_cancelled());
    assert!(!folder.exists());
    assert_eq!(fs::read_dir(harness.root.path()).unwrap().count(), 1);
    assert!(harness.progress_values().is_empty());
    assert_eq!(harness.count(bridge::MODEL_COMPLETE), 0);
    assert_eq!(harness.model.state().await, SessionState::Ready);
}

#[tokio::test]
async fn starting_again_after_viewing_keeps_the_model() {
    let mut harness = Harness::new(
        SimulatedDevice::new(),
        SimulatedEngine::scripted(SimulatedEngine::successful_run()),
    );
    harness.captured_session(12).await;
    let folder = harness.model.capture_folder().await.unwrap();
    harness
        .model
        .start_reconstruction(DetailLevel::High)
        .await
        .unwrap();
    harness.wait_for_event(bridge::MODEL_COMPLETE).await;

    harness.model.start_new_capture().await.unwrap();
    harness.wait_for_state("ready").await;

    assert!(folder.join("Models").join("model-mobile.usdz").exists());
    assert_eq!(fs::read_dir(harness.root.path()).unwrap().count(), 2);
}
