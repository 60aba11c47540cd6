//! Outbound events to the presentation layer.
//!
//! The bridge drops repeats of the last reported state, feedback list and shot
//! count, and emits under a single lock so delivery order matches arrival order.

pub mod commands;

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{capture::SessionState, reconstruction::ProgressUpdate};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

pub const STATE_CHANGED: &str = "onStateChanged";
pub const FEEDBACK_CHANGED: &str = "onFeedbackChanged";
pub const PROCESSING_PROGRESS: &str = "onProcessingProgress";
pub const MODEL_COMPLETE: &str = "onModelComplete";
pub const ERROR: &str = "onError";
pub const SHOT_COUNT_CHANGED: &str = "onShotCountChanged";

/// Sink on the far side of the native/script boundary.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEvent {
    pub name: String,
    pub payload: Value,
}

/// Forwards events into a tokio channel.
pub struct ChannelEmitter {
    tx: UnboundedSender<BridgeEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Emitter for ChannelEmitter {
    fn emit(&self, event: &str, payload: Value) {
        let event = BridgeEvent {
            name: event.to_string(),
            payload,
        };
        if self.tx.send(event).is_err() {
            log_debug!("bridge receiver dropped, event discarded");
        }
    }
}

#[derive(Serialize)]
struct StateChangedEvent {
    state: SessionState,
}

#[derive(Serialize)]
struct FeedbackChangedEvent<'a> {
    messages: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelCompleteEvent {
    model_path: String,
    preview_path: String,
}

#[derive(Serialize)]
struct ErrorEvent<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct ShotCountChangedEvent {
    number: u32,
}

#[derive(Default)]
struct LastReported {
    state: Option<SessionState>,
    feedback: Option<Vec<String>>,
    shot_count: Option<u32>,
}

pub struct EventBridge {
    emitter: Arc<dyn Emitter>,
    last: Mutex<LastReported>,
}

impl EventBridge {
    pub fn new(emitter: Arc<dyn Emitter>) -> Self {
        Self {
            emitter,
            last: Mutex::new(LastReported::default()),
        }
    }

    pub fn state_changed(&self, state: SessionState) {
        let mut last = self.lock();
        if last.state == Some(state) {
            return;
        }
        last.state = Some(state);
        self.send(STATE_CHANGED, &StateChangedEvent { state });
    }

    pub fn feedback_changed(&self, messages: &[String]) {
        let mut last = self.lock();
        if last.feedback.as_deref() == Some(messages) {
            return;
        }
        last.feedback = Some(messages.to_vec());
        self.send(FEEDBACK_CHANGED, &FeedbackChangedEvent { messages });
    }

    pub fn shot_count_changed(&self, number: u32) {
        let mut last = self.lock();
        if last.shot_count == Some(number) {
            return;
        }
        last.shot_count = Some(number);
        self.send(SHOT_COUNT_CHANGED, &ShotCountChangedEvent { number });
    }

    pub fn processing_progress(&self, update: &ProgressUpdate) {
        let _ordered = self.lock();
        self.send(PROCESSING_PROGRESS, update);
    }

    pub fn model_complete(&self, model_path: &Path, preview_path: &Path) {
        let _ordered = self.lock();
        self.send(
            MODEL_COMPLETE,
            &ModelCompleteEvent {
                model_path: model_path.display().to_string(),
                preview_path: preview_path.display().to_string(),
            },
        );
    }

    pub fn error(&self, message: &str) {
        let _ordered = self.lock();
        self.send(ERROR, &ErrorEvent { message });
    }

    /// Forgets the session-scoped values so a new session reports them afresh.
    /// The last state is kept, a state only repeats if it actually changed.
    pub fn reset(&self) {
        let mut last = self.lock();
        last.feedback = None;
        last.shot_count = None;
    }

    fn lock(&self) -> MutexGuard<'_, LastReported> {
        match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn send<T: Serialize + ?Sized>(&self, event: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(payload) => self.emitter.emit(event, payload),
            Err(err) => log_error!("Failed to serialize {event} payload: {err}"),
        }
    }
}
