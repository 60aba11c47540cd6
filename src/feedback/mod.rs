pub mod signals;
pub mod timed_messages;

use std::time::Duration;

pub use signals::{FeedbackDelta, FeedbackSet, FeedbackSignal};
pub use timed_messages::{MessagesObserver, TimedMessage, TimedMessageList};

use crate::capture::CaptureMode;

/// Turns signal deltas into the user-facing message list.
#[derive(Clone)]
pub struct FeedbackAggregator {
    messages: TimedMessageList,
}

impl FeedbackAggregator {
    pub fn new(min_duration: Duration) -> Self {
        Self {
            messages: TimedMessageList::new(min_duration),
        }
    }

    pub fn set_observer(&self, observer: MessagesObserver) {
        self.messages.set_observer(observer);
    }

    pub fn apply(&self, delta: &FeedbackDelta, mode: CaptureMode) {
        for signal in &delta.removed {
            if let Some(text) = signal.message(mode) {
                self.messages.remove(text);
            }
        }
        for signal in &delta.added {
            if let Some(text) = signal.message(mode) {
                self.messages.add(text);
            }
        }
    }

    pub fn clear(&self) {
        self.messages.remove_all();
    }

    pub fn active_message(&self) -> Option<String> {
        self.messages.active_message()
    }

    pub fn visible_messages(&self) -> Vec<String> {
        self.messages
            .messages()
            .into_iter()
            .map(|message| message.text)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cleared_signal_outlives_its_delta() {
        let aggregator = FeedbackAggregator::new(Duration::from_millis(2000));
        let mut previous = FeedbackSet::new();

        let sets: [FeedbackSet; 3] = [
            [FeedbackSignal::ObjectTooFar].into(),
            [FeedbackSignal::ObjectTooFar, FeedbackSignal::EnvironmentLowLight].into(),
            [FeedbackSignal::EnvironmentLowLight].into(),
        ];
        for set in sets {
            let delta = FeedbackDelta::between(&previous, &set);
            aggregator.apply(&delta, CaptureMode::Object);
            previous = set;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(
            aggregator.visible_messages(),
            vec!["Move Closer".to_string(), "More Light Recommended".to_string()]
        );

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(aggregator.active_message().as_deref(), Some("More Light Recommended"));
    }

    #[tokio::test]
    async fn signals_without_text_are_ignored() {
        let aggregator = FeedbackAggregator::new(Duration::from_millis(2000));
        let delta = FeedbackDelta {
            added: vec![FeedbackSignal::ObjectNotFlippable, FeedbackSignal::ObjectTooClose],
            removed: vec![],
        };
        aggregator.apply(&delta, CaptureMode::Area);
        assert!(aggregator.visible_messages().is_empty());
    }
}
