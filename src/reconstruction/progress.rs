use std::time::Duration;

use serde::Serialize;

/// Payload of `onProcessingProgress`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<f64>,
}

/// Decides which engine progress reports reach the presentation layer.
///
/// Delivered fractions never decrease. A fraction within `delta` of the last
/// delivered one is held back; a new stage label is always delivered.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    delta: f64,
    highest: f64,
    last_reported: Option<f64>,
    stage: Option<String>,
    time_remaining: Option<f64>,
}

impl ProgressThrottle {
    pub fn new(delta: f64) -> Self {
        Self {
            delta,
            highest: 0.0,
            last_reported: None,
            stage: None,
            time_remaining: None,
        }
    }

    pub fn fraction(&mut self, fraction: f64) -> Option<ProgressUpdate> {
        if !fraction.is_finite() {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction < self.highest {
            return None;
        }
        self.highest = fraction;

        if let Some(last) = self.last_reported {
            let reached_end = fraction >= 1.0 && last < 1.0;
            if fraction - last < self.delta && !reached_end {
                return None;
            }
        }
        Some(self.report())
    }

    pub fn stage(
        &mut self,
        stage: Option<&str>,
        estimated_remaining: Option<Duration>,
    ) -> Option<ProgressUpdate> {
        if let Some(remaining) = estimated_remaining {
            self.time_remaining = Some(remaining.as_secs_f64());
        }
        let stage = stage?;
        if self.stage.as_deref() == Some(stage) {
            return None;
        }
        self.stage = Some(stage.to_string());
        Some(self.report())
    }

    fn report(&mut self) -> ProgressUpdate {
        self.last_reported = Some(self.highest);
        ProgressUpdate {
            progress: self.highest,
            stage: self.stage.clone(),
            time_remaining: self.time_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivered(throttle: &mut ProgressThrottle, fractions: &[f64]) -> Vec<f64> {
        fractions
            .iter()
            .filter_map(|f| throttle.fraction(*f))
            .map(|update| update.progress)
            .collect()
    }

    #[test]
    fn sub_delta_changes_are_held_back() {
        let mut throttle = ProgressThrottle::new(0.01);
        assert_eq!(delivered(&mut throttle, &[0.10, 0.105, 0.30]), vec![0.10, 0.30]);
    }

    #[test]
    fn regressions_are_dropped() {
        let mut throttle = ProgressThrottle::new(0.01);
        assert_eq!(
            delivered(&mut throttle, &[0.30, 0.10, 0.25, 0.5]),
            vec![0.30, 0.5]
        );
    }

    #[test]
    fn completion_is_delivered_even_within_delta() {
        let mut throttle = ProgressThrottle::new(0.01);
        assert_eq!(delivered(&mut throttle, &[0.995, 1.0, 1.0]), vec![0.995, 1.0]);
    }

    #[test]
    fn stage_change_is_delivered_at_unchanged_fraction() {
        let mut throttle = ProgressThrottle::new(0.01);
        throttle.fraction(0.4);

        let update = throttle
            .stage(Some("Generating Mesh"), Some(Duration::from_secs(12)))
            .unwrap();
        assert_eq!(update.progress, 0.4);
        assert_eq!(update.stage.as_deref(), Some("Generating Mesh"));
        assert_eq!(update.time_remaining, Some(12.0));

        assert!(throttle.stage(Some("Generating Mesh"), None).is_none());
    }

    #[test]
    fn payload_omits_missing_fields() {
        let mut throttle = ProgressThrottle::new(0.01);
        let update = throttle.fraction(0.25).unwrap();
        assert_eq!(
            serde_json::to_value(update).unwrap(),
            serde_json::json!({ "progress": 0.25 })
        );
    }
}
