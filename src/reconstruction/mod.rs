pub mod controller;
pub mod filter;
pub mod progress;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ReconstructionError;

pub use controller::{
    ReconstructionController, ReconstructionEvent, ReconstructionEventSink, ReconstructionJob,
};
pub use filter::UntilProcessingComplete;
pub use progress::{ProgressThrottle, ProgressUpdate};

/// Processing time versus mesh and texture fidelity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Low,
    Medium,
    High,
}

impl Default for DetailLevel {
    fn default() -> Self {
        DetailLevel::Medium
    }
}

impl DetailLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DetailLevel::Low => "low",
            DetailLevel::Medium => "medium",
            DetailLevel::High => "high",
        }
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailLevel {
    type Err = ReconstructionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "reduced" => Ok(DetailLevel::Low),
            "medium" => Ok(DetailLevel::Medium),
            "high" | "full" => Ok(DetailLevel::High),
            other => Err(ReconstructionError::Input(format!(
                "unknown detail level '{other}'"
            ))),
        }
    }
}
