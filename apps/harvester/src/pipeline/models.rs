//! Values handed between pipeline stages.
//!
//! Every stage owns its output and passes it downstream by value; nothing
//! here is shared-mutable.

use serde::Serialize;
use thiserror::Error;

/// An index-tagged slice of normalized page text, sized for one extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Position within the page, used to restore order after extraction.
    pub index: usize,
    pub text: String,
}

impl Unit {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Payload size in bytes. This is the quantity bounded by `max_unit_size`.
    pub fn approx_size(&self) -> usize {
        self.text.len()
    }
}

/// Terminal failure recorded for a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeError {
    #[error("rate limited on all {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("extraction service error: {0}")]
    Service(String),
}

/// Result of running one unit through the extraction capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub index: usize,
    pub content: String,
    pub error: Option<OutcomeError>,
}

impl ExtractionOutcome {
    pub fn success(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
            error: None,
        }
    }

    pub fn failure(index: usize, error: OutcomeError) -> Self {
        Self {
            index,
            content: String::new(),
            error: Some(error),
        }
    }

    /// True when the outcome carries content worth compiling.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && !self.content.trim().is_empty()
    }
}

/// A unit that ended in a terminal failure, located by page and index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnit {
    pub page: usize,
    pub index: usize,
    pub error: OutcomeError,
}

/// Per-run counters surfaced to callers alongside the artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub pages: usize,
    pub units_segmented: usize,
    pub units_rejected: usize,
    pub units_dispatched: usize,
    pub units_extracted: usize,
    pub units_empty: usize,
    pub failed_units: Vec<FailedUnit>,
    /// False whenever any dispatched unit failed; the artifact is then partial.
    pub complete: bool,
}
