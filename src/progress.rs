//! Progress-callback trait for per-job rendering events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::RenderConfigBuilder::progress_callback`] to receive stage
//! transitions, log lines and the job's terminal status.
//!
//! The library never prints. Callers forward these events to a terminal
//! progress bar, a GUI log pane, or a channel, without the pipeline knowing
//! how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use mdpdfm::{JobProgressCallback, RenderConfig, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl JobProgressCallback for StageLog {
//!     fn on_stage(&self, stage: Stage, _percent: u8) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let config = RenderConfig::builder()
//!     .progress_callback(Arc::new(StageLog::default()))
//!     .build()
//!     .unwrap();
//! ```

use crate::config::OutputFormat;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Coarse pipeline stages, reported in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Loading,
    ResolvingResources,
    TransformingAlerts,
    BuildingDocument,
    Rendering,
    SubstitutingDiagrams,
    Converting,
    Writing,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Loading => "Loading source",
            Stage::ResolvingResources => "Resolving images",
            Stage::TransformingAlerts => "Styling alerts",
            Stage::BuildingDocument => "Building document",
            Stage::Rendering => "Rendering",
            Stage::SubstitutingDiagrams => "Rasterizing diagrams",
            Stage::Converting => "Running converter",
            Stage::Writing => "Writing output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Called by the pipeline as a job moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`: a shared
/// [`crate::Pipeline`] may run jobs from several tasks at once.
pub trait JobProgressCallback: Send + Sync {
    /// Called once when a job starts.
    fn on_job_start(&self, source: &str, format: OutputFormat) {
        let _ = (source, format);
    }

    /// Called on entering a stage. `percent` is a rough overall estimate.
    fn on_stage(&self, stage: Stage, percent: u8) {
        let _ = (stage, percent);
    }

    /// Informational log line.
    fn on_message(&self, message: &str) {
        let _ = message;
    }

    /// Soft failure the job recovered from (unresolved image, render timeout
    /// on page capture, diagram count mismatch).
    fn on_warning(&self, message: &str) {
        let _ = message;
    }

    /// Called once when the artifact has been written.
    fn on_job_complete(&self, output_path: &str, duration_ms: u64) {
        let _ = (output_path, duration_ms);
    }

    /// Called once when the job ends with a fatal error.
    fn on_job_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RenderConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
