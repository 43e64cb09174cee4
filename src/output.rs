//! Output types returned by rendering jobs.

use crate::config::OutputFormat;
use crate::pipeline::resources::ResourceReference;
use serde::Serialize;
use std::path::PathBuf;

/// Terminal status of a successful job.
///
/// Soft failures the job recovered from are listed in `warnings`;
/// image references that could not be resolved are also listed individually
/// in `unresolved_resources`.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Source file path, or `<memory>`.
    pub source: String,
    pub format: OutputFormat,
    pub output_path: PathBuf,
    /// Name of the palette actually used (after fallback).
    pub theme: String,

    /// Diagram containers (PDF/PNG) or fenced diagram blocks (DOCX) in the document.
    pub diagrams: usize,

    /// References left as written in the source.
    pub unresolved_resources: Vec<ResourceReference>,

    pub warnings: Vec<String>,

    /// Diagnostic files kept beside the output.
    pub retained: Vec<PathBuf>,

    /// Wall-clock time for the whole job.
    pub duration_ms: u64,
}

impl JobReport {
    /// True when the job produced its artifact without any soft failure.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.unresolved_resources.is_empty()
    }
}
