//! Error types for the mdpdfm library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`]: **fatal**. The job cannot produce its artifact
//!   (undecodable input, converter missing, a diagram failed to render).
//!   Returned as `Err(PipelineError)` from [`crate::convert`] entry points.
//!
//! * [`ResourceError`]: **non-fatal**. One image reference could not be
//!   resolved (404, timeout, missing local file). The reference is left as it
//!   appeared in the source and the job carries on; the failure is recorded in
//!   [`crate::pipeline::resources::ResourceReference`] and surfaced through
//!   [`crate::output::JobReport::unresolved_resources`].
//!
//! Pure text stages (alert transform, diagram sanitizing) are total functions
//! and have no error type at all.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mdpdfm library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Markdown file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// The file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    InputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source bytes are not valid UTF-8 text.
    #[error(
        "The file '{name}' is not a valid text file (invalid UTF-8 at byte {valid_up_to}).\n\
Make sure you are converting a Markdown (.md) file, not a binary file like a PDF or an image."
    )]
    InvalidInputEncoding { name: String, valid_up_to: usize },

    // ── External converter errors ─────────────────────────────────────────
    /// The document-converter executable could not be found or started.
    #[error(
        "'{program}' not found. Install pandoc (https://pandoc.org/installing.html) \
to export DOCX, or point --converter at an existing binary."
    )]
    MissingExternalTool { program: String },

    /// The document converter ran and exited with a failure status.
    #[error("{program} failed ({status}):\n{stderr}")]
    ExternalToolFailure {
        program: String,
        status: String,
        stderr: String,
    },

    /// The document converter did not finish in time and was killed.
    #[error("{program} did not finish within {secs}s")]
    ExternalToolTimeout { program: String, secs: u64 },

    // ── Rendering errors ──────────────────────────────────────────────────
    /// Diagrams never reached a terminal state and nothing rendered.
    #[error(
        "Timed out after {secs}s waiting for diagrams ({pending} of {total} still pending).\n\
No diagram rendered and no explicit error was reported; the diagram runtime probably failed to load."
    )]
    RenderTimeout {
        secs: u64,
        pending: usize,
        total: usize,
    },

    /// A diagram container reported an explicit error state.
    #[error("Diagram {index} failed to render: {message}")]
    RenderError { index: usize, message: String },

    /// A standalone-image job found nothing to capture.
    #[error("No diagram found to capture. Add a ```mermaid block or use --format pdf.")]
    NoDiagrams,

    /// The rendering engine could not be launched.
    #[error(
        "Failed to launch the headless browser: {0}\n\
Install Chrome or Chromium, or pass --browser /path/to/chrome."
    )]
    EngineUnavailable(String),

    /// The rendering engine failed mid-job (navigation, scripting, capture).
    #[error("Rendering engine error during {stage}: {detail}")]
    Engine { stage: &'static str, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Shorthand for wrapping an engine-side failure at a named stage.
    pub(crate) fn engine(stage: &'static str, detail: impl std::fmt::Display) -> Self {
        PipelineError::Engine {
            stage,
            detail: detail.to_string(),
        }
    }
}

/// A non-fatal error for a single resource reference.
///
/// Recorded next to the reference that failed; the reference text is left
/// untouched in the output document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ResourceError {
    /// Network or protocol failure while downloading.
    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// The download exceeded the per-request timeout.
    #[error("Fetching '{url}' timed out after {secs}s")]
    FetchTimeout { url: String, secs: u64 },

    /// The server answered with a non-success status.
    #[error("Fetching '{url}' returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// A local reference points at a path that does not exist.
    #[error("Local resource not found: '{path}'")]
    NotFound { path: String },

    /// Writing the downloaded resource to disk failed.
    #[error("I/O error for '{token}': {detail}")]
    Io { token: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_encoding_display_has_hint() {
        let e = PipelineError::InvalidInputEncoding {
            name: "report.pdf".into(),
            valid_up_to: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("report.pdf"), "got: {msg}");
        assert!(msg.contains("Markdown"), "got: {msg}");
    }

    #[test]
    fn missing_tool_display() {
        let e = PipelineError::MissingExternalTool {
            program: "pandoc".into(),
        };
        assert!(e.to_string().contains("pandoc"));
    }

    #[test]
    fn external_failure_includes_stderr() {
        let e = PipelineError::ExternalToolFailure {
            program: "pandoc".into(),
            status: "exit status: 64".into(),
            stderr: "Unknown option --foo".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exit status: 64"));
        assert!(msg.contains("Unknown option --foo"));
    }

    #[test]
    fn render_error_names_diagram() {
        let e = PipelineError::RenderError {
            index: 2,
            message: "Parse error on line 3".into(),
        };
        assert!(e.to_string().contains("Diagram 2"));
        assert!(e.to_string().contains("Parse error on line 3"));
    }

    #[test]
    fn render_timeout_counts() {
        let e = PipelineError::RenderTimeout {
            secs: 30,
            pending: 2,
            total: 3,
        };
        assert!(e.to_string().contains("2 of 3"));
    }

    #[test]
    fn resource_error_serializes() {
        let e = ResourceError::HttpStatus {
            url: "https://example.org/a.png".into(),
            status: 404,
        };
        let json = serde_json::to_string(&e).expect("serialize");
        assert!(json.contains("404"));
    }
}
