//! Source loading: turn a file path or in-memory string into validated text.
//!
//! Files are read as raw bytes and decoded strictly. A binary file (a PDF, an
//! image) handed to the pipeline by mistake fails here with
//! [`PipelineError::InvalidInputEncoding`] instead of producing garbage output
//! several stages later.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a job's markdown comes from.
#[derive(Debug, Clone)]
pub enum SourceDocument {
    /// A markdown file on disk. Relative image paths resolve against its directory.
    File(PathBuf),
    /// In-memory markdown. Relative image paths resolve against `base_dir`.
    Text { text: String, base_dir: PathBuf },
}

impl SourceDocument {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        SourceDocument::File(path.into())
    }

    /// In-memory markdown resolving relative paths against the current directory.
    pub fn text(text: impl Into<String>) -> Self {
        SourceDocument::Text {
            text: text.into(),
            base_dir: PathBuf::from("."),
        }
    }

    /// Human-readable label for logs and reports.
    pub fn display_name(&self) -> String {
        match self {
            SourceDocument::File(p) => p.display().to_string(),
            SourceDocument::Text { .. } => "<memory>".to_string(),
        }
    }

    /// File stem used to name derived artifacts, if the source is a file.
    pub fn stem(&self) -> Option<&str> {
        match self {
            SourceDocument::File(p) => p.file_stem().and_then(|s| s.to_str()),
            SourceDocument::Text { .. } => None,
        }
    }
}

/// Decoded source text plus the directory relative references resolve against.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub text: String,
    pub base_dir: PathBuf,
}

/// Load and validate a source document.
pub async fn load_source(source: &SourceDocument) -> Result<LoadedSource, PipelineError> {
    match source {
        SourceDocument::Text { text, base_dir } => Ok(LoadedSource {
            text: text.clone(),
            base_dir: base_dir.clone(),
        }),
        SourceDocument::File(path) => {
            let bytes = read_file(path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let text = decode_text(bytes, &name)?;
            let base_dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            debug!("Loaded {} ({} bytes)", path.display(), text.len());
            Ok(LoadedSource { text, base_dir })
        }
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, PipelineError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PipelineError::InputNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(PipelineError::InputReadFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Strict UTF-8 decode. A leading byte-order mark is dropped.
pub fn decode_text(bytes: Vec<u8>, name: &str) -> Result<String, PipelineError> {
    let text = String::from_utf8(bytes).map_err(|e| PipelineError::InvalidInputEncoding {
        name: name.to_string(),
        valid_up_to: e.utf8_error().valid_up_to(),
    })?;
    Ok(match text.strip_prefix('\u{FEFF}') {
        Some(rest) => rest.to_string(),
        None => text,
    })
}
