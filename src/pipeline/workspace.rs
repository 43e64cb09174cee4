//! Per-job scratch space and artifact writes.
//!
//! Every intermediate file of a job (assembled HTML, downloaded images,
//! diagram captures, the rewritten markdown for the converter) lives in one
//! [`JobWorkspace`], which is removed when dropped: on success, on soft
//! failure, and on error unwinding alike. Files the caller asked to keep are
//! copied out beside the output first.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Temporary directory owned by one job.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
}

impl JobWorkspace {
    pub fn create() -> Result<Self, PipelineError> {
        let dir = tempfile::Builder::new()
            .prefix("mdpdfm-")
            .tempdir()
            .map_err(|e| PipelineError::Internal(format!("Failed to create workspace: {e}")))?;
        debug!("Workspace: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `contents` to `name` inside the workspace.
    pub async fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf, PipelineError> {
        let path = self.file(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| PipelineError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }
}

/// Write `bytes` to `path` atomically: sibling temp file, then rename.
///
/// Parent directories are created as needed.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let fail = |e: std::io::Error| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(fail(e));
    }
    Ok(())
}

/// Copy a workspace file to a retention path beside the output.
pub async fn retain(src: &Path, dest: &Path) -> Result<PathBuf, PipelineError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::OutputWriteFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;
    }
    tokio::fs::copy(src, dest)
        .await
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;
    debug!("Retained {}", dest.display());
    Ok(dest.to_path_buf())
}

/// `{output_stem}.html` beside the output.
pub fn retained_markup_path(output: &Path) -> PathBuf {
    output.with_extension("html")
}

/// `{output_stem}.md` beside the output: the text handed to the converter.
pub fn retained_source_path(output: &Path) -> PathBuf {
    output.with_extension("md")
}

/// `{output_stem}_diagram_{n}.png` beside the output, `n` starting at 1.
pub fn retained_diagram_path(output: &Path, n: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}_diagram_{n}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspace_is_removed_on_drop() {
        let ws = JobWorkspace::create().unwrap();
        let path = ws.write("a.txt", "x").await.unwrap();
        let root = ws.path().to_path_buf();
        assert!(path.exists());
        drop(ws);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/deeper/out.pdf");
        write_atomic(&out, b"%PDF").await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"%PDF");
        let names: Vec<_> = std::fs::read_dir(out.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn retention_names() {
        let out = Path::new("/tmp/out/report.docx");
        assert_eq!(retained_markup_path(out), Path::new("/tmp/out/report.html"));
        assert_eq!(retained_source_path(out), Path::new("/tmp/out/report.md"));
        assert_eq!(
            retained_diagram_path(out, 2),
            Path::new("/tmp/out/report_diagram_2.png")
        );
    }

    #[tokio::test]
    async fn retain_copies() {
        let ws = JobWorkspace::create().unwrap();
        let src = ws.write("doc.html", "<html>").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dest = retain(&src, &dir.path().join("keep.html")).await.unwrap();
        drop(ws);
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "<html>");
    }
}
