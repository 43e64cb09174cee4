//! External document converter (pandoc by default).
//!
//! Availability is probed once per [`ExternalConverter`] with
//! `<program> --version` and memoized; the conversion itself runs as
//! `<program> <input> -o <output>` under a timeout, with the child killed if
//! the timeout fires.

use crate::error::PipelineError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Handle to the external converter executable.
#[derive(Debug)]
pub struct ExternalConverter {
    program: String,
    timeout: Duration,
    available: OnceCell<bool>,
}

impl ExternalConverter {
    pub fn new(program: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(timeout_secs),
            available: OnceCell::new(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether `<program> --version` succeeds. Probed on first call only.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let ok = probe(&self.program).await;
                debug!("Converter '{}' available: {}", self.program, ok);
                ok
            })
            .await
    }

    /// Convert `input` into `output`; the output format follows the output
    /// file's extension.
    pub async fn convert(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        if !self.is_available().await {
            return Err(PipelineError::MissingExternalTool {
                program: self.program.clone(),
            });
        }

        info!("Running {}...", self.program);
        let child = Command::new(&self.program)
            .arg(input)
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| PipelineError::ExternalToolTimeout {
                program: self.program.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| PipelineError::ExternalToolFailure {
                program: self.program.clone(),
                status: "wait failed".into(),
                stderr: e.to_string(),
            })?;

        if !result.status.success() {
            return Err(PipelineError::ExternalToolFailure {
                program: self.program.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn spawn_error(&self, e: std::io::Error) -> PipelineError {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::MissingExternalTool {
                program: self.program.clone(),
            }
        } else {
            PipelineError::ExternalToolFailure {
                program: self.program.clone(),
                status: "failed to start".into(),
                stderr: e.to_string(),
            }
        }
    }
}

async fn probe(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_program() {
        let c = ExternalConverter::new("mdpdfm-no-such-converter", 5);
        assert!(!c.is_available().await);
        let err = c
            .convert(Path::new("a.md"), Path::new("a.docx"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingExternalTool { .. }));
    }

    #[tokio::test]
    async fn successful_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let prog = script(
            dir.path(),
            "conv",
            r#"[ "$1" = "--version" ] && exit 0
cp "$1" "$3""#,
        );
        let input = dir.path().join("in.md");
        let output = dir.path().join("out.docx");
        std::fs::write(&input, "# hi").unwrap();

        let c = ExternalConverter::new(prog.to_string_lossy(), 5);
        c.convert(&input, &output).await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "# hi");
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let prog = script(
            dir.path(),
            "conv",
            r#"[ "$1" = "--version" ] && exit 0
echo "bad input" >&2
exit 3"#,
        );
        let c = ExternalConverter::new(prog.to_string_lossy(), 5);
        let err = c
            .convert(Path::new("in.md"), &dir.path().join("o.docx"))
            .await
            .unwrap_err();
        match err {
            PipelineError::ExternalToolFailure { stderr, .. } => assert_eq!(stderr, "bad input"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_converter_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let prog = script(
            dir.path(),
            "conv",
            r#"[ "$1" = "--version" ] && exit 0
sleep 5"#,
        );
        let c = ExternalConverter::new(prog.to_string_lossy(), 1);
        let err = c
            .convert(Path::new("in.md"), &dir.path().join("o.docx"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExternalToolTimeout { secs: 1, .. }));
    }
}
