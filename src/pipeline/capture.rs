//! Drives a [`RenderEngine`] through one capture: load, wait for diagrams,
//! classify failures, extract the artifact.
//!
//! ## Readiness
//!
//! Every diagram container carries `data-state` once the runner script has
//! handled it. Documents without containers skip waiting entirely. Otherwise
//! the surface is polled until every container is `processed` or `error`:
//!
//! | outcome                              | page capture | diagram capture |
//! |--------------------------------------|--------------|-----------------|
//! | any container in `error`             | `RenderError` | `RenderError`  |
//! | timeout, nothing processed           | warn, capture | `RenderTimeout` |
//! | timeout, some processed              | warn, capture | warn, capture  |
//!
//! Each call opens exactly one surface, which is dropped (and released) before
//! the call returns, on every path.

use crate::config::LayoutMode;
use crate::error::PipelineError;
use crate::pipeline::document::DIAGRAM_CLASS;
use crate::pipeline::engine::{PdfLayout, RenderEngine, RenderSurface, Viewport};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Page capture surfaces are this tall before the content height is known.
const PAGE_VIEWPORT_HEIGHT: u32 = 1000;

/// Diagram capture surfaces are large enough that wide diagrams are not clipped.
pub const DIAGRAM_VIEWPORT: Viewport = Viewport {
    width: 2400,
    height: 2000,
};

/// Extra height added below the measured content on continuous pages.
const CONTINUOUS_BOTTOM_PAD_PX: f64 = 100.0;

/// Timing knobs for the readiness protocol.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub timeout: Duration,
    pub poll: Duration,
    pub settle: Duration,
}

/// Which diagram containers an isolated capture returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramSelection {
    /// Only the first container; a document without any is an error.
    First,
    /// Every container in document order; may be empty.
    All,
}

/// One rasterized diagram container.
#[derive(Debug, Clone)]
pub struct DiagramCapture {
    /// Zero-based position among the document's containers.
    pub sequence_index: usize,
    pub png: Vec<u8>,
}

/// A captured artifact plus the soft failures met on the way.
#[derive(Debug, Clone)]
pub struct Captured<T> {
    pub artifact: T,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DiagramStatus {
    total: usize,
    processed: usize,
    #[serde(default)]
    errors: Vec<DiagramFailure>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiagramFailure {
    index: usize,
    message: String,
}

impl DiagramStatus {
    fn pending(&self) -> usize {
        self.total
            .saturating_sub(self.processed)
            .saturating_sub(self.errors.len())
    }
}

/// Rendering-engine adapter.
#[derive(Clone)]
pub struct RenderEngineAdapter {
    engine: Arc<dyn RenderEngine>,
}

impl RenderEngineAdapter {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self { engine }
    }

    /// Print the whole document to PDF.
    pub async fn capture_page(
        &self,
        document: &Path,
        layout: LayoutMode,
        viewport_width: u32,
        readiness: Readiness,
    ) -> Result<Captured<Vec<u8>>, PipelineError> {
        let engine = Arc::clone(&self.engine);
        let url = file_url(document)?;
        tokio::task::spawn_blocking(move || {
            let mut surface = engine.open_surface(Viewport {
                width: viewport_width,
                height: PAGE_VIEWPORT_HEIGHT,
            })?;
            capture_page_blocking(surface.as_mut(), &url, layout, viewport_width, readiness)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Render task panicked: {e}")))?
    }

    /// Rasterize diagram containers individually.
    pub async fn capture_diagrams(
        &self,
        document: &Path,
        selection: DiagramSelection,
        readiness: Readiness,
    ) -> Result<Captured<Vec<DiagramCapture>>, PipelineError> {
        let engine = Arc::clone(&self.engine);
        let url = file_url(document)?;
        tokio::task::spawn_blocking(move || {
            let mut surface = engine.open_surface(DIAGRAM_VIEWPORT)?;
            capture_diagrams_blocking(surface.as_mut(), &url, selection, readiness)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Render task panicked: {e}")))?
    }
}

fn capture_page_blocking(
    surface: &mut dyn RenderSurface,
    url: &str,
    layout: LayoutMode,
    viewport_width: u32,
    readiness: Readiness,
) -> Result<Captured<Vec<u8>>, PipelineError> {
    surface.load(url)?;
    let warnings = await_diagrams(surface, readiness, false)?
        .into_iter()
        .collect::<Vec<_>>();

    let pdf_layout = match layout {
        LayoutMode::Continuous => {
            let height = content_height(surface)?;
            info!("Canvas: {}px x {}px", viewport_width, height);
            PdfLayout::continuous(viewport_width, height + CONTINUOUS_BOTTOM_PAD_PX)
        }
        LayoutMode::FixedPage => PdfLayout::A4,
    };
    let pdf = surface.print_pdf(&pdf_layout)?;
    Ok(Captured {
        artifact: pdf,
        warnings,
    })
}

fn capture_diagrams_blocking(
    surface: &mut dyn RenderSurface,
    url: &str,
    selection: DiagramSelection,
    readiness: Readiness,
) -> Result<Captured<Vec<DiagramCapture>>, PipelineError> {
    surface.load(url)?;
    let status = read_status(surface)?;
    if status.total == 0 {
        return match selection {
            DiagramSelection::First => Err(PipelineError::NoDiagrams),
            DiagramSelection::All => Ok(Captured {
                artifact: Vec::new(),
                warnings: Vec::new(),
            }),
        };
    }
    let warnings = await_diagrams(surface, readiness, true)?
        .into_iter()
        .collect::<Vec<_>>();

    let limit = match selection {
        DiagramSelection::First => Some(1),
        DiagramSelection::All => None,
    };
    let captures = surface
        .capture_elements(&format!(".{DIAGRAM_CLASS}"), limit)?
        .into_iter()
        .enumerate()
        .map(|(sequence_index, png)| DiagramCapture {
            sequence_index,
            png,
        })
        .collect::<Vec<_>>();
    if captures.is_empty() && selection == DiagramSelection::First {
        return Err(PipelineError::NoDiagrams);
    }
    debug!("Captured {} diagram(s)", captures.len());
    Ok(Captured {
        artifact: captures,
        warnings,
    })
}

/// Run the readiness protocol. Returns a warning when proceeding after a
/// soft timeout.
fn await_diagrams(
    surface: &mut dyn RenderSurface,
    readiness: Readiness,
    isolated: bool,
) -> Result<Option<String>, PipelineError> {
    let initial = read_status(surface)?;
    if initial.total == 0 {
        debug!("No diagrams; skipping readiness wait");
        return Ok(None);
    }

    info!("Waiting for {} diagram(s) to render...", initial.total);
    let settled = surface.wait_until(&settled_script(), readiness.timeout, readiness.poll)?;
    let status = read_status(surface)?;

    if let Some(failure) = status.errors.first() {
        let message = failure
            .message
            .trim()
            .lines()
            .next()
            .unwrap_or("unknown diagram error")
            .to_string();
        return Err(PipelineError::RenderError {
            index: failure.index + 1,
            message,
        });
    }

    if !settled {
        if isolated && status.processed == 0 {
            return Err(PipelineError::RenderTimeout {
                secs: readiness.timeout.as_secs(),
                pending: status.pending(),
                total: status.total,
            });
        }
        let message = format!(
            "Timed out after {}s waiting for diagrams ({} of {} rendered); capturing anyway",
            readiness.timeout.as_secs(),
            status.processed,
            status.total
        );
        warn!("{}", message);
        return Ok(Some(message));
    }

    surface.pause(readiness.settle);
    Ok(None)
}

fn read_status(surface: &mut dyn RenderSurface) -> Result<DiagramStatus, PipelineError> {
    match surface.evaluate(&status_script())? {
        Some(serde_json::Value::String(json)) => serde_json::from_str(&json)
            .map_err(|e| PipelineError::engine("diagram status", e)),
        other => Err(PipelineError::engine(
            "diagram status",
            format!("unexpected script result {other:?}"),
        )),
    }
}

fn content_height(surface: &mut dyn RenderSurface) -> Result<f64, PipelineError> {
    surface
        .evaluate("document.body.scrollHeight")?
        .and_then(|v| v.as_f64())
        .ok_or_else(|| PipelineError::engine("measure", "document height unavailable"))
}

fn status_script() -> String {
    format!(
        r#"JSON.stringify((function () {{
  const nodes = Array.from(document.querySelectorAll(".{DIAGRAM_CLASS}"));
  const errors = [];
  let processed = 0;
  nodes.forEach(function (el, i) {{
    if (el.dataset.state === "processed") processed += 1;
    else if (el.dataset.state === "error") errors.push({{ index: i, message: el.dataset.error || el.textContent || "" }});
  }});
  return {{ total: nodes.length, processed: processed, errors: errors }};
}})())"#
    )
}

fn settled_script() -> String {
    format!(
        r#"Array.from(document.querySelectorAll(".{DIAGRAM_CLASS}")).every(function (el) {{ return el.dataset.state === "processed" || el.dataset.state === "error"; }})"#
    )
}

/// `file://` URL for an on-disk document.
pub fn file_url(path: &Path) -> Result<String, PipelineError> {
    let absolute = std::path::absolute(path).map_err(|e| {
        PipelineError::Internal(format!("Cannot resolve '{}': {e}", path.display()))
    })?;
    reqwest::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|_| PipelineError::Internal(format!("Not a file path: '{}'", absolute.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    /// Surface replaying fixed diagram states.
    struct Fixed {
        total: usize,
        processed: usize,
        errors: Vec<(usize, &'static str)>,
        settles: bool,
        paused: bool,
        printed: Option<PdfLayout>,
    }

    impl Fixed {
        fn new(total: usize, processed: usize) -> Self {
            Self {
                total,
                processed,
                errors: Vec::new(),
                settles: processed == total,
                paused: false,
                printed: None,
            }
        }
    }

    impl RenderSurface for Fixed {
        fn load(&mut self, _url: &str) -> Result<(), PipelineError> {
            Ok(())
        }

        fn evaluate(&mut self, script: &str) -> Result<Option<Value>, PipelineError> {
            if script.starts_with("JSON.stringify") {
                let errors: Vec<Value> = self
                    .errors
                    .iter()
                    .map(|(i, m)| json!({"index": i, "message": m}))
                    .collect();
                let status = json!({"total": self.total, "processed": self.processed, "errors": errors});
                return Ok(Some(Value::String(status.to_string())));
            }
            if script.contains("scrollHeight") {
                return Ok(Some(json!(2300)));
            }
            Ok(Some(Value::Bool(self.settles)))
        }

        fn print_pdf(&mut self, layout: &PdfLayout) -> Result<Vec<u8>, PipelineError> {
            self.printed = Some(*layout);
            Ok(b"%PDF".to_vec())
        }

        fn capture_elements(
            &mut self,
            _selector: &str,
            limit: Option<usize>,
        ) -> Result<Vec<Vec<u8>>, PipelineError> {
            let n = limit.map_or(self.total, |l| l.min(self.total));
            Ok((0..n).map(|i| vec![i as u8]).collect())
        }

        fn wait_until(
            &mut self,
            _predicate: &str,
            _timeout: Duration,
            _poll: Duration,
        ) -> Result<bool, PipelineError> {
            Ok(self.settles)
        }

        fn pause(&mut self, _duration: Duration) {
            self.paused = true;
        }
    }

    fn readiness() -> Readiness {
        Readiness {
            timeout: Duration::from_secs(30),
            poll: Duration::from_millis(100),
            settle: Duration::from_millis(500),
        }
    }

    #[test]
    fn no_diagrams_skips_waiting() {
        let mut s = Fixed::new(0, 0);
        s.settles = false;
        let out = capture_page_blocking(&mut s, "file:///x.html", LayoutMode::Continuous, 800, readiness())
            .unwrap();
        assert!(out.warnings.is_empty());
        assert!(!s.paused);
        let layout = s.printed.unwrap();
        assert_eq!(layout.paper_width_in, 800.0 / 96.0);
        assert_eq!(layout.paper_height_in, 2400.0 / 96.0);
    }

    #[test]
    fn fixed_page_uses_a4() {
        let mut s = Fixed::new(1, 1);
        capture_page_blocking(&mut s, "u", LayoutMode::FixedPage, 1200, readiness()).unwrap();
        assert_eq!(s.printed, Some(PdfLayout::A4));
        assert!(s.paused);
    }

    #[test]
    fn explicit_error_is_fatal_everywhere() {
        let mut s = Fixed::new(2, 1);
        s.errors.push((1, "Parse error on line 2:\n...A-->"));
        s.settles = true;
        let err = capture_page_blocking(&mut s, "u", LayoutMode::Continuous, 800, readiness())
            .unwrap_err();
        match err {
            PipelineError::RenderError { index, message } => {
                assert_eq!(index, 2);
                assert_eq!(message, "Parse error on line 2:");
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(s.printed.is_none());
    }

    #[test]
    fn silent_timeout_is_soft_for_pages() {
        let mut s = Fixed::new(2, 0);
        let out = capture_page_blocking(&mut s, "u", LayoutMode::Continuous, 800, readiness())
            .unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(s.printed.is_some());
    }

    #[test]
    fn silent_timeout_is_fatal_for_diagrams() {
        let mut s = Fixed::new(2, 0);
        let err = capture_diagrams_blocking(&mut s, "u", DiagramSelection::First, readiness())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RenderTimeout {
                pending: 2,
                total: 2,
                ..
            }
        ));
    }

    #[test]
    fn partial_timeout_is_soft_for_diagrams() {
        let mut s = Fixed::new(3, 2);
        s.settles = false;
        let out = capture_diagrams_blocking(&mut s, "u", DiagramSelection::All, readiness()).unwrap();
        assert_eq!(out.artifact.len(), 3);
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn first_selection() {
        let mut s = Fixed::new(3, 3);
        let out = capture_diagrams_blocking(&mut s, "u", DiagramSelection::First, readiness()).unwrap();
        assert_eq!(out.artifact.len(), 1);
        assert_eq!(out.artifact[0].sequence_index, 0);
    }

    #[test]
    fn no_diagrams_for_image_job() {
        let mut s = Fixed::new(0, 0);
        let err = capture_diagrams_blocking(&mut s, "u", DiagramSelection::First, readiness())
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoDiagrams));
        let mut s = Fixed::new(0, 0);
        let out = capture_diagrams_blocking(&mut s, "u", DiagramSelection::All, readiness()).unwrap();
        assert!(out.artifact.is_empty());
    }

    #[test]
    fn file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let url = file_url(&dir.path().join("doc page.html")).unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("doc%20page.html"));
    }
}
