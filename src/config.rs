//! Configuration types for Markdown rendering jobs.
//!
//! Per-job behaviour is controlled through [`RenderConfig`], built via its
//! [`RenderConfigBuilder`]. Browser-process settings that are shared across
//! jobs live separately in [`EngineConfig`]: one engine instance is reused by
//! many jobs, each with its own `RenderConfig`.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use crate::theme::{Theme, DEFAULT_THEME};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default location of the diagram runtime loaded by rendered documents.
pub const DEFAULT_MERMAID_SCRIPT_URL: &str =
    "https://cdn.jsdelivr.net/npm/mermaid@11.4.1/dist/mermaid.min.js";

/// Configuration for a single rendering job.
///
/// Built via [`RenderConfig::builder()`] or using [`RenderConfig::default()`].
///
/// # Example
/// ```rust
/// use mdpdfm::{LayoutMode, RenderConfig};
///
/// let config = RenderConfig::builder()
///     .theme("Dracula")
///     .content_width_px(960)
///     .layout(LayoutMode::FixedPage)
///     .build()
///     .unwrap();
/// assert_eq!(config.theme().name, "Dracula");
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// Palette name. Unknown names fall back to "GitHub Light". Default: "GitHub Light".
    pub theme: String,

    /// Maximum width of the content column in CSS pixels. Range: 320–4000. Default: 800.
    pub content_width_px: u32,

    /// Render fenced `mermaid` blocks as diagrams. Default: true.
    ///
    /// When false, diagram fences are rendered as ordinary code blocks and the
    /// diagram runtime is not loaded at all.
    pub diagrams_enabled: bool,

    /// Continuous single-page layout vs fixed A4 pages. Default: [`LayoutMode::Continuous`].
    pub layout: LayoutMode,

    /// Lock the rendering viewport to 800 px (true) or widen it to 1200 px. Default: true.
    pub fixed_page_width: bool,

    /// Keep the assembled HTML document next to the output. Default: false.
    pub save_intermediate_markup: bool,

    /// Keep per-diagram PNG captures next to the output (DOCX path). Default: false.
    pub save_diagram_images: bool,

    /// Per-request timeout for remote image downloads, in seconds. Default: 15.
    pub fetch_timeout_secs: u64,

    /// Upper bound on concurrent resource resolutions. Default: 8.
    pub fetch_concurrency: usize,

    /// Persistent directory for downloaded remote images. Default: None.
    ///
    /// With `None` every job downloads into its own temporary workspace, so
    /// nothing is reused between runs. Point this at a stable directory to
    /// reuse downloads across runs: files are named after a hash of their URL
    /// and skipped when already present.
    pub resource_cache_dir: Option<PathBuf>,

    /// Upper bound on waiting for diagrams to finish rendering, in seconds. Default: 30.
    pub diagram_timeout_secs: u64,

    /// Readiness polling cadence, in milliseconds. Default: 100.
    pub poll_interval_ms: u64,

    /// Pause after diagrams report ready, letting layout settle. Default: 500 ms.
    pub settle_delay_ms: u64,

    /// URL (or `file://` path) of the mermaid runtime. Default: jsDelivr, mermaid 11.4.1.
    pub mermaid_script_url: String,

    /// Document-converter executable used for DOCX. Default: "pandoc".
    pub converter_program: String,

    /// Upper bound on one converter invocation, in seconds. Default: 120.
    pub converter_timeout_secs: u64,

    /// Caller-supplied sink for stage and log events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            theme: DEFAULT_THEME.to_string(),
            content_width_px: 800,
            diagrams_enabled: true,
            layout: LayoutMode::default(),
            fixed_page_width: true,
            save_intermediate_markup: false,
            save_diagram_images: false,
            fetch_timeout_secs: 15,
            fetch_concurrency: 8,
            resource_cache_dir: None,
            diagram_timeout_secs: 30,
            poll_interval_ms: 100,
            settle_delay_ms: 500,
            mermaid_script_url: DEFAULT_MERMAID_SCRIPT_URL.to_string(),
            converter_program: "pandoc".to_string(),
            converter_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("theme", &self.theme)
            .field("content_width_px", &self.content_width_px)
            .field("diagrams_enabled", &self.diagrams_enabled)
            .field("layout", &self.layout)
            .field("fixed_page_width", &self.fixed_page_width)
            .field("save_intermediate_markup", &self.save_intermediate_markup)
            .field("save_diagram_images", &self.save_diagram_images)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("resource_cache_dir", &self.resource_cache_dir)
            .field("diagram_timeout_secs", &self.diagram_timeout_secs)
            .field("converter_program", &self.converter_program)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// The resolved palette for this job.
    pub fn theme(&self) -> &'static Theme {
        Theme::resolve(&self.theme)
    }

    /// Viewport width used for page capture.
    pub fn viewport_width(&self) -> u32 {
        if self.fixed_page_width {
            800
        } else {
            1200
        }
    }

    pub fn diagram_timeout(&self) -> Duration {
        Duration::from_secs(self.diagram_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn theme(mut self, name: impl Into<String>) -> Self {
        self.config.theme = name.into();
        self
    }

    pub fn content_width_px(mut self, px: u32) -> Self {
        self.config.content_width_px = px.clamp(320, 4000);
        self
    }

    pub fn diagrams_enabled(mut self, v: bool) -> Self {
        self.config.diagrams_enabled = v;
        self
    }

    pub fn layout(mut self, layout: LayoutMode) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn fixed_page_width(mut self, v: bool) -> Self {
        self.config.fixed_page_width = v;
        self
    }

    pub fn save_intermediate_markup(mut self, v: bool) -> Self {
        self.config.save_intermediate_markup = v;
        self
    }

    pub fn save_diagram_images(mut self, v: bool) -> Self {
        self.config.save_diagram_images = v;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.config.fetch_concurrency = n.clamp(1, 64);
        self
    }

    pub fn resource_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.resource_cache_dir = Some(dir.into());
        self
    }

    pub fn diagram_timeout_secs(mut self, secs: u64) -> Self {
        self.config.diagram_timeout_secs = secs;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(10);
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn mermaid_script_url(mut self, url: impl Into<String>) -> Self {
        self.config.mermaid_script_url = url.into();
        self
    }

    pub fn converter_program(mut self, program: impl Into<String>) -> Self {
        self.config.converter_program = program.into();
        self
    }

    pub fn converter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.converter_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, PipelineError> {
        let c = &self.config;
        if c.diagram_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Diagram timeout must be ≥ 1 second".into(),
            ));
        }
        if c.converter_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Converter timeout must be ≥ 1 second".into(),
            ));
        }
        if c.converter_program.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Converter program must not be empty".into(),
            ));
        }
        if c.mermaid_script_url.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Mermaid script URL must not be empty".into(),
            ));
        }
        if Theme::named(&c.theme).is_none() {
            warn!("Unknown theme '{}', using '{}'", c.theme, DEFAULT_THEME);
        }
        Ok(self.config)
    }
}

// ── Engine settings ──────────────────────────────────────────────────────

/// Settings for the shared headless-browser process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Explicit browser executable. None → auto-detect an installed Chrome/Chromium.
    pub browser_path: Option<PathBuf>,

    /// Device pixel ratio for every surface the engine opens. Default: 2.0.
    ///
    /// Element captures (standalone diagrams, DOCX diagram images) come out at
    /// this multiple of their CSS size.
    pub device_scale_factor: f64,

    /// Run the browser inside its sandbox. Default: true.
    ///
    /// Containers without user namespaces usually need this off.
    pub sandbox: bool,

    /// Seconds the browser connection may sit idle before it is dropped. Default: 300.
    pub idle_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            browser_path: None,
            device_scale_factor: 2.0,
            sandbox: true,
            idle_timeout_secs: 300,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// The artifact a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Continuous or paginated PDF of the whole document. (default)
    #[default]
    Pdf,
    /// Standalone raster image of the document's first diagram.
    Png,
    /// Word-processor document produced by the external converter.
    Docx,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Png => "png",
            OutputFormat::Docx => "docx",
        }
    }

    /// Infer the format from an output path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(OutputFormat::Pdf),
            "png" => Some(OutputFormat::Png),
            "docx" => Some(OutputFormat::Docx),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Page geometry for PDF output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayoutMode {
    /// One page exactly as tall as the content. (default)
    #[default]
    Continuous,
    /// Standard A4 pages with 1 cm margins.
    FixedPage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let c = RenderConfig::default();
        assert_eq!(c.theme, "GitHub Light");
        assert_eq!(c.content_width_px, 800);
        assert!(c.diagrams_enabled);
        assert_eq!(c.layout, LayoutMode::Continuous);
        assert_eq!(c.viewport_width(), 800);
        assert!(c.resource_cache_dir.is_none());
    }

    #[test]
    fn builder_clamps_values() {
        let c = RenderConfig::builder()
            .content_width_px(10)
            .fetch_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.content_width_px, 320);
        assert_eq!(c.fetch_concurrency, 1);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = RenderConfig::builder()
            .diagram_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn wide_viewport() {
        let c = RenderConfig::builder().fixed_page_width(false).build().unwrap();
        assert_eq!(c.viewport_width(), 1200);
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out/Report.PDF")),
            Some(OutputFormat::Pdf)
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("a.docx")),
            Some(OutputFormat::Docx)
        );
        assert_eq!(OutputFormat::from_path(Path::new("a.txt")), None);
        assert_eq!(OutputFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn theme_resolution() {
        let c = RenderConfig::builder().theme("nordic").build().unwrap();
        assert_eq!(c.theme().name, "Nordic");
    }

    #[derive(Clone, Default)]
    struct LogSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unknown_theme_warns_once_per_config() {
        let sink = LogSink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let c = RenderConfig::builder().theme("No Such Theme").build().unwrap();
            for _ in 0..3 {
                assert_eq!(c.theme().name, DEFAULT_THEME);
            }
        });

        let logged = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logged.matches("Unknown theme 'No Such Theme'").count(), 1);
    }
}
