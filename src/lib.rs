//! # mdpdfm
//!
//! Render Markdown into PDF, PNG or DOCX.
//!
//! PDF and PNG output go through a headless browser: the document is assembled
//! into a themed HTML page, Mermaid diagrams are drawn in the page, and the
//! result is printed (PDF) or a single diagram is screenshotted (PNG). DOCX
//! output goes through an external document converter (pandoc by default);
//! since the converter cannot draw diagrams, each one is rasterized in the
//! browser first and swapped for an image reference.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Load       read the file (strict UTF-8) or take in-memory text
//!  ├─ 2. Resources  download remote images, absolutize local ones
//!  ├─ 3a. PDF/PNG   assemble HTML ─▶ browser ─▶ wait for diagrams ─▶ print / screenshot
//!  ├─ 3b. DOCX      alerts ─▶ rasterize diagrams ─▶ external converter
//!  └─ 4. Output     atomic write, optional retained intermediates
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdpdfm::{OutputFormat, Pipeline, RenderConfig, RenderJob, SourceDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RenderConfig::builder().theme("Nordic").build()?;
//!     let pipeline = Pipeline::default();
//!     let job = RenderJob::new(
//!         SourceDocument::file("README.md"),
//!         OutputFormat::Pdf,
//!         "README.pdf",
//!         config,
//!     );
//!     let report = pipeline.run(&job).await?;
//!     for warning in &report.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! A [`Pipeline`] launches the browser on its first job and keeps it for the
//! rest; prefer one long-lived pipeline over repeated calls to [`convert`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mdpdfm` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mdpdfm = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod theme;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EngineConfig, LayoutMode, OutputFormat, RenderConfig, RenderConfigBuilder};
pub use convert::{convert, convert_sync, default_output_path, Pipeline, RenderJob};
pub use error::{PipelineError, ResourceError};
pub use output::JobReport;
pub use pipeline::engine::{RenderEngine, RenderSurface};
pub use pipeline::input::SourceDocument;
pub use pipeline::resources::ResourceFetcher;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use theme::{Theme, THEMES};
