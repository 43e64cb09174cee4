//! Pipeline stages for Markdown rendering.
//!
//! Each submodule implements one step; [`crate::convert`] wires them together
//! per output format.
//!
//! ## Data Flow
//!
//! ```text
//!                     ┌─▶ document ──▶ capture (page)      ──▶ PDF
//! input ──▶ resources ├─▶ document ──▶ capture (diagram)   ──▶ PNG
//!                     └─▶ alerts ──▶ diagrams ──▶ converter ──▶ DOCX
//! ```
//!
//! 1. [`input`]     read the source and pick the base directory
//! 2. [`resources`] download remote images, absolutize local ones; the only
//!    stage with network I/O
//! 3. [`document`]  assemble a themed standalone HTML page; diagram sources are
//!    cleaned up by [`mermaid`]
//! 4. [`capture`]   drive an [`engine`] surface through load, readiness and
//!    capture; runs in `spawn_blocking` since the browser protocol is blocking
//! 5. [`alerts`]    rewrite GFM alert blocks into HTML the converter keeps
//! 6. [`diagrams`]  rasterize fenced diagrams and substitute image references
//! 7. [`converter`] run the external converter under a timeout
//!
//! Intermediate files live in a per-job [`workspace`].

pub mod alerts;
pub mod capture;
pub mod converter;
pub mod diagrams;
pub mod document;
pub mod engine;
pub mod input;
pub mod mermaid;
pub mod resources;
pub mod workspace;
