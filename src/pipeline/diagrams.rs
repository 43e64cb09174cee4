//! Diagram rasterization for the DOCX path.
//!
//! The document converter cannot run the diagram runtime, so each fenced
//! `mermaid` block is rendered to PNG up front and swapped for an image
//! reference. The whole document is rendered once; captures pair with fenced
//! blocks by position.
//!
//! Blocks are located with a line-anchored pattern rather than a full parse.
//! A fence the pattern sees but the parser does not (or the reverse) shows up
//! as a count mismatch, which is reported and tolerated.

use crate::error::PipelineError;
use crate::pipeline::capture::{DiagramSelection, Readiness, RenderEngineAdapter};
use crate::pipeline::document::{DocumentOptions, DocumentRenderer};
use crate::pipeline::resources::markdown_destination;
use crate::pipeline::workspace::{self, JobWorkspace};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

static RE_MERMAID_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^(?:`{3,}|~{3,})mermaid\s*\n(.*?)\n(?:`{3,}|~{3,})").unwrap());

/// A fenced diagram block and where it sits in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MermaidBlock {
    pub raw_source: String,
    pub span: Range<usize>,
}

/// Fenced diagram blocks in document order.
pub fn find_blocks(markdown: &str) -> Vec<MermaidBlock> {
    RE_MERMAID_FENCE
        .captures_iter(markdown)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(MermaidBlock {
                raw_source: caps.get(1).map_or("", |m| m.as_str()).to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Result of pairing blocks with images.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub text: String,
    pub replaced: usize,
    /// Set when the block and image counts differ.
    pub mismatch: Option<String>,
}

/// Replace each block's span with `![Diagram](image)`, last block first so
/// earlier spans stay valid. Pairs positionally up to the shorter count.
pub fn substitute(markdown: &str, blocks: &[MermaidBlock], images: &[PathBuf]) -> Substitution {
    let mismatch = (blocks.len() != images.len()).then(|| {
        format!(
            "Diagram count mismatch: {} fenced block(s), {} rendered element(s); pairing the first {}",
            blocks.len(),
            images.len(),
            blocks.len().min(images.len())
        )
    });

    let pairs = blocks.len().min(images.len());
    let mut text = markdown.to_string();
    for i in (0..pairs).rev() {
        let replacement = format!("![Diagram]({})", markdown_destination(&images[i]));
        text.replace_range(blocks[i].span.clone(), &replacement);
    }
    Substitution {
        text,
        replaced: pairs,
        mismatch,
    }
}

/// Rasterized document ready for the converter.
#[derive(Debug, Clone)]
pub struct Rasterized {
    pub text: String,
    /// Capture files inside the workspace, in document order.
    pub images: Vec<PathBuf>,
    /// Copy of the diagram page kept beside the output, when requested.
    pub markup: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Render every diagram of `markdown` once and substitute the captures.
///
/// `blocks` must come from [`find_blocks`] on the same text. With
/// `keep_markup` set, the diagram page is copied there before the browser
/// sees it, so it survives a render failure.
pub async fn rasterize(
    markdown: &str,
    blocks: &[MermaidBlock],
    adapter: &RenderEngineAdapter,
    workspace: &JobWorkspace,
    options: &DocumentOptions<'_>,
    readiness: Readiness,
    keep_markup: Option<&Path>,
) -> Result<Rasterized, PipelineError> {
    info!("Found {} diagram(s). Rendering...", blocks.len());
    let options = DocumentOptions {
        diagrams_enabled: true,
        ..options.clone()
    };
    let document = DocumentRenderer::shared().render(markdown, &options);
    let html_path = workspace.write("diagrams.html", &document.html).await?;
    let markup = match keep_markup {
        Some(dest) => Some(workspace::retain(&html_path, dest).await?),
        None => None,
    };

    let captured = adapter
        .capture_diagrams(&html_path, DiagramSelection::All, readiness)
        .await?;
    let mut warnings = captured.warnings;

    let mut images = Vec::with_capacity(captured.artifact.len());
    for capture in &captured.artifact {
        let path = workspace
            .write(&format!("diagram_{}.png", capture.sequence_index + 1), &capture.png)
            .await?;
        images.push(path);
    }

    let substitution = substitute(markdown, blocks, &images);
    if let Some(message) = substitution.mismatch {
        warn!("{}", message);
        warnings.push(message);
    }
    info!("Substituted {} diagram(s)", substitution.replaced);
    Ok(Rasterized {
        text: substitution.text,
        images,
        markup,
        warnings,
    })
}
