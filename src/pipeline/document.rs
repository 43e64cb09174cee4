//! Markdown → self-contained HTML document.
//!
//! The parser runs with GFM extensions (tables, footnotes, task lists,
//! strikethrough, alerts) and skips YAML front matter. Fenced `mermaid` blocks
//! are intercepted in the event stream and replaced by a container holding
//! the sanitized, escaped diagram source; the embedded runner script turns
//! each container into an SVG inside the rendering engine and records the
//! outcome in `data-state` (`processed` or `error`).
//!
//! [`DocumentRenderer`] holds only immutable parser options and is shared
//! through [`DocumentRenderer::shared`].

use crate::config::RenderConfig;
use crate::pipeline::alerts::AlertKind;
use crate::pipeline::mermaid;
use crate::theme::Theme;
use once_cell::sync::Lazy;
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use std::fmt::Write;

/// CSS class of a diagram container.
pub const DIAGRAM_CLASS: &str = "mermaid";

static SHARED: Lazy<DocumentRenderer> = Lazy::new(DocumentRenderer::new);

/// Inputs to one document assembly.
#[derive(Debug, Clone)]
pub struct DocumentOptions<'a> {
    pub theme: &'static Theme,
    pub content_width_px: u32,
    pub diagrams_enabled: bool,
    pub mermaid_script_url: &'a str,
}

impl<'a> DocumentOptions<'a> {
    pub fn from_config(config: &'a RenderConfig) -> Self {
        Self {
            theme: config.theme(),
            content_width_px: config.content_width_px,
            diagrams_enabled: config.diagrams_enabled,
            mermaid_script_url: &config.mermaid_script_url,
        }
    }
}

/// An assembled HTML document.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub html: String,
    /// Number of diagram containers in the body.
    pub diagram_count: usize,
}

/// Markdown-to-HTML assembler.
#[derive(Debug, Clone)]
pub struct DocumentRenderer {
    options: Options,
}

impl Default for DocumentRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRenderer {
    pub fn new() -> Self {
        Self {
            options: Options::ENABLE_TABLES
                | Options::ENABLE_FOOTNOTES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_GFM
                | Options::ENABLE_YAML_STYLE_METADATA_BLOCKS,
        }
    }

    /// Process-wide instance.
    pub fn shared() -> &'static DocumentRenderer {
        &SHARED
    }

    /// Render the `<body>` content; returns the HTML and the diagram count.
    pub fn render_body(&self, markdown: &str, diagrams_enabled: bool) -> (String, usize) {
        let mut events: Vec<Event<'_>> = Vec::new();
        let mut diagram: Option<String> = None;
        let mut count = 0;

        for event in Parser::new_ext(markdown, self.options) {
            if let Some(source) = diagram.as_mut() {
                match event {
                    Event::Text(text) => source.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        let container = diagram_container(source);
                        diagram = None;
                        count += 1;
                        events.push(Event::Html(CowStr::from(container)));
                    }
                    _ => {}
                }
                continue;
            }
            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(ref info)))
                    if diagrams_enabled && is_diagram_fence(info) =>
                {
                    diagram = Some(String::new());
                }
                other => events.push(other),
            }
        }

        let mut body = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut body, events.into_iter());
        (body, count)
    }

    /// Assemble the full themed document.
    pub fn render(&self, markdown: &str, opts: &DocumentOptions<'_>) -> RenderedDocument {
        let (body, diagram_count) = self.render_body(markdown, opts.diagrams_enabled);
        let mut html = String::with_capacity(body.len() + 8 * 1024);
        html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"UTF-8\">\n");
        if opts.diagrams_enabled {
            let _ = writeln!(
                html,
                "<script src=\"{}\"></script>",
                escape_html(opts.mermaid_script_url)
            );
        }
        html.push_str("<style>\n");
        html.push_str(&stylesheet(opts.theme, opts.content_width_px));
        html.push_str("</style></head>\n<body><div id=\"canvas\">\n");
        html.push_str(&body);
        html.push_str("</div>\n");
        if opts.diagrams_enabled {
            html.push_str("<script>\n");
            html.push_str(&runner_script(opts.theme));
            html.push_str("</script>\n");
        }
        html.push_str("</body></html>\n");
        RenderedDocument {
            html,
            diagram_count,
        }
    }
}

fn is_diagram_fence(info: &str) -> bool {
    info.split_whitespace().next() == Some("mermaid")
}

fn diagram_container(source: &str) -> String {
    format!(
        "<div class=\"m-wrap\"><div class=\"{DIAGRAM_CLASS}\">{}</div></div>\n",
        escape_html(&mermaid::sanitize(source))
    )
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

fn stylesheet(t: &Theme, content_width_px: u32) -> String {
    let mut css = format!(
        r#"body {{ background: {bg}; color: {txt}; font-family: -apple-system, "Segoe UI", sans-serif; line-height: 1.6; margin: 0; padding: 0; display: flex; flex-direction: column; align-items: center; width: 100%; }}
#canvas {{ padding: 60px 40px; width: 100%; max-width: {width}px; box-sizing: border-box; }}
h1, h2 {{ color: {head}; border-bottom: 2px solid {brd}; padding-bottom: 8px; }}
a {{ color: {head}; }}
img {{ max-width: 100%; }}
pre {{ background: {code}; padding: 16px; border-radius: 6px; overflow-x: auto; border: 1px solid {brd}; }}
code {{ font-family: "SFMono-Regular", Consolas, monospace; }}
blockquote {{ margin: 16px 0; padding: 0 16px; border-left: 4px solid {brd}; }}
table {{ border-collapse: collapse; width: 100%; margin: 16px 0; border: 2px solid {brd}; }}
th, td {{ border: 1px solid {brd}; padding: 8px 12px; text-align: left; }}
th {{ background: {code}; font-weight: bold; }}
.footnote-definition {{ font-size: 0.9em; }}
.m-wrap {{ width: 100%; margin: 32px 0; background: {code}; border-radius: 8px; padding: 20px; border: 2px solid {brd}; box-sizing: border-box; }}
.mermaid svg {{ width: 100% !important; height: auto !important; }}
.mermaid .node rect, .mermaid .node circle, .mermaid .node polygon, .mermaid .node path, .mermaid .cluster rect {{ stroke: {line} !important; stroke-width: 2px !important; fill: {bg} !important; }}
.mermaid .edgePath path {{ stroke: {line} !important; stroke-width: 2px !important; }}
.mermaid .label {{ color: {primary} !important; }}
.mermaid .arrowheadPath {{ fill: {line} !important; }}
.mermaid-error {{ background: #fee2e2 !important; color: #991b1b !important; border: 2px solid #ef4444 !important; padding: 20px !important; margin: 20px 0 !important; font-family: monospace !important; border-radius: 8px !important; white-space: pre-wrap !important; }}
"#,
        bg = t.background,
        txt = t.text,
        width = content_width_px,
        head = t.heading,
        brd = t.border,
        code = t.code_bg,
        line = t.accent_line,
        primary = t.primary,
    );

    let dark = t.is_dark();
    for kind in [
        AlertKind::Note,
        AlertKind::Tip,
        AlertKind::Important,
        AlertKind::Warning,
        AlertKind::Caution,
    ] {
        let class = format!("markdown-alert-{}", kind.label().to_ascii_lowercase());
        let color = kind.color(dark);
        let _ = writeln!(
            css,
            ".{class} {{ border-left: 5px solid {color}; background: {bg}; padding: 8px 16px; }}\n\
.{class}::before {{ content: \"{icon} {label}\"; display: block; font-weight: bold; color: {color}; margin-bottom: 4px; }}",
            bg = t.secondary,
            icon = kind.icon(),
            label = kind.label(),
        );
    }
    css
}

/// Initializes the diagram runtime with the theme palette and renders every
/// container in document order, recording the outcome on the element.
fn runner_script(t: &Theme) -> String {
    format!(
        r#"(function () {{
  if (typeof mermaid === "undefined") return;
  mermaid.initialize({{
    startOnLoad: false,
    theme: "base",
    themeVariables: {{
      primaryColor: "{bg}",
      primaryTextColor: "{primary}",
      primaryBorderColor: "{line}",
      lineColor: "{line}",
      secondaryColor: "{secondary}",
      tertiaryColor: "{bg}"
    }},
    maxTextSize: 10000000,
    maxNodes: 10000,
    flowchart: {{ useMaxWidth: false, htmlLabels: true, curve: "linear" }},
    securityLevel: "loose"
  }});
  const run = async function () {{
    const nodes = document.querySelectorAll(".{class}");
    for (let i = 0; i < nodes.length; i++) {{
      const el = nodes[i];
      const id = "mdpdfm-diagram-" + i;
      try {{
        const out = await mermaid.render(id, el.textContent);
        el.innerHTML = out.svg;
        if (out.bindFunctions) out.bindFunctions(el);
        el.dataset.state = "processed";
      }} catch (err) {{
        const message = String((err && err.message) || err);
        el.classList.add("mermaid-error");
        el.textContent = message;
        el.dataset.error = message;
        el.dataset.state = "error";
        const orphan = document.getElementById("d" + id);
        if (orphan) orphan.remove();
      }}
    }}
  }};
  if (document.readyState === "loading") {{
    document.addEventListener("DOMContentLoaded", run);
  }} else {{
    run();
  }}
}})();
"#,
        bg = t.background,
        primary = t.primary,
        line = t.accent_line,
        secondary = t.secondary,
        class = DIAGRAM_CLASS,
    )
}
