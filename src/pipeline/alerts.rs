//! `> [!KIND]` admonitions rewritten as styled tables for the DOCX path.
//!
//! The document converter has no notion of GitHub-style alerts, so each alert
//! is flushed as a single-cell HTML table with a coloured left border, which
//! survives conversion. HTML output paths do not use this module; they let the
//! markdown parser render alerts natively.
//!
//! The transform is an explicit two-state machine ([`AlertState`]). Every
//! transition is a method on [`AlertTransformer`], so the flush rules (on a
//! new header, on a non-quote line, at end of input) can be driven and checked
//! one line at a time.

use crate::theme::Theme;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// `> [!NOTE]` with flexible whitespace, any case.
static RE_ALERT_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*>\s*\[!(NOTE|TIP|IMPORTANT|WARNING|CAUTION)\]").unwrap()
});

/// The five recognised admonition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    Note,
    Tip,
    Important,
    Warning,
    Caution,
}

impl AlertKind {
    pub fn label(self) -> &'static str {
        match self {
            AlertKind::Note => "NOTE",
            AlertKind::Tip => "TIP",
            AlertKind::Important => "IMPORTANT",
            AlertKind::Warning => "WARNING",
            AlertKind::Caution => "CAUTION",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            AlertKind::Note => "ℹ️",
            AlertKind::Tip => "💡",
            AlertKind::Important => "📢",
            AlertKind::Warning => "⚠️",
            AlertKind::Caution => "🛑",
        }
    }

    /// Border colour: GitHub's light palette, or its dark counterpart when the
    /// theme background is dark.
    pub fn color(self, dark: bool) -> &'static str {
        match (self, dark) {
            (AlertKind::Note, false) => "#0969da",
            (AlertKind::Tip, false) => "#1f883d",
            (AlertKind::Important, false) => "#8250df",
            (AlertKind::Warning, false) => "#bf8700",
            (AlertKind::Caution, false) => "#cf222e",
            (AlertKind::Note, true) => "#58a6ff",
            (AlertKind::Tip, true) => "#3fb950",
            (AlertKind::Important, true) => "#a371f7",
            (AlertKind::Warning, true) => "#d29922",
            (AlertKind::Caution, true) => "#f85149",
        }
    }
}

impl FromStr for AlertKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NOTE" => Ok(AlertKind::Note),
            "TIP" => Ok(AlertKind::Tip),
            "IMPORTANT" => Ok(AlertKind::Important),
            "WARNING" => Ok(AlertKind::Warning),
            "CAUTION" => Ok(AlertKind::Caution),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An alert being accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertBlock {
    pub kind: AlertKind,
    pub content_lines: Vec<String>,
}

impl AlertBlock {
    fn new(kind: AlertKind) -> Self {
        Self {
            kind,
            content_lines: Vec::new(),
        }
    }

    /// Styled single-cell table for this alert.
    pub fn render(&self, theme: &Theme) -> String {
        let color = self.kind.color(theme.is_dark());
        format!(
            "<table style=\"width:100%; border-left: 5px solid {color}; background-color: {bg}; margin-bottom: 10px;\">\
<tr><td style=\"padding: 10px; color: {txt};\"><strong>{icon} {label} - </strong><br/>{content}</td></tr></table>",
            bg = theme.secondary,
            txt = theme.text,
            icon = self.kind.icon(),
            label = self.kind.label(),
            content = self.content_lines.join("<br/>"),
        )
    }
}

/// States of the transformer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Normal,
    InAlert(AlertBlock),
}

/// Line-at-a-time alert rewriter.
#[derive(Debug)]
pub struct AlertTransformer<'t> {
    theme: &'t Theme,
    state: AlertState,
    out: Vec<String>,
}

impl<'t> AlertTransformer<'t> {
    pub fn new(theme: &'t Theme) -> Self {
        Self {
            theme,
            state: AlertState::Normal,
            out: Vec::new(),
        }
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Feed one input line (without its newline).
    pub fn push_line(&mut self, line: &str) {
        if let Some(kind) = header_kind(line) {
            self.flush();
            self.state = AlertState::InAlert(AlertBlock::new(kind));
            return;
        }
        if let AlertState::InAlert(block) = &mut self.state {
            if let Some(content) = continuation(line) {
                block.content_lines.push(content.to_string());
                return;
            }
            self.flush();
        }
        self.out.push(line.to_string());
    }

    /// Emit the pending alert (if any) followed by a blank separator line and
    /// return to `Normal`.
    pub fn flush(&mut self) {
        if let AlertState::InAlert(block) = std::mem::take(&mut self.state) {
            self.out.push(block.render(self.theme));
            self.out.push(String::new());
        }
    }

    /// Flush any alert still open at end of input and return the output lines.
    pub fn finish(mut self) -> Vec<String> {
        self.flush();
        self.out
    }
}

fn header_kind(line: &str) -> Option<AlertKind> {
    RE_ALERT_HEADER
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Content of a blockquote continuation line: one `>` and at most one
/// following space removed.
fn continuation(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix('>')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Rewrite every alert in `markdown` as a styled table.
pub fn transform_alerts(markdown: &str, theme: &Theme) -> String {
    let mut fsm = AlertTransformer::new(theme);
    for line in markdown.split('\n') {
        fsm.push_line(line);
    }
    fsm.finish().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::Theme;
    use pretty_assertions::assert_eq;

    fn light() -> &'static Theme {
        Theme::resolve("GitHub Light")
    }

    fn cell_contents(out: &str) -> Vec<String> {
        out.split("<table")
            .skip(1)
            .map(|t| {
                let after = t.split(" - </strong><br/>").nth(1).unwrap_or_default();
                after.split("</td>").next().unwrap_or_default().to_string()
            })
            .collect()
    }

    #[test]
    fn single_line_note() {
        let out = transform_alerts("> [!NOTE]\n> hello", light());
        assert_eq!(cell_contents(&out), vec!["hello"]);
        assert!(out.contains("NOTE - "));
        assert!(out.contains("#0969da"));
        assert!(out.ends_with("</table>\n"));
    }

    #[test]
    fn multi_line_tip() {
        let out = transform_alerts("> [!TIP]\n> a\n> b", light());
        assert_eq!(cell_contents(&out), vec!["a<br/>b"]);
    }

    #[test]
    fn plain_line_closes_and_is_kept() {
        let out = transform_alerts("> [!NOTE]\n> a\nafter", light());
        assert_eq!(cell_contents(&out), vec!["a"]);
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "after");
    }

    #[test]
    fn new_header_flushes_previous() {
        let out = transform_alerts(">[!warning]\n> one\n  >   [!Caution]\n> two", light());
        assert_eq!(cell_contents(&out), vec!["one", "two"]);
        assert!(out.contains("WARNING - "));
        assert!(out.contains("CAUTION - "));
    }

    #[test]
    fn end_of_input_flushes_once() {
        let out = transform_alerts("> [!IMPORTANT]\n> x", light());
        assert_eq!(out.matches("<table").count(), 1);
    }

    #[test]
    fn arrows_are_not_headers() {
        let text = "A -> B\nx ->[!NOTE] y";
        assert_eq!(transform_alerts(text, light()), text);
    }

    #[test]
    fn continuation_strips_one_marker_and_one_space() {
        let out = transform_alerts("> [!NOTE]\n>  indented\n>> nested", light());
        assert_eq!(cell_contents(&out), vec![" indented<br/>> nested"]);
    }

    #[test]
    fn dark_theme_uses_bright_colours() {
        let out = transform_alerts("> [!NOTE]\n> x", Theme::resolve("Dracula"));
        assert!(out.contains("#58a6ff"));
        assert!(out.contains("background-color: #282a36"));
    }

    #[test]
    fn state_machine_transitions() {
        let theme = light();
        let mut fsm = AlertTransformer::new(theme);
        assert_eq!(fsm.state(), &AlertState::Normal);
        fsm.push_line("> [!TIP]");
        assert!(matches!(fsm.state(), AlertState::InAlert(b) if b.kind == AlertKind::Tip));
        fsm.push_line("> body");
        fsm.push_line("text");
        assert_eq!(fsm.state(), &AlertState::Normal);
        assert_eq!(fsm.finish().len(), 3);
    }
}
