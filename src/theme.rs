//! Named colour palettes.
//!
//! A [`Theme`] is static, read-only data: the document stylesheet, the
//! diagram runtime's `themeVariables`, and the alert callouts on the DOCX path
//! are all derived from one palette at render time.

use serde::Serialize;

/// A named colour palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Theme {
    pub name: &'static str,
    /// Page background.
    pub background: &'static str,
    /// Body text.
    pub text: &'static str,
    /// `h1`/`h2` colour.
    pub heading: &'static str,
    /// Code block and table header background.
    pub code_bg: &'static str,
    pub border: &'static str,
    /// Diagram label colour.
    pub primary: &'static str,
    /// Diagram secondary fill; also the alert callout background.
    pub secondary: &'static str,
    /// Diagram strokes and edges.
    pub accent_line: &'static str,
}

/// The palette used when no theme (or an unknown one) is requested.
pub const DEFAULT_THEME: &str = "GitHub Light";

/// Every built-in palette, in display order.
pub static THEMES: [Theme; 10] = [
    Theme {
        name: "GitHub Light",
        background: "#ffffff",
        text: "#1b1f23",
        heading: "#000000",
        code_bg: "#f6f8fa",
        border: "#d1d5da",
        primary: "#000000",
        secondary: "#f6f8fa",
        accent_line: "#333333",
    },
    Theme {
        name: "GitHub Dark",
        background: "#0d1117",
        text: "#c9d1d9",
        heading: "#58a6ff",
        code_bg: "#161b22",
        border: "#30363d",
        primary: "#c9d1d9",
        secondary: "#161b22",
        accent_line: "#8b949e",
    },
    Theme {
        name: "Solarized Light",
        background: "#fdf6e3",
        text: "#657b83",
        heading: "#b58900",
        code_bg: "#eee8d5",
        border: "#93a1a1",
        primary: "#657b83",
        secondary: "#eee8d5",
        accent_line: "#586e75",
    },
    Theme {
        name: "Solarized Dark",
        background: "#002b36",
        text: "#839496",
        heading: "#b58900",
        code_bg: "#073642",
        border: "#586e75",
        primary: "#93a1a1",
        secondary: "#073642",
        accent_line: "#839496",
    },
    Theme {
        name: "Dracula",
        background: "#282a36",
        text: "#f8f8f2",
        heading: "#bd93f9",
        code_bg: "#44475a",
        border: "#6272a4",
        primary: "#f8f8f2",
        secondary: "#282a36",
        accent_line: "#bd93f9",
    },
    Theme {
        name: "Monokai Pro",
        background: "#2d2a2e",
        text: "#fcfcfa",
        heading: "#ffd866",
        code_bg: "#19181a",
        border: "#5d5d5d",
        primary: "#fcfcfa",
        secondary: "#2d2a2e",
        accent_line: "#ffd866",
    },
    Theme {
        name: "Cyberpunk",
        background: "#05051e",
        text: "#00ff9f",
        heading: "#ff003c",
        code_bg: "#0d0221",
        border: "#00ff9f",
        primary: "#f5ed00",
        secondary: "#0d0221",
        accent_line: "#00ff9f",
    },
    Theme {
        name: "Nordic",
        background: "#2e3440",
        text: "#eceff4",
        heading: "#88c0d0",
        code_bg: "#3b4252",
        border: "#4c566a",
        primary: "#d8dee9",
        secondary: "#2e3440",
        accent_line: "#81a1c1",
    },
    Theme {
        name: "Forest",
        background: "#0b1a0b",
        text: "#d4e1d4",
        heading: "#78a75a",
        code_bg: "#1a2f1a",
        border: "#3d5a3d",
        primary: "#a3bfa3",
        secondary: "#0b1a0b",
        accent_line: "#78a75a",
    },
    Theme {
        name: "Obsidian",
        background: "#050000",
        text: "#e0e0e0",
        heading: "#ff4500",
        code_bg: "#1a0000",
        border: "#ff0000",
        primary: "#ff4500",
        secondary: "#050000",
        accent_line: "#ff0000",
    },
];

impl Theme {
    /// Look up a palette by name (case-insensitive) or by slug
    /// (`"github-dark"`, `"github_dark"`).
    pub fn named(name: &str) -> Option<&'static Theme> {
        let wanted = name.trim();
        THEMES.iter().find(|t| {
            t.name.eq_ignore_ascii_case(wanted)
                || t.slug() == wanted.to_ascii_lowercase().replace('_', "-")
        })
    }

    /// Look up a palette, falling back to [`DEFAULT_THEME`] for unknown names.
    ///
    /// Silent; unknown names are reported once, when the config is built.
    pub fn resolve(name: &str) -> &'static Theme {
        Self::named(name).unwrap_or(&THEMES[0])
    }

    /// Lower-case, dash-separated form of the name (`"Monokai Pro"` → `"monokai-pro"`).
    pub fn slug(&self) -> String {
        self.name.to_ascii_lowercase().replace(' ', "-")
    }

    /// Whether the background is dark enough that light-mode accent colours
    /// lose contrast.
    ///
    /// Uses relative luminance of the background rather than the palette name,
    /// so every dark palette (including Nordic and Forest) qualifies.
    pub fn is_dark(&self) -> bool {
        relative_luminance(self.background).is_some_and(|l| l < 0.4)
    }
}

/// sRGB relative luminance of a `#rrggbb` colour, in `0.0..=1.0`.
fn relative_luminance(hex: &str) -> Option<f64> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| -> Option<f64> {
        let v = u8::from_str_radix(&hex[range], 16).ok()? as f64 / 255.0;
        Some(if v <= 0.03928 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        })
    };
    let (r, g, b) = (channel(0..2)?, channel(2..4)?, channel(4..6)?);
    Some(0.2126 * r + 0.7152 * g + 0.0722 * b)
}
