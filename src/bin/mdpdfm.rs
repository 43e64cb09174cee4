//! CLI binary for mdpdfm.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `RenderConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use mdpdfm::{
    default_output_path, EngineConfig, JobProgressCallback, JobReport, LayoutMode, OutputFormat,
    Pipeline, ProgressCallback, RenderConfig, RenderJob, SourceDocument, Stage, THEMES,
};
use mdpdfm::theme::DEFAULT_THEME;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per job, advanced by stage, with
/// warnings printed above it as they happen.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Rendering");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, source: &str, format: OutputFormat) {
        self.bar.reset();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{source} → {format}"))
        ));
    }

    fn on_stage(&self, stage: Stage, percent: u8) {
        self.bar.set_position(u64::from(percent.min(100)));
        self.bar.set_message(stage.label().to_string());
    }

    fn on_warning(&self, message: &str) {
        self.bar
            .println(format!("  {} {}", yellow("⚠"), yellow(message)));
    }

    fn on_job_complete(&self, output_path: &str, duration_ms: u64) {
        self.bar.set_position(100);
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            output_path,
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_job_failed(&self, error: &str) {
        self.bar.println(format!("  {} {}", red("✗"), red(error)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF beside the input (README.pdf)
  mdpdfm README.md

  # Format inferred from the output extension
  mdpdfm notes.md out/notes.docx

  # First diagram as PNG in a dark theme
  mdpdfm --format png --theme Dracula flow.md

  # One PNG per built-in theme
  mdpdfm --gallery gallery/ flow.md

  # Paginated A4 output, keep the assembled HTML for debugging
  mdpdfm --paged --save-html report.md

  # Machine-readable report
  mdpdfm --json report.md > report.json

EXTERNAL TOOLS:
  PDF and PNG output need Chrome or Chromium; it is located automatically
  unless --browser is given. DOCX output needs pandoc on PATH (or --converter).

ENVIRONMENT VARIABLES:
  MDPDFM_THEME            Default theme name
  MDPDFM_BROWSER          Chrome/Chromium executable
  MDPDFM_CONVERTER        Document converter executable (default: pandoc)
  MDPDFM_CACHE_DIR        Persistent directory for downloaded images
  RUST_LOG                Tracing filter, overrides -v/-q
"#;

/// Render Markdown to PDF, PNG or DOCX.
#[derive(Parser, Debug)]
#[command(
    name = "mdpdfm",
    version,
    about = "Render Markdown to PDF, PNG or DOCX",
    long_about = "Render Markdown documents, including Mermaid diagrams and GitHub-style \
alerts, to PDF or PNG through a headless browser, or to DOCX through pandoc.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown file to render.
    #[arg(required_unless_present = "list_themes")]
    input: Option<PathBuf>,

    /// Output file. Defaults to the input path with the format's extension.
    output: Option<PathBuf>,

    /// Output format. Inferred from OUTPUT's extension when omitted.
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// Colour theme (see --list-themes).
    #[arg(short, long, env = "MDPDFM_THEME", default_value = DEFAULT_THEME)]
    theme: String,

    /// Content width in pixels.
    #[arg(long, env = "MDPDFM_WIDTH", default_value_t = 800)]
    width: u32,

    /// Leave Mermaid blocks as code.
    #[arg(long)]
    no_diagrams: bool,

    /// Paginate onto A4 sheets instead of one continuous page.
    #[arg(long)]
    paged: bool,

    /// Use the wide (1200px) page width.
    #[arg(long)]
    wide: bool,

    /// Keep the assembled HTML beside the output (DOCX: also the converter's Markdown).
    #[arg(long)]
    save_html: bool,

    /// Keep rasterized diagram images beside the output (DOCX).
    #[arg(long)]
    save_diagrams: bool,

    /// Chrome/Chromium executable.
    #[arg(long, env = "MDPDFM_BROWSER")]
    browser: Option<PathBuf>,

    /// Disable the browser sandbox (needed in some containers).
    #[arg(long, env = "MDPDFM_NO_SANDBOX")]
    no_sandbox: bool,

    /// Document converter used for DOCX output.
    #[arg(long, env = "MDPDFM_CONVERTER", default_value = "pandoc")]
    converter: String,

    /// Persistent directory for downloaded images.
    #[arg(long, env = "MDPDFM_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Seconds to wait for diagrams to finish rendering.
    #[arg(long, env = "MDPDFM_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Render the first diagram once per theme into this directory.
    #[arg(long, value_name = "DIR")]
    gallery: Option<PathBuf>,

    /// Print the built-in themes and exit.
    #[arg(long)]
    list_themes: bool,

    /// Print the job report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MDPDFM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MDPDFM_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Pdf,
    Png,
    Docx,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Pdf => OutputFormat::Pdf,
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Docx => OutputFormat::Docx,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless -v is given.
    let show_progress = !cli.quiet && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.list_themes {
        print_themes();
        return Ok(());
    }
    let input = cli
        .input
        .clone()
        .context("An input file is required")?;

    let progress = show_progress.then(CliProgressCallback::new);
    let progress_cb = progress
        .clone()
        .map(|cb| cb as Arc<dyn JobProgressCallback>);
    let config = build_config(&cli, progress_cb)?;
    let pipeline = Pipeline::new(EngineConfig {
        browser_path: cli.browser.clone(),
        sandbox: !cli.no_sandbox,
        ..EngineConfig::default()
    });
    let source = SourceDocument::file(&input);

    // ── Gallery mode ─────────────────────────────────────────────────────
    if let Some(ref dir) = cli.gallery {
        let result = pipeline.run_gallery(&source, dir, &[], &config).await;
        if let Some(ref cb) = progress {
            cb.bar.finish_and_clear();
        }
        let reports = result.context("Gallery generation failed")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?
            );
        } else if !cli.quiet {
            eprintln!(
                "{} {} theme(s) rendered into {}",
                green("✔"),
                bold(&reports.len().to_string()),
                bold(&dir.display().to_string()),
            );
        }
        return Ok(());
    }

    // ── Single job ───────────────────────────────────────────────────────
    let job = build_job(&cli, input, source, config);
    let result = pipeline.run(&job).await;
    if let Some(ref cb) = progress {
        cb.bar.finish_and_clear();
    }
    let report = result.context("Rendering failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report);
    }
    Ok(())
}

/// Map CLI args to `RenderConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RenderConfig> {
    let mut builder = RenderConfig::builder()
        .theme(cli.theme.clone())
        .content_width_px(cli.width)
        .diagrams_enabled(!cli.no_diagrams)
        .layout(if cli.paged {
            LayoutMode::FixedPage
        } else {
            LayoutMode::Continuous
        })
        .fixed_page_width(!cli.wide)
        .save_intermediate_markup(cli.save_html)
        .save_diagram_images(cli.save_diagrams)
        .diagram_timeout_secs(cli.timeout)
        .converter_program(cli.converter.clone());

    if let Some(ref dir) = cli.cache_dir {
        builder = builder.resource_cache_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Pick format and output path: explicit flag first, then the output
/// extension, then PDF.
fn build_job(
    cli: &Cli,
    input: PathBuf,
    source: SourceDocument,
    config: RenderConfig,
) -> RenderJob {
    let format = cli
        .format
        .map(OutputFormat::from)
        .or_else(|| cli.output.as_deref().and_then(OutputFormat::from_path))
        .unwrap_or_default();
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&input, format));
    RenderJob::new(source, format, output, config)
}

fn print_themes() {
    println!("{}", bold("Available themes:"));
    for theme in THEMES.iter() {
        let tone = if theme.is_dark() { "dark" } else { "light" };
        println!(
            "  {:<18} {}  {}",
            theme.name,
            dim(tone),
            dim(&format!("slug: {}", theme.slug()))
        );
    }
    println!();
    println!("Unknown names fall back to {}.", bold(DEFAULT_THEME));
}

fn print_summary(report: &JobReport) {
    let mark = if report.is_clean() {
        green("✔")
    } else {
        yellow("⚠")
    };
    eprintln!(
        "{}  {}  {} diagram(s)  {}ms  →  {}",
        mark,
        report.format,
        report.diagrams,
        report.duration_ms,
        bold(&report.output_path.display().to_string()),
    );
    for reference in &report.unresolved_resources {
        eprintln!("   {} {}", yellow("unresolved:"), reference.original_token);
    }
    for path in &report.retained {
        eprintln!("   {} {}", dim("kept:"), path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_width_is_fixed_page() {
        let cli = Cli::parse_from(["mdpdfm", "x.md"]);
        let config = build_config(&cli, None).unwrap();
        assert!(config.fixed_page_width);
        assert_eq!(config.viewport_width(), 800);
    }

    #[test]
    fn wide_flag_selects_wide_viewport() {
        let cli = Cli::parse_from(["mdpdfm", "--wide", "x.md"]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.viewport_width(), 1200);
    }

    #[test]
    fn job_format_follows_output_extension() {
        let cli = Cli::parse_from(["mdpdfm", "x.md", "out/x.docx"]);
        let config = build_config(&cli, None).unwrap();
        let job = build_job(&cli, PathBuf::from("x.md"), SourceDocument::file("x.md"), config);
        assert_eq!(job.format, OutputFormat::Docx);
        assert_eq!(job.output_path, PathBuf::from("out/x.docx"));
    }
}
