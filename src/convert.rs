//! Job orchestration and the public conversion entry points.
//!
//! A [`Pipeline`] owns the long-lived collaborators: the rendering engine
//! (launched on first use and then shared by every job it runs), and one
//! memoized [`ExternalConverter`] per converter program. Jobs themselves are
//! strictly sequential inside; the only fan-out is image resolution.
//!
//! Every job gets its own [`JobWorkspace`], so intermediate files disappear on
//! every exit path. Errors are logged and reported to the job's progress
//! callback here, at the orchestration boundary, and nowhere below it.

use crate::config::{EngineConfig, OutputFormat, RenderConfig};
use crate::error::PipelineError;
use crate::output::JobReport;
use crate::pipeline::alerts::transform_alerts;
use crate::pipeline::capture::{DiagramSelection, Readiness, RenderEngineAdapter};
use crate::pipeline::converter::ExternalConverter;
use crate::pipeline::diagrams;
use crate::pipeline::document::{DocumentOptions, DocumentRenderer};
use crate::pipeline::engine::{ChromeEngine, RenderEngine};
use crate::pipeline::input::{load_source, SourceDocument};
use crate::pipeline::resources::{
    ResolutionContext, ResourceFetcher, ResourceReference, ResourceResolver,
};
use crate::pipeline::workspace::{self, JobWorkspace};
use crate::progress::{JobProgressCallback, NoopProgressCallback, Stage};
use crate::theme::Theme;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// One conversion request.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub source: SourceDocument,
    pub format: OutputFormat,
    pub output_path: PathBuf,
    pub config: RenderConfig,
}

impl RenderJob {
    pub fn new(
        source: SourceDocument,
        format: OutputFormat,
        output_path: impl Into<PathBuf>,
        config: RenderConfig,
    ) -> Self {
        Self {
            source,
            format,
            output_path: output_path.into(),
            config,
        }
    }

    /// Job whose format is inferred from the output path's extension.
    pub fn infer(
        source: SourceDocument,
        output_path: impl Into<PathBuf>,
        config: RenderConfig,
    ) -> Result<Self, PipelineError> {
        let output_path = output_path.into();
        let format = OutputFormat::from_path(&output_path).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "Cannot infer the output format from '{}'; use a .pdf, .png or .docx extension",
                output_path.display()
            ))
        })?;
        Ok(Self::new(source, format, output_path, config))
    }
}

/// The input path with the format's extension.
pub fn default_output_path(input: &Path, format: OutputFormat) -> PathBuf {
    input.with_extension(format.extension())
}

/// Long-lived service that runs rendering jobs.
pub struct Pipeline {
    engine_config: EngineConfig,
    engine: OnceCell<Arc<dyn RenderEngine>>,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    converters: Mutex<HashMap<(String, u64), Arc<ExternalConverter>>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Pipeline {
    /// Pipeline that launches headless Chrome on first use.
    pub fn new(engine_config: EngineConfig) -> Self {
        Self {
            engine_config,
            engine: OnceCell::new(),
            fetcher: None,
            converters: Mutex::new(HashMap::new()),
        }
    }

    /// Pipeline using an already-constructed engine.
    pub fn with_engine(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine: OnceCell::new_with(Some(engine)),
            ..Self::default()
        }
    }

    /// Replace the HTTP fetcher used for remote images.
    pub fn fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Run one job to completion.
    pub async fn run(&self, job: &RenderJob) -> Result<JobReport, PipelineError> {
        let started = Instant::now();
        let noop: Arc<dyn JobProgressCallback> = Arc::new(NoopProgressCallback);
        let callback = job.config.progress_callback.clone().unwrap_or(noop);
        let source = job.source.display_name();

        info!(
            "Starting {} job: {} -> {}",
            job.format,
            source,
            job.output_path.display()
        );
        callback.on_job_start(&source, job.format);

        let mut ctx = JobContext {
            callback: callback.as_ref(),
            warnings: Vec::new(),
            unresolved: Vec::new(),
            retained: Vec::new(),
            diagrams: 0,
        };
        match self.execute(job, &mut ctx).await {
            Ok(()) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    "Created {} in {}ms",
                    job.output_path.display(),
                    duration_ms
                );
                callback.on_job_complete(&job.output_path.to_string_lossy(), duration_ms);
                Ok(JobReport {
                    source,
                    format: job.format,
                    output_path: job.output_path.clone(),
                    theme: job.config.theme().name.to_string(),
                    diagrams: ctx.diagrams,
                    unresolved_resources: ctx.unresolved,
                    warnings: ctx.warnings,
                    retained: ctx.retained,
                    duration_ms,
                })
            }
            Err(e) => {
                error!("Job failed: {}", e);
                callback.on_job_failed(&e.to_string());
                Err(e)
            }
        }
    }

    /// Render the first diagram of `source` once per theme into
    /// `{output_dir}/{stem}_{theme_slug}.png`, reusing one engine.
    ///
    /// An empty `themes` slice means every built-in theme. Stops at the first
    /// failing theme.
    pub async fn run_gallery(
        &self,
        source: &SourceDocument,
        output_dir: &Path,
        themes: &[&'static Theme],
        config: &RenderConfig,
    ) -> Result<Vec<JobReport>, PipelineError> {
        let themes: Vec<&'static Theme> = if themes.is_empty() {
            crate::theme::THEMES.iter().collect()
        } else {
            themes.to_vec()
        };
        let stem = source.stem().unwrap_or("diagram").to_string();
        info!("Generating gallery of {} theme(s) for {}", themes.len(), stem);

        let mut reports = Vec::with_capacity(themes.len());
        for theme in themes {
            let mut theme_config = config.clone();
            theme_config.theme = theme.name.to_string();
            let output = output_dir.join(format!("{stem}_{}.png", theme.slug()));
            let job = RenderJob::new(source.clone(), OutputFormat::Png, output, theme_config);
            reports.push(self.run(&job).await?);
        }
        Ok(reports)
    }

    async fn engine(&self) -> Result<Arc<dyn RenderEngine>, PipelineError> {
        let config = self.engine_config.clone();
        self.engine
            .get_or_try_init(|| async move {
                let engine = tokio::task::spawn_blocking(move || ChromeEngine::launch(&config))
                    .await
                    .map_err(|e| PipelineError::Internal(format!("Engine launch panicked: {e}")))??;
                Ok::<Arc<dyn RenderEngine>, PipelineError>(Arc::new(engine))
            })
            .await
            .map(Arc::clone)
    }

    fn converter(&self, config: &RenderConfig) -> Arc<ExternalConverter> {
        let key = (config.converter_program.clone(), config.converter_timeout_secs);
        let mut cache = self
            .converters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(cache.entry(key).or_insert_with(|| {
            Arc::new(ExternalConverter::new(
                config.converter_program.clone(),
                config.converter_timeout_secs,
            ))
        }))
    }

    fn resolver(&self, config: &RenderConfig) -> Result<ResourceResolver, PipelineError> {
        match &self.fetcher {
            Some(f) => Ok(ResourceResolver::new(Arc::clone(f), config.fetch_concurrency)),
            None => ResourceResolver::http(config.fetch_timeout_secs, config.fetch_concurrency),
        }
    }

    async fn execute(&self, job: &RenderJob, ctx: &mut JobContext<'_>) -> Result<(), PipelineError> {
        let config = &job.config;

        ctx.stage(Stage::Loading, 5);
        let loaded = load_source(&job.source).await?;
        let workspace = JobWorkspace::create()?;

        ctx.stage(Stage::ResolvingResources, 15);
        let resolver = self.resolver(config)?;
        let resolution_ctx = ResolutionContext {
            base_dir: loaded.base_dir.clone(),
            dest_dir: config
                .resource_cache_dir
                .clone()
                .unwrap_or_else(|| workspace.file("resources")),
        };
        let resolution = resolver.resolve(&loaded.text, &resolution_ctx).await;
        for reference in resolution.unresolved() {
            let reason = reference
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unresolved".into());
            ctx.warn(format!("Image left as written: {reason}"));
            ctx.unresolved.push(reference.clone());
        }

        match job.format {
            OutputFormat::Pdf | OutputFormat::Png => {
                self.render_html_job(job, &resolution.text, &workspace, ctx)
                    .await
            }
            OutputFormat::Docx => {
                self.render_docx_job(job, &resolution.text, &workspace, ctx)
                    .await
            }
        }
    }

    async fn render_html_job(
        &self,
        job: &RenderJob,
        markdown: &str,
        workspace: &JobWorkspace,
        ctx: &mut JobContext<'_>,
    ) -> Result<(), PipelineError> {
        let config = &job.config;

        ctx.stage(Stage::BuildingDocument, 30);
        let options = DocumentOptions::from_config(config);
        let document = DocumentRenderer::shared().render(markdown, &options);
        ctx.diagrams = document.diagram_count;
        let html_path = workspace.write("document.html", &document.html).await?;
        debug!("Assembled document with {} diagram(s)", document.diagram_count);
        if config.save_intermediate_markup {
            let dest = workspace::retained_markup_path(&job.output_path);
            ctx.retained.push(workspace::retain(&html_path, &dest).await?);
        }

        ctx.stage(Stage::Rendering, 45);
        let adapter = RenderEngineAdapter::new(self.engine().await?);
        let readiness = readiness(config);
        let bytes = match job.format {
            OutputFormat::Png => {
                let captured = adapter
                    .capture_diagrams(&html_path, DiagramSelection::First, readiness)
                    .await?;
                ctx.warn_all(captured.warnings);
                captured
                    .artifact
                    .into_iter()
                    .next()
                    .map(|c| c.png)
                    .ok_or(PipelineError::NoDiagrams)?
            }
            _ => {
                let captured = adapter
                    .capture_page(
                        &html_path,
                        config.layout,
                        config.viewport_width(),
                        readiness,
                    )
                    .await?;
                ctx.warn_all(captured.warnings);
                captured.artifact
            }
        };

        ctx.stage(Stage::Writing, 90);
        workspace::write_atomic(&job.output_path, &bytes).await
    }

    async fn render_docx_job(
        &self,
        job: &RenderJob,
        markdown: &str,
        workspace: &JobWorkspace,
        ctx: &mut JobContext<'_>,
    ) -> Result<(), PipelineError> {
        let config = &job.config;
        let converter = self.converter(config);
        if !converter.is_available().await {
            return Err(PipelineError::MissingExternalTool {
                program: converter.program().to_string(),
            });
        }

        ctx.stage(Stage::TransformingAlerts, 20);
        let text = transform_alerts(markdown, config.theme());

        let blocks = if config.diagrams_enabled {
            diagrams::find_blocks(&text)
        } else {
            Vec::new()
        };
        ctx.diagrams = blocks.len();
        let text = if blocks.is_empty() {
            text
        } else {
            ctx.stage(Stage::SubstitutingDiagrams, 35);
            let adapter = RenderEngineAdapter::new(self.engine().await?);
            let keep_markup = config
                .save_intermediate_markup
                .then(|| workspace::retained_markup_path(&job.output_path));
            let rasterized = diagrams::rasterize(
                &text,
                &blocks,
                &adapter,
                workspace,
                &DocumentOptions::from_config(config),
                readiness(config),
                keep_markup.as_deref(),
            )
            .await?;
            ctx.warn_all(rasterized.warnings);
            ctx.retained.extend(rasterized.markup);
            if config.save_diagram_images {
                for (i, image) in rasterized.images.iter().enumerate() {
                    let dest = workspace::retained_diagram_path(&job.output_path, i + 1);
                    ctx.retained.push(workspace::retain(image, &dest).await?);
                }
            }
            rasterized.text
        };

        ctx.stage(Stage::Converting, 70);
        let md_path = workspace.write("document.md", &text).await?;
        if config.save_intermediate_markup {
            let dest = workspace::retained_source_path(&job.output_path);
            if is_input_file(&job.source, &dest).await {
                ctx.warn(format!(
                    "Converter input not kept: {} is the source document",
                    dest.display()
                ));
            } else {
                ctx.retained.push(workspace::retain(&md_path, &dest).await?);
            }
        }
        let converted = workspace.file(&format!("converted.{}", OutputFormat::Docx.extension()));
        converter.convert(&md_path, &converted).await?;

        ctx.stage(Stage::Writing, 90);
        let bytes = tokio::fs::read(&converted)
            .await
            .map_err(|e| PipelineError::OutputWriteFailed {
                path: job.output_path.clone(),
                source: e,
            })?;
        workspace::write_atomic(&job.output_path, &bytes).await
    }
}

/// Per-job accumulator for soft failures and progress events.
struct JobContext<'a> {
    callback: &'a dyn JobProgressCallback,
    warnings: Vec<String>,
    unresolved: Vec<ResourceReference>,
    retained: Vec<PathBuf>,
    diagrams: usize,
}

impl JobContext<'_> {
    fn stage(&self, stage: Stage, percent: u8) {
        debug!("Stage: {}", stage);
        self.callback.on_stage(stage, percent);
        self.callback.on_message(stage.label());
    }

    fn warn(&mut self, message: String) {
        self.callback.on_warning(&message);
        self.warnings.push(message);
    }

    fn warn_all(&mut self, messages: Vec<String>) {
        for message in messages {
            self.warn(message);
        }
    }
}

/// True when `dest` names the markdown file the job reads.
async fn is_input_file(source: &SourceDocument, dest: &Path) -> bool {
    let SourceDocument::File(path) = source else {
        return false;
    };
    match (
        tokio::fs::canonicalize(path).await,
        tokio::fs::canonicalize(dest).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn readiness(config: &RenderConfig) -> Readiness {
    Readiness {
        timeout: config.diagram_timeout(),
        poll: config.poll_interval(),
        settle: config.settle_delay(),
    }
}

/// Run one job on a fresh [`Pipeline`] with default engine settings.
///
/// Use a shared [`Pipeline`] instead when running several jobs, so the
/// browser is launched only once.
pub async fn convert(job: &RenderJob) -> Result<JobReport, PipelineError> {
    Pipeline::default().run(job).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(job: &RenderJob) -> Result<JobReport, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_format_from_extension() {
        let job = RenderJob::infer(
            SourceDocument::text("# x"),
            "out/report.DOCX",
            RenderConfig::default(),
        )
        .unwrap();
        assert_eq!(job.format, OutputFormat::Docx);

        let err = RenderJob::infer(SourceDocument::text("# x"), "out.txt", RenderConfig::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn default_output_paths() {
        assert_eq!(
            default_output_path(Path::new("docs/guide.md"), OutputFormat::Pdf),
            Path::new("docs/guide.pdf")
        );
        assert_eq!(
            default_output_path(Path::new("notes"), OutputFormat::Png),
            Path::new("notes.png")
        );
    }

    #[test]
    fn converters_are_memoized_per_program() {
        let pipeline = Pipeline::default();
        let a = pipeline.converter(&RenderConfig::default());
        let b = pipeline.converter(&RenderConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        let other = RenderConfig::builder()
            .converter_program("other")
            .build()
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &pipeline.converter(&other)));
    }
}
