//! Image reference discovery and resolution.
//!
//! Every `![alt](url "title")` and `<img src="url">` in the document is
//! rewritten to a path the rendering engine and the document converter can
//! open directly:
//!
//! * remote (`http`/`https`) references are downloaded into a destination
//!   directory under a name derived from a SHA-256 of the URL, so the same URL
//!   always lands on the same file;
//! * local references are resolved to an absolute path and used in place.
//!
//! Resolution runs once per *unique* token over a bounded worker pool; the
//! results are gathered into a map owned by the caller of the pool and applied
//! in a single rewrite pass. References that cannot be resolved stay exactly
//! as written.

use crate::error::{PipelineError, ResourceError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// `![alt](token)` or `![alt](token "title")` / `'title'`.
static RE_MD_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+(?:"[^"]*"|'[^']*'))?\s*\)"#).unwrap()
});

/// `<img ... src="token" ...>`, either quote style.
static RE_HTML_IMG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["'][^>]*>"#).unwrap());

/// Local or remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ReferenceKind {
    Local,
    Remote,
}

impl ReferenceKind {
    pub fn of(token: &str) -> Self {
        let lower = token.trim_start().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ReferenceKind::Remote
        } else {
            ReferenceKind::Local
        }
    }
}

/// Outcome of resolving one unique token.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceReference {
    pub original_token: String,
    pub kind: ReferenceKind,
    pub resolved_path: Option<PathBuf>,
    pub error: Option<ResourceError>,
}

impl ResourceReference {
    pub fn is_resolved(&self) -> bool {
        self.resolved_path.is_some()
    }
}

/// Directories a resolution pass works against.
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    /// Relative local references resolve against this directory.
    pub base_dir: PathBuf,
    /// Downloaded remote resources are written here.
    pub dest_dir: PathBuf,
}

/// Rewritten text plus one entry per unique token, in first-occurrence order.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub text: String,
    pub references: Vec<ResourceReference>,
}

impl Resolution {
    pub fn unresolved(&self) -> impl Iterator<Item = &ResourceReference> {
        self.references.iter().filter(|r| !r.is_resolved())
    }
}

/// Downloads one remote resource to a destination path.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), ResourceError>;
}

/// [`ResourceFetcher`] over HTTP(S) with a per-request timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("mdpdfm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> ResourceError {
        if e.is_timeout() {
            ResourceError::FetchTimeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            ResourceError::FetchFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), ResourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        if !response.status().is_success() {
            return Err(ResourceError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Stream to a sibling temp file, then rename, so a half-written
        // download is never picked up as a cache hit.
        let io_err = |e: std::io::Error| ResourceError::Io {
            token: url.to_string(),
            detail: e.to_string(),
        };
        let tmp_path = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(io_err)?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    return Err(self.classify(url, e));
                }
            };
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&tmp_path, dest).await.map_err(io_err)?;
        Ok(())
    }
}

/// Discovers, resolves and rewrites image references.
pub struct ResourceResolver {
    fetcher: Arc<dyn ResourceFetcher>,
    max_concurrency: usize,
}

impl ResourceResolver {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, max_concurrency: usize) -> Self {
        Self {
            fetcher,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Resolver backed by [`HttpFetcher`].
    pub fn http(timeout_secs: u64, max_concurrency: usize) -> Result<Self, PipelineError> {
        Ok(Self::new(
            Arc::new(HttpFetcher::new(timeout_secs)?),
            max_concurrency,
        ))
    }

    /// Rewrite every resolvable image reference in `text`.
    ///
    /// Never fails: per-token failures are recorded in the returned
    /// references and the token is left untouched.
    pub async fn resolve(&self, text: &str, ctx: &ResolutionContext) -> Resolution {
        let tokens = discover_tokens(text);
        if tokens.is_empty() {
            return Resolution {
                text: text.to_string(),
                references: Vec::new(),
            };
        }

        let dest_dir = std::path::absolute(&ctx.dest_dir).unwrap_or_else(|_| ctx.dest_dir.clone());
        let workers = tokens.len().clamp(1, self.max_concurrency);
        debug!(
            "Resolving {} unique image reference(s) with {} worker(s)",
            tokens.len(),
            workers
        );

        let resolved: HashMap<String, ResourceReference> = stream::iter(tokens.iter().cloned())
            .map(|token| {
                let dest_dir = dest_dir.clone();
                async move {
                    let reference = self.resolve_one(&token, &ctx.base_dir, &dest_dir).await;
                    (token, reference)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let replacements: HashMap<&str, String> = resolved
            .iter()
            .filter_map(|(token, r)| {
                r.resolved_path
                    .as_ref()
                    .map(|p| (token.as_str(), path_to_reference(p)))
            })
            .collect();

        let references: Vec<ResourceReference> = tokens
            .iter()
            .filter_map(|t| resolved.get(t).cloned())
            .collect();
        let failed = references.iter().filter(|r| !r.is_resolved()).count();
        info!(
            "Resolved {}/{} image reference(s)",
            references.len() - failed,
            references.len()
        );

        Resolution {
            text: rewrite(text, &replacements),
            references,
        }
    }

    async fn resolve_one(&self, token: &str, base_dir: &Path, dest_dir: &Path) -> ResourceReference {
        let kind = ReferenceKind::of(token);
        let result = match kind {
            ReferenceKind::Remote => self.resolve_remote(token, dest_dir).await,
            ReferenceKind::Local => resolve_local(token, base_dir).await,
        };
        match result {
            Ok(path) => ResourceReference {
                original_token: token.to_string(),
                kind,
                resolved_path: Some(path),
                error: None,
            },
            Err(e) => {
                warn!("Image reference left unresolved: {}", e);
                ResourceReference {
                    original_token: token.to_string(),
                    kind,
                    resolved_path: None,
                    error: Some(e),
                }
            }
        }
    }

    async fn resolve_remote(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, ResourceError> {
        let dest = dest_dir.join(remote_file_name(url));
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!("Reusing {} for {}", dest.display(), url);
            return Ok(dest);
        }
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| ResourceError::Io {
                token: url.to_string(),
                detail: e.to_string(),
            })?;
        self.fetcher.fetch(url, &dest).await?;
        debug!("Downloaded {} -> {}", url, dest.display());
        Ok(dest)
    }
}

async fn resolve_local(token: &str, base_dir: &Path) -> Result<PathBuf, ResourceError> {
    let candidate = local_candidate(token, base_dir);
    tokio::fs::canonicalize(&candidate)
        .await
        .map(without_verbatim)
        .map_err(|_| ResourceError::NotFound {
            path: token.to_string(),
        })
}

fn without_verbatim(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) if s.starts_with(r"\\?\") => PathBuf::from(strip_verbatim(s).into_owned()),
        _ => path,
    }
}

/// Drop the Windows verbatim prefix `canonicalize` adds (`\\?\C:\...`,
/// `\\?\UNC\host\share`); neither the browser nor the converter opens it.
fn strip_verbatim(path: &str) -> Cow<'_, str> {
    if let Some(rest) = path.strip_prefix(r"\\?\UNC\") {
        Cow::Owned(format!(r"\\{rest}"))
    } else if let Some(rest) = path.strip_prefix(r"\\?\") {
        Cow::Borrowed(rest)
    } else {
        Cow::Borrowed(path)
    }
}

fn local_candidate(token: &str, base_dir: &Path) -> PathBuf {
    if has_prefix_ignore_case(token, "file://") {
        if let Some(path) = reqwest::Url::parse(token)
            .ok()
            .and_then(|u| u.to_file_path().ok())
        {
            return path;
        }
    }
    let path = Path::new(token);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Content-derived, stable filename for a remote URL.
///
/// The extension comes from the URL path (query discarded) and defaults to
/// `png` when absent or implausible.
pub fn remote_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let ext = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        })
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "png".to_string());
    format!("{}.{}", hex::encode(digest), ext)
}

/// Unique reference tokens in first-occurrence order.
///
/// Inline `data:` URIs are already usable and are skipped.
pub fn discover_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for re in [&*RE_MD_IMAGE, &*RE_HTML_IMG] {
        for caps in re.captures_iter(text) {
            let Some(token) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            if has_prefix_ignore_case(token, "data:") {
                continue;
            }
            if seen.insert(token) {
                tokens.push(token.to_string());
            }
        }
    }
    tokens
}

fn has_prefix_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn path_to_reference(path: &Path) -> String {
    strip_verbatim(&path.to_string_lossy()).replace('\\', "/")
}

/// A path as a markdown link destination: forward slashes, angle-bracketed
/// when it contains whitespace.
pub(crate) fn markdown_destination(path: &Path) -> String {
    angle_wrap(&path_to_reference(path))
}

fn angle_wrap(destination: &str) -> String {
    if destination.contains(char::is_whitespace) {
        format!("<{destination}>")
    } else {
        destination.to_string()
    }
}

/// Substitute resolved tokens in both syntaxes, leaving everything else intact.
fn rewrite(text: &str, replacements: &HashMap<&str, String>) -> String {
    if replacements.is_empty() {
        return text.to_string();
    }
    let markdown_pass = splice_all(&RE_MD_IMAGE, text, angle_wrap, replacements);
    splice_all(&RE_HTML_IMG, &markdown_pass, str::to_string, replacements)
}

fn splice_all(
    re: &Regex,
    text: &str,
    render: impl Fn(&str) -> String,
    replacements: &HashMap<&str, String>,
) -> String {
    re.replace_all(text, |caps: &Captures| {
        let whole = &caps[0];
        let (Some(outer), Some(token)) = (caps.get(0), caps.get(1)) else {
            return whole.to_string();
        };
        let Some(new) = replacements.get(token.as_str()) else {
            return whole.to_string();
        };
        let (start, end) = (token.start() - outer.start(), token.end() - outer.start());
        let mut prefix = &whole[..start];
        let mut suffix = &whole[end..];
        // Drop an existing `<...>` wrapper; `render` decides whether one is needed.
        if prefix.ends_with('<') && suffix.starts_with('>') {
            prefix = &prefix[..prefix.len() - 1];
            suffix = &suffix[1..];
        }
        format!("{prefix}{}{suffix}", render(new))
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResourceFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), ResourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"\x89PNG").await.map_err(|e| ResourceError::Io {
                token: "test".into(),
                detail: e.to_string(),
            })
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl ResourceFetcher for FailingFetcher {
        async fn fetch(&self, url: &str, _dest: &Path) -> Result<(), ResourceError> {
            Err(ResourceError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    /// Holds each fetch open briefly and records the most concurrent calls seen.
    #[derive(Default)]
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ResourceFetcher for SlowFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), ResourceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"\x89PNG").await.map_err(|e| ResourceError::Io {
                token: "test".into(),
                detail: e.to_string(),
            })
        }
    }

    fn counting() -> (Arc<CountingFetcher>, ResourceResolver) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
        });
        let resolver = ResourceResolver::new(fetcher.clone(), 8);
        (fetcher, resolver)
    }

    fn ctx(dir: &Path) -> ResolutionContext {
        ResolutionContext {
            base_dir: dir.to_path_buf(),
            dest_dir: dir.join("remote"),
        }
    }

    #[tokio::test]
    async fn no_references_is_identity() {
        let (fetcher, resolver) = counting();
        let dir = tempfile::tempdir().unwrap();
        let text = "# Title\n\nJust [a link](https://example.org) and <b>bold</b>.";
        let out = resolver.resolve(text, &ctx(dir.path())).await;
        assert_eq!(out.text, text);
        assert!(out.references.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_remote_fetched_once() {
        let (fetcher, resolver) = counting();
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.org/img/logo.svg?v=3";
        let text = format!("![a]({url})\n![b]({url} \"title\")\n<img src=\"{url}\" width=10>\n");

        let out = resolver.resolve(&text, &ctx(dir.path())).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.references.len(), 1);
        let resolved = out.references[0].resolved_path.clone().unwrap();
        assert!(resolved.to_string_lossy().ends_with(".svg"));
        let new = path_to_reference(&resolved);
        assert_eq!(out.text.matches(&new).count(), 3);
        assert!(!out.text.contains(url));
        assert!(out.text.contains("\"title\")"));
        assert!(out.text.contains("width=10>"));
    }

    #[tokio::test]
    async fn existing_download_is_reused() {
        let (fetcher, resolver) = counting();
        let dir = tempfile::tempdir().unwrap();
        let url = "http://example.org/pic";
        let dest_dir = dir.path().join("remote");
        std::fs::create_dir_all(&dest_dir).unwrap();
        std::fs::write(dest_dir.join(remote_file_name(url)), b"cached").unwrap();

        let out = resolver.resolve(&format!("![x]({url})"), &ctx(dir.path())).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(out.references[0].is_resolved());
    }

    #[tokio::test]
    async fn missing_local_left_byte_identical() {
        let (_, resolver) = counting();
        let dir = tempfile::tempdir().unwrap();
        let text = "before ![a](./missing.png) after";
        let out = resolver.resolve(text, &ctx(dir.path())).await;
        assert_eq!(out.text, text);
        assert!(matches!(
            out.references[0].error,
            Some(ResourceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn existing_local_becomes_absolute() {
        let (fetcher, resolver) = counting();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/a.png"), b"png").unwrap();

        let out = resolver
            .resolve("![a](img/a.png)", &ctx(dir.path()))
            .await;
        let abs = std::fs::canonicalize(dir.path().join("img/a.png")).unwrap();
        assert_eq!(out.text, format!("![a]({})", path_to_reference(&abs)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_token() {
        let resolver = ResourceResolver::new(Arc::new(FailingFetcher), 4);
        let dir = tempfile::tempdir().unwrap();
        let text = "<IMG SRC='https://example.org/gone.jpg'>";
        let out = resolver.resolve(text, &ctx(dir.path())).await;
        assert_eq!(out.text, text);
        assert_eq!(out.unresolved().count(), 1);
    }

    #[tokio::test]
    async fn fetches_are_bounded_by_worker_count() {
        let fetcher = Arc::new(SlowFetcher::default());
        let resolver = ResourceResolver::new(fetcher.clone(), 2);
        let dir = tempfile::tempdir().unwrap();
        let text: String = (0..6)
            .map(|i| format!("![{i}](https://example.org/{i}.png)\n"))
            .collect();

        let out = resolver.resolve(&text, &ctx(dir.path())).await;

        assert_eq!(out.references.len(), 6);
        assert_eq!(out.unresolved().count(), 0);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak > 1, "fetches ran one at a time");
        assert!(peak <= 2, "{peak} fetches in flight with 2 workers");
    }

    #[test]
    fn verbatim_prefix_is_stripped() {
        assert_eq!(
            path_to_reference(Path::new(r"\\?\C:\docs\img\a.png")),
            "C:/docs/img/a.png"
        );
        assert_eq!(
            path_to_reference(Path::new(r"\\?\UNC\host\share\a.png")),
            "//host/share/a.png"
        );
        assert_eq!(
            without_verbatim(PathBuf::from(r"\\?\D:\x.png")),
            PathBuf::from(r"D:\x.png")
        );
        assert_eq!(
            without_verbatim(PathBuf::from("/srv/docs/a.png")),
            PathBuf::from("/srv/docs/a.png")
        );
    }

    #[test]
    fn remote_names_are_stable() {
        let a = remote_file_name("https://example.org/a.JPG?x=1");
        assert_eq!(a, remote_file_name("https://example.org/a.JPG?x=1"));
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), 64 + 4);
        assert!(remote_file_name("https://example.org/").ends_with(".png"));
    }

    #[test]
    fn discovery_dedups_and_skips_data_uris() {
        let text = "![a](x.png) ![b](x.png) ![c](data:image/png;base64,AAAA) <img src=\"y.png\">";
        assert_eq!(discover_tokens(text), vec!["x.png", "y.png"]);
    }
}
