//! Rendering-engine capability traits and the headless Chrome backend.
//!
//! The pipeline only ever talks to [`RenderEngine`] / [`RenderSurface`]:
//! load a document, evaluate a script, poll a predicate, print a PDF, capture
//! elements. Swapping the browser (or scripting it in tests) touches nothing
//! outside this module.
//!
//! All methods are blocking. Callers run them inside
//! `tokio::task::spawn_blocking`.

use crate::config::EngineConfig;
use crate::error::PipelineError;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::types::{Bounds, PrintToPdfOptions};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// CSS-pixel size of a rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Paper geometry for PDF printing, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfLayout {
    pub paper_width_in: f64,
    pub paper_height_in: f64,
    pub margin_in: f64,
}

impl PdfLayout {
    /// ISO A4 with 1 cm margins.
    pub const A4: PdfLayout = PdfLayout {
        paper_width_in: 8.27,
        paper_height_in: 11.69,
        margin_in: 0.3937,
    };

    /// Single borderless page of the given CSS-pixel size (96 px per inch).
    pub fn continuous(width_px: u32, height_px: f64) -> Self {
        PdfLayout {
            paper_width_in: f64::from(width_px) / 96.0,
            paper_height_in: height_px / 96.0,
            margin_in: 0.0,
        }
    }
}

/// One isolated page inside a rendering engine.
///
/// Dropping the surface releases it.
pub trait RenderSurface: Send {
    /// Navigate to `url` and block until the load event.
    fn load(&mut self, url: &str) -> Result<(), PipelineError>;

    /// Evaluate a script expression and return its JSON value.
    fn evaluate(&mut self, script: &str) -> Result<Option<Value>, PipelineError>;

    /// Print the loaded document.
    fn print_pdf(&mut self, layout: &PdfLayout) -> Result<Vec<u8>, PipelineError>;

    /// PNG capture of each element matching `selector`, in document order,
    /// stopping after `limit` elements when given.
    fn capture_elements(
        &mut self,
        selector: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, PipelineError>;

    /// Poll `predicate` until it evaluates to `true` or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_until(
        &mut self,
        predicate: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<bool, PipelineError> {
        let deadline = Instant::now() + timeout;
        loop {
            if matches!(self.evaluate(predicate)?, Some(Value::Bool(true))) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(poll.min(deadline - now));
        }
    }

    /// Block for `duration` (layout settling).
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A rendering engine able to open fresh surfaces.
///
/// One engine may be shared by many sequential jobs; each job opens its own
/// surface.
pub trait RenderEngine: Send + Sync {
    fn open_surface(&self, viewport: Viewport) -> Result<Box<dyn RenderSurface>, PipelineError>;
}

// ── Chrome backend ───────────────────────────────────────────────────────

/// Headless Chrome/Chromium driven over the DevTools protocol.
pub struct ChromeEngine {
    browser: Browser,
}

impl ChromeEngine {
    /// Launch the browser process. Blocking.
    pub fn launch(config: &EngineConfig) -> Result<Self, PipelineError> {
        let scale_arg = format!("--force-device-scale-factor={}", config.device_scale_factor);
        let args = vec![OsStr::new(&scale_arg), OsStr::new("--hide-scrollbars")];

        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .path(config.browser_path.clone())
            .window_size(Some((1200, 1000)))
            .idle_browser_timeout(Duration::from_secs(config.idle_timeout_secs))
            .args(args)
            .build()
            .map_err(|e| PipelineError::EngineUnavailable(e.to_string()))?;

        let browser =
            Browser::new(options).map_err(|e| PipelineError::EngineUnavailable(e.to_string()))?;
        info!(
            "Headless browser ready (scale factor {})",
            config.device_scale_factor
        );
        Ok(Self { browser })
    }
}

impl RenderEngine for ChromeEngine {
    fn open_surface(&self, viewport: Viewport) -> Result<Box<dyn RenderSurface>, PipelineError> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| PipelineError::engine("open surface", e))?;
        tab.set_bounds(Bounds::Normal {
            left: Some(0),
            top: Some(0),
            width: Some(f64::from(viewport.width)),
            height: Some(f64::from(viewport.height)),
        })
        .map_err(|e| PipelineError::engine("size surface", e))?;
        debug!("Opened surface {}x{}", viewport.width, viewport.height);
        Ok(Box::new(ChromeSurface { tab }))
    }
}

struct ChromeSurface {
    tab: Arc<Tab>,
}

impl RenderSurface for ChromeSurface {
    fn load(&mut self, url: &str) -> Result<(), PipelineError> {
        self.tab
            .navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| PipelineError::engine("load", e))?;
        Ok(())
    }

    fn evaluate(&mut self, script: &str) -> Result<Option<Value>, PipelineError> {
        self.tab
            .evaluate(script, false)
            .map(|remote| remote.value)
            .map_err(|e| PipelineError::engine("evaluate", e))
    }

    fn print_pdf(&mut self, layout: &PdfLayout) -> Result<Vec<u8>, PipelineError> {
        let options = PrintToPdfOptions {
            print_background: Some(true),
            paper_width: Some(layout.paper_width_in),
            paper_height: Some(layout.paper_height_in),
            margin_top: Some(layout.margin_in),
            margin_bottom: Some(layout.margin_in),
            margin_left: Some(layout.margin_in),
            margin_right: Some(layout.margin_in),
            ..Default::default()
        };
        self.tab
            .print_to_pdf(Some(options))
            .map_err(|e| PipelineError::engine("print", e))
    }

    fn capture_elements(
        &mut self,
        selector: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Vec<u8>>, PipelineError> {
        let elements = match self.tab.find_elements(selector) {
            Ok(found) => found,
            // No match is reported as an error by the protocol layer.
            Err(_) => return Ok(Vec::new()),
        };
        let take = limit.unwrap_or(elements.len());
        let mut captures = Vec::with_capacity(take.min(elements.len()));
        for element in elements.iter().take(take) {
            element
                .scroll_into_view()
                .map_err(|e| PipelineError::engine("scroll", e))?;
            let png = element
                .capture_screenshot(CaptureScreenshotFormatOption::Png)
                .map_err(|e| PipelineError::engine("capture", e))?;
            captures.push(png);
        }
        Ok(captures)
    }
}

impl Drop for ChromeSurface {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            debug!("Failed to close surface: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        remaining: usize,
        evaluations: usize,
    }

    impl RenderSurface for Countdown {
        fn load(&mut self, _url: &str) -> Result<(), PipelineError> {
            Ok(())
        }

        fn evaluate(&mut self, _script: &str) -> Result<Option<Value>, PipelineError> {
            self.evaluations += 1;
            if self.remaining == 0 {
                return Ok(Some(Value::Bool(true)));
            }
            self.remaining -= 1;
            Ok(Some(Value::Bool(false)))
        }

        fn print_pdf(&mut self, _layout: &PdfLayout) -> Result<Vec<u8>, PipelineError> {
            Ok(Vec::new())
        }

        fn capture_elements(
            &mut self,
            _selector: &str,
            _limit: Option<usize>,
        ) -> Result<Vec<Vec<u8>>, PipelineError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn wait_until_polls_until_true() {
        let mut s = Countdown {
            remaining: 3,
            evaluations: 0,
        };
        let ok = s
            .wait_until("x", Duration::from_secs(5), Duration::from_millis(1))
            .unwrap();
        assert!(ok);
        assert_eq!(s.evaluations, 4);
    }

    #[test]
    fn wait_until_times_out() {
        let mut s = Countdown {
            remaining: usize::MAX,
            evaluations: 0,
        };
        let ok = s
            .wait_until("x", Duration::from_millis(20), Duration::from_millis(5))
            .unwrap();
        assert!(!ok);
        assert!(s.evaluations >= 2);
    }

    #[test]
    fn continuous_layout_in_inches() {
        let l = PdfLayout::continuous(960, 1920.0);
        assert_eq!(l.paper_width_in, 10.0);
        assert_eq!(l.paper_height_in, 20.0);
        assert_eq!(l.margin_in, 0.0);
    }
}
