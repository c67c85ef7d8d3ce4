//! The rendering capability and the resources wrapped around it.
//!
//! Browser automation is imperative and stateful, so it sits behind the
//! narrow [`Renderer`] trait and the rest of the pipeline stays pure and
//! testable without a browser. Sessions are scarce (often a single Chrome
//! instance), so they live in a [`RendererPool`] with scoped leases that
//! return the session even when extraction fails.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::cookie::Jar;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use url::Url;

use crate::http_client;

/// Narrow interface over a page-rendering engine.
///
/// `render` navigates and waits (bounded) for the wait condition before
/// returning the document; `document` re-reads the current DOM, which is how
/// scroll-triggered content becomes visible to callers.
#[async_trait]
pub trait Renderer: Send {
    async fn render(&mut self, url: &str, wait_css: Option<&str>, timeout: Duration)
        -> Result<String>;

    /// Scroll down by a fraction of the page height.
    async fn scroll(&mut self, fraction: f64) -> Result<()>;

    /// The current DOM, after any scrolling since the last `render`.
    async fn document(&mut self) -> Result<String>;

    async fn current_url(&mut self) -> Result<String>;

    /// Best-effort session teardown.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Renders through a WebDriver-controlled headless Chrome.
pub struct WebDriverRenderer {
    driver: Option<WebDriver>,
    settle: Duration,
}

impl WebDriverRenderer {
    pub async fn connect(
        webdriver_url: &str,
        user_agent: &str,
        headless: bool,
        settle: Duration,
    ) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        let mut args: Vec<String> = Vec::new();
        if headless {
            args.push("--headless=new".to_string());
        }
        args.extend(
            [
                "--disable-gpu",
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--window-size=1280,1700",
                "--disable-blink-features=AutomationControlled",
                "--lang=en-US,en",
            ]
            .map(String::from),
        );
        args.push(format!("--user-agent={}", user_agent));
        caps.insert_browser_option("args", serde_json::to_value(args)?)?;

        let driver = WebDriver::new(webdriver_url, caps)
            .await
            .with_context(|| format!("failed to connect to WebDriver at {}", webdriver_url))?;

        Ok(Self {
            driver: Some(driver),
            settle,
        })
    }

    fn driver(&self) -> Result<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| anyhow!("renderer session already shut down"))
    }
}

#[async_trait]
impl Renderer for WebDriverRenderer {
    async fn render(
        &mut self,
        url: &str,
        wait_css: Option<&str>,
        timeout: Duration,
    ) -> Result<String> {
        let driver = self.driver()?;

        let already_there = driver
            .current_url()
            .await
            .map(|u| u.as_str() == url)
            .unwrap_or(false);
        if !already_there {
            driver
                .goto(url)
                .await
                .with_context(|| format!("failed to navigate to {}", url))?;
        }

        if let Some(css) = wait_css {
            let waited = driver
                .query(By::Css(css))
                .wait(timeout, Duration::from_millis(250))
                .first()
                .await;
            if waited.is_err() {
                tracing::debug!("wait condition '{}' not met within {:?}, continuing", css, timeout);
            }
        }

        tokio::time::sleep(self.settle).await;
        Ok(driver.source().await?)
    }

    async fn scroll(&mut self, fraction: f64) -> Result<()> {
        self.driver()?
            .execute(
                "window.scrollBy(0, document.body.scrollHeight * arguments[0]);",
                vec![serde_json::json!(fraction)],
            )
            .await?;
        Ok(())
    }

    async fn document(&mut self) -> Result<String> {
        Ok(self.driver()?.source().await?)
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self.driver()?.current_url().await?.to_string())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await.context("failed to quit browser session")?;
        }
        Ok(())
    }
}

/// Plain-HTTP renderer for server-rendered sites; scrolling is a no-op.
pub struct StaticRenderer {
    client: reqwest::Client,
    cookie_jar: Arc<Jar>,
    current: Option<(String, String)>,
}

impl StaticRenderer {
    pub fn new(user_agent: &str) -> Result<Self> {
        let cookie_jar = Arc::new(Jar::default());
        let client = http_client::create_client_with_cookies(user_agent, Some(cookie_jar.clone()))?;
        Ok(Self {
            client,
            cookie_jar,
            current: None,
        })
    }

    /// Pre-seed the session with cookies exported from a browser.
    pub fn load_cookies_from_file(&self, path: &str, site_url: &str) -> Result<usize> {
        http_client::load_cookies_into_jar(&self.cookie_jar, path, site_url)
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(
        &mut self,
        url: &str,
        _wait_css: Option<&str>,
        timeout: Duration,
    ) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?;
        let html = response.text().await?;
        self.current = Some((url.to_string(), html.clone()));
        Ok(html)
    }

    async fn scroll(&mut self, _fraction: f64) -> Result<()> {
        // Static documents are complete on first fetch
        Ok(())
    }

    async fn document(&mut self) -> Result<String> {
        match &self.current {
            Some((_, html)) => Ok(html.clone()),
            None => bail!("no document rendered yet"),
        }
    }

    async fn current_url(&mut self) -> Result<String> {
        match &self.current {
            Some((url, _)) => Ok(url.clone()),
            None => bail!("no document rendered yet"),
        }
    }
}

/// Fixed-size pool of renderer sessions with scoped acquire/release.
pub struct RendererPool {
    slot: mpsc::UnboundedSender<Box<dyn Renderer>>,
    idle: Mutex<mpsc::UnboundedReceiver<Box<dyn Renderer>>>,
    size: usize,
}

impl RendererPool {
    pub fn new(renderers: Vec<Box<dyn Renderer>>) -> Self {
        let size = renderers.len();
        let (slot, idle) = mpsc::unbounded_channel();
        for renderer in renderers {
            // Receiver is held right here, send cannot fail
            let _ = slot.send(renderer);
        }
        Self {
            slot,
            idle: Mutex::new(idle),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Waits until a session is free. The lease returns it on drop.
    pub async fn acquire(&self) -> Result<RendererLease> {
        let mut idle = self.idle.lock().await;
        let renderer = idle
            .recv()
            .await
            .ok_or_else(|| anyhow!("renderer pool closed"))?;
        Ok(RendererLease {
            renderer: Some(renderer),
            slot: self.slot.clone(),
        })
    }

    /// Waits for all leases to come home, then tears the sessions down.
    pub async fn shutdown(&self) {
        let mut idle = self.idle.lock().await;
        for _ in 0..self.size {
            match idle.recv().await {
                Some(mut renderer) => {
                    if let Err(e) = renderer.shutdown().await {
                        tracing::warn!("failed to shut down renderer session: {:#}", e);
                    }
                }
                None => break,
            }
        }
    }
}

/// A borrowed renderer session; dropping it returns the session to the pool.
pub struct RendererLease {
    renderer: Option<Box<dyn Renderer>>,
    slot: mpsc::UnboundedSender<Box<dyn Renderer>>,
}

impl RendererLease {
    pub fn renderer(&mut self) -> &mut dyn Renderer {
        self.renderer
            .as_deref_mut()
            .expect("renderer lease already released")
    }
}

impl Drop for RendererLease {
    fn drop(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            let _ = self.slot.send(renderer);
        }
    }
}

/// Enforces a minimum, jittered delay between consecutive requests to the
/// same host. Rate limiting only; correctness never depends on it.
pub struct Throttle {
    min_delay: Duration,
    jitter_ms: u64,
    last: Mutex<HashMap<String, Instant>>,
}

impl Throttle {
    pub fn new(min_delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            jitter_ms,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub async fn wait(&self, url: &str) {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        else {
            return;
        };

        let jitter = if self.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
        };

        let target = {
            let mut last = self.last.lock().await;
            let now = Instant::now();
            let earliest = last
                .get(&host)
                .map(|t| *t + self.min_delay)
                .unwrap_or(now);
            let target = earliest.max(now) + jitter;
            last.insert(host, target);
            target
        };

        tokio::time::sleep_until(target).await;
    }
}

/// Wall-clock and URL-count limits for a run. When exceeded, discovery and
/// extraction stop early and whatever was collected so far is kept.
pub struct RunBudget {
    deadline: Option<Instant>,
    max_urls: Option<usize>,
}

impl RunBudget {
    pub fn new(max_runtime_secs: Option<u64>, max_urls: Option<usize>) -> Self {
        Self {
            deadline: max_runtime_secs.map(|s| Instant::now() + Duration::from_secs(s)),
            max_urls,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            max_urls: None,
        }
    }

    pub fn time_exhausted(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    pub fn url_cap_reached(&self, collected: usize) -> bool {
        self.max_urls.map(|cap| collected >= cap).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRenderer {
        label: &'static str,
        shutdowns: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Renderer for NullRenderer {
        async fn render(
            &mut self,
            _url: &str,
            _wait_css: Option<&str>,
            _timeout: Duration,
        ) -> Result<String> {
            Ok(format!("<html>{}</html>", self.label))
        }

        async fn scroll(&mut self, _fraction: f64) -> Result<()> {
            Ok(())
        }

        async fn document(&mut self) -> Result<String> {
            Ok(String::new())
        }

        async fn current_url(&mut self) -> Result<String> {
            Ok(String::new())
        }

        async fn shutdown(&mut self) -> Result<()> {
            self.shutdowns
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn pool_of(n: usize, shutdowns: Arc<std::sync::atomic::AtomicUsize>) -> RendererPool {
        let renderers: Vec<Box<dyn Renderer>> = (0..n)
            .map(|_| {
                Box::new(NullRenderer {
                    label: "null",
                    shutdowns: shutdowns.clone(),
                }) as Box<dyn Renderer>
            })
            .collect();
        RendererPool::new(renderers)
    }

    #[tokio::test]
    async fn test_lease_returns_session_on_drop() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let pool = pool_of(1, counter);

        let lease = pool.acquire().await.unwrap();
        drop(lease);

        // Same single session must be available again
        let mut lease = pool.acquire().await.unwrap();
        let html = lease
            .renderer()
            .render("https://example.com", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(html.contains("null"));
    }

    #[tokio::test]
    async fn test_pool_shutdown_tears_down_every_session() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let pool = pool_of(3, counter.clone());
        pool.shutdown().await;
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_static_renderer_requires_render_before_document() {
        let mut renderer = StaticRenderer::new("Mozilla/5.0 (Test Agent)").unwrap();
        assert!(renderer.document().await.is_err());
        assert!(renderer.current_url().await.is_err());
    }

    #[tokio::test]
    async fn test_throttle_ignores_unparseable_urls() {
        let throttle = Throttle::new(60_000, 0);
        // Must return immediately instead of panicking or sleeping
        throttle.wait("not a url").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_out_same_host_requests() {
        let throttle = Throttle::new(500, 0);
        let start = Instant::now();
        throttle.wait("https://example.com/a").await;
        throttle.wait("https://example.com/b").await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_budget_url_cap() {
        let budget = RunBudget::new(None, Some(10));
        assert!(!budget.url_cap_reached(9));
        assert!(budget.url_cap_reached(10));
        assert!(!budget.time_exhausted());
    }

    #[test]
    fn test_budget_unlimited() {
        let budget = RunBudget::unlimited();
        assert!(!budget.time_exhausted());
        assert!(!budget.url_cap_reached(usize::MAX));
    }
}
