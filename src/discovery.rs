//! Detail-URL discovery: drives the renderer across search pages, scrolls
//! until new links stop appearing, follows pagination, and yields the
//! deduplicated set of detail-page URLs.

use anyhow::{Context, Result};
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::renderer::{Renderer, RunBudget, Throttle};

/// Per-run crawl bookkeeping. Created at the start of a discovery run and
/// discarded with it; never persisted.
pub struct CrawlState {
    seen_urls: Mutex<HashSet<String>>,
    frontier: VecDeque<String>,
    visited_pages: HashSet<String>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self {
            seen_urls: Mutex::new(HashSet::new()),
            frontier: VecDeque::new(),
            visited_pages: HashSet::new(),
        }
    }

    /// The single mutation point for the shared URL set. Returns true when
    /// the URL is new.
    fn insert_detail(&self, url: String) -> bool {
        self.seen_urls
            .lock()
            .expect("seen-url lock poisoned")
            .insert(url)
    }

    pub fn seen_count(&self) -> usize {
        self.seen_urls.lock().expect("seen-url lock poisoned").len()
    }

    pub fn sorted_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .seen_urls
            .lock()
            .expect("seen-url lock poisoned")
            .iter()
            .cloned()
            .collect();
        urls.sort_unstable();
        urls
    }

    pub fn pages_visited(&self) -> usize {
        self.visited_pages.len()
    }
}

impl Default for CrawlState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub max_pages: usize,
    pub max_scrolls: usize,
    pub min_new_per_round: usize,
    pub stagnation_rounds: usize,
    pub scroll_delay_ms: u64,
    pub scroll_jitter_ms: u64,
    pub render_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_pages: 30,
            max_scrolls: 40,
            min_new_per_round: 2,
            stagnation_rounds: 4,
            scroll_delay_ms: 1000,
            scroll_jitter_ms: 800,
            render_timeout: Duration::from_secs(20),
        }
    }
}

/// Scroll-and-paginate discovery over one or more start pages.
///
/// State is shared across `run` calls, so multiple start URLs contribute to
/// one deduplicated URL set.
pub struct DiscoveryEngine {
    settings: DiscoverySettings,
    detail_re: Regex,
    state: CrawlState,
}

impl DiscoveryEngine {
    pub fn new(detail_re: Regex, settings: DiscoverySettings) -> Self {
        Self {
            settings,
            detail_re,
            state: CrawlState::new(),
        }
    }

    pub fn detail_urls(&self) -> Vec<String> {
        self.state.sorted_urls()
    }

    pub fn pages_visited(&self) -> usize {
        self.state.pages_visited()
    }

    /// Crawl one start page and everything its pagination reaches.
    ///
    /// A start URL without a resolvable host is fatal; a single page failing
    /// to render is logged and skipped.
    pub async fn run(
        &mut self,
        renderer: &mut dyn Renderer,
        throttle: &Throttle,
        budget: &RunBudget,
        start_url: &str,
    ) -> Result<()> {
        let parsed = Url::parse(start_url)
            .with_context(|| format!("invalid start URL: {}", start_url))?;
        parsed
            .host_str()
            .with_context(|| format!("start URL has no host: {}", start_url))?;

        self.state.frontier.push_back(start_url.to_string());
        let mut pages_this_run = 0usize;

        while let Some(page) = self.state.frontier.pop_front() {
            if self.state.visited_pages.contains(&page) {
                continue;
            }
            if pages_this_run >= self.settings.max_pages {
                tracing::info!("page budget ({}) reached", self.settings.max_pages);
                break;
            }
            if budget.time_exhausted() {
                tracing::info!("run budget exhausted, stopping discovery");
                break;
            }
            if budget.url_cap_reached(self.state.seen_count()) {
                tracing::info!("URL budget reached, stopping discovery");
                break;
            }

            throttle.wait(&page).await;
            tracing::info!("[Page {}] {}", pages_this_run + 1, page);

            // Wait until at least one hyperlink is present; on timeout the
            // page simply contributes zero links.
            let html = match renderer
                .render(&page, Some("a[href]"), self.settings.render_timeout)
                .await
            {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!("failed to render {}: {:#}", page, e);
                    self.state.visited_pages.insert(page);
                    continue;
                }
            };
            self.state.visited_pages.insert(page.clone());
            pages_this_run += 1;

            let mut current_doc = html;
            let mut stagnant = 0usize;
            for round in 1..=self.settings.max_scrolls {
                let gained = self.harvest(&current_doc, &page);
                tracing::debug!(
                    "  scroll {:02}: +{} (total {})",
                    round,
                    gained,
                    self.state.seen_count()
                );

                if budget.url_cap_reached(self.state.seen_count()) {
                    break;
                }
                stagnant = if gained < self.settings.min_new_per_round {
                    stagnant + 1
                } else {
                    0
                };
                if stagnant >= self.settings.stagnation_rounds {
                    tracing::debug!("  page stagnant after {} rounds", round);
                    break;
                }

                if let Err(e) = renderer.scroll(0.9).await {
                    tracing::warn!("scroll failed on {}: {:#}", page, e);
                    break;
                }
                self.scroll_pause().await;
                current_doc = match renderer.document().await {
                    Ok(doc) => doc,
                    Err(e) => {
                        tracing::warn!("failed to re-read {}: {:#}", page, e);
                        break;
                    }
                };
            }

            // One last sweep at the bottom for last-moment loads
            if renderer.scroll(1.0).await.is_ok() {
                self.scroll_pause().await;
                if let Ok(doc) = renderer.document().await {
                    self.harvest(&doc, &page);
                    current_doc = doc;
                }
            }

            for candidate in next_page_candidates(&current_doc, &page) {
                if !self.state.visited_pages.contains(&candidate)
                    && !self.state.frontier.contains(&candidate)
                {
                    tracing::debug!("  queueing next page {}", candidate);
                    self.state.frontier.push_back(candidate);
                }
            }
        }

        self.state.frontier.clear();
        tracing::info!(
            "collected {} unique detail URLs across {} pages",
            self.state.seen_count(),
            self.state.pages_visited()
        );
        Ok(())
    }

    /// Pull detail-page links out of a document. Returns how many were new.
    fn harvest(&self, html: &str, base: &str) -> usize {
        let mut gained = 0;
        for link in absolute_links(html, base) {
            if self.detail_re.is_match(&link) && self.state.insert_detail(link) {
                gained += 1;
            }
        }
        gained
    }

    async fn scroll_pause(&self) {
        let jitter = if self.settings.scroll_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.settings.scroll_jitter_ms)
        };
        tokio::time::sleep(Duration::from_millis(self.settings.scroll_delay_ms + jitter)).await;
    }
}

/// All hrefs in the document, absolutized against the page URL.
fn absolute_links(html: &str, base: &str) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else {
        return Vec::new();
    };
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    doc.select(&anchor)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base_url.join(href).ok())
        .map(|u| u.to_string())
        .collect()
}

/// Pagination affordances on a page: an explicit next link, numeric page
/// links, or page-query-parameter links. Same host only.
fn next_page_candidates(html: &str, base: &str) -> Vec<String> {
    let Ok(base_url) = Url::parse(base) else {
        return Vec::new();
    };
    let Some(host) = base_url.host_str().map(str::to_string) else {
        return Vec::new();
    };
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for a in doc.select(&anchor) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(abs) = base_url.join(href) else {
            continue;
        };
        if abs.host_str() != Some(host.as_str()) {
            continue;
        }

        let text = crate::profiles::squish(&a.text().collect::<String>());
        let is_next = a.value().attr("rel").map(|r| r.eq_ignore_ascii_case("next")) == Some(true)
            || text.eq_ignore_ascii_case("next");
        let is_numeric = !text.is_empty() && text.chars().all(|c| c.is_ascii_digit());
        let is_page_query = abs.as_str().contains("page=");

        if !(is_next || is_numeric || is_page_query) {
            continue;
        }

        let url = abs.to_string();
        if url != base && seen.insert(url.clone()) {
            candidates.push(url);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Scripted renderer: each URL maps to a sequence of documents, one per
    /// scroll stage. Scrolling past the last stage stays on it.
    struct FakeRenderer {
        pages: HashMap<String, Vec<String>>,
        fail: HashSet<String>,
        current: Option<(String, usize)>,
    }

    impl FakeRenderer {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                fail: HashSet::new(),
                current: None,
            }
        }

        fn page(mut self, url: &str, stages: &[&str]) -> Self {
            self.pages
                .insert(url.to_string(), stages.iter().map(|s| s.to_string()).collect());
            self
        }

        fn failing(mut self, url: &str) -> Self {
            self.fail.insert(url.to_string());
            self
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(
            &mut self,
            url: &str,
            _wait_css: Option<&str>,
            _timeout: Duration,
        ) -> Result<String> {
            if self.fail.contains(url) {
                bail!("simulated navigation failure");
            }
            let Some(stages) = self.pages.get(url) else {
                bail!("unknown page");
            };
            self.current = Some((url.to_string(), 0));
            Ok(stages[0].clone())
        }

        async fn scroll(&mut self, _fraction: f64) -> Result<()> {
            if let Some((url, stage)) = &mut self.current {
                let max = self.pages[url.as_str()].len() - 1;
                *stage = (*stage + 1).min(max);
            }
            Ok(())
        }

        async fn document(&mut self) -> Result<String> {
            match &self.current {
                Some((url, stage)) => Ok(self.pages[url.as_str()][*stage].clone()),
                None => bail!("no page loaded"),
            }
        }

        async fn current_url(&mut self) -> Result<String> {
            match &self.current {
                Some((url, _)) => Ok(url.clone()),
                None => bail!("no page loaded"),
            }
        }
    }

    fn settings() -> DiscoverySettings {
        DiscoverySettings {
            max_pages: 10,
            max_scrolls: 10,
            min_new_per_round: 1,
            stagnation_rounds: 2,
            scroll_delay_ms: 0,
            scroll_jitter_ms: 0,
            render_timeout: Duration::from_millis(10),
        }
    }

    fn detail_re() -> Regex {
        Regex::new(r"^https://example\.com/listing/[a-z0-9-]+$").unwrap()
    }

    fn links(hrefs: &[&str]) -> String {
        let anchors: String = hrefs
            .iter()
            .map(|h| format!("<a href=\"{}\">unit</a>", h))
            .collect();
        format!("<html><body>{}</body></html>", anchors)
    }

    fn throttle() -> Throttle {
        Throttle::new(0, 0)
    }

    #[tokio::test]
    async fn test_discovery_collects_scroll_loaded_links() {
        let start = "https://example.com/search";
        let mut renderer = FakeRenderer::new().page(
            start,
            &[
                &links(&["/listing/a1", "/listing/b2", "/about"]),
                &links(&["/listing/a1", "/listing/b2", "/listing/c3"]),
                &links(&["/listing/a1", "/listing/b2", "/listing/c3"]),
            ],
        );

        let mut engine = DiscoveryEngine::new(detail_re(), settings());
        engine
            .run(&mut renderer, &throttle(), &RunBudget::unlimited(), start)
            .await
            .unwrap();

        assert_eq!(
            engine.detail_urls(),
            vec![
                "https://example.com/listing/a1",
                "https://example.com/listing/b2",
                "https://example.com/listing/c3",
            ]
        );
    }

    #[tokio::test]
    async fn test_discovery_only_emits_detail_urls() {
        let start = "https://example.com/search";
        let mut renderer = FakeRenderer::new().page(
            start,
            &[&links(&["/listing/a1", "/about", "/contact", "https://other.com/listing/x9"])],
        );

        let mut engine = DiscoveryEngine::new(detail_re(), settings());
        engine
            .run(&mut renderer, &throttle(), &RunBudget::unlimited(), start)
            .await
            .unwrap();

        assert_eq!(engine.detail_urls(), vec!["https://example.com/listing/a1"]);
    }

    #[tokio::test]
    async fn test_discovery_follows_pagination_without_looping() {
        let start = "https://example.com/search";
        let page2 = "https://example.com/search?page=2";
        let mut renderer = FakeRenderer::new()
            .page(
                start,
                &[&format!(
                    "{}<a rel=\"next\" href=\"/search?page=2\">Next</a>",
                    links(&["/listing/a1"])
                )],
            )
            .page(
                page2,
                // page 2 links back to page 1; visited set must prevent a loop
                &[&format!(
                    "{}<a href=\"/search?page=1\">1</a>",
                    links(&["/listing/d4"])
                )],
            )
            .page(
                "https://example.com/search?page=1",
                &[&links(&["/listing/a1"])],
            );

        let mut engine = DiscoveryEngine::new(detail_re(), settings());
        engine
            .run(&mut renderer, &throttle(), &RunBudget::unlimited(), start)
            .await
            .unwrap();

        assert_eq!(
            engine.detail_urls(),
            vec![
                "https://example.com/listing/a1",
                "https://example.com/listing/d4",
            ]
        );
        // start, page=2, page=1 (distinct URL) all visited once
        assert_eq!(engine.pages_visited(), 3);
    }

    #[tokio::test]
    async fn test_discovery_is_idempotent_on_static_pages() {
        let start = "https://example.com/search";
        let build = || {
            FakeRenderer::new().page(start, &[&links(&["/listing/b2", "/listing/a1"])])
        };

        let mut first = DiscoveryEngine::new(detail_re(), settings());
        first
            .run(&mut build(), &throttle(), &RunBudget::unlimited(), start)
            .await
            .unwrap();

        let mut second = DiscoveryEngine::new(detail_re(), settings());
        second
            .run(&mut build(), &throttle(), &RunBudget::unlimited(), start)
            .await
            .unwrap();

        assert_eq!(first.detail_urls(), second.detail_urls());
        // sorted output regardless of document order
        assert_eq!(
            first.detail_urls(),
            vec![
                "https://example.com/listing/a1",
                "https://example.com/listing/b2",
            ]
        );
    }

    #[tokio::test]
    async fn test_discovery_skips_failing_page_and_continues() {
        let start = "https://example.com/search";
        let page2 = "https://example.com/search?page=2";
        let mut renderer = FakeRenderer::new()
            .page(
                start,
                &[&format!(
                    "{}<a href=\"/search?page=2\">2</a>",
                    links(&["/listing/a1"])
                )],
            )
            .failing(page2);

        let mut engine = DiscoveryEngine::new(detail_re(), settings());
        engine
            .run(&mut renderer, &throttle(), &RunBudget::unlimited(), start)
            .await
            .unwrap();

        assert_eq!(engine.detail_urls(), vec!["https://example.com/listing/a1"]);
    }

    #[tokio::test]
    async fn test_discovery_fatal_on_invalid_start_url() {
        let mut renderer = FakeRenderer::new();
        let mut engine = DiscoveryEngine::new(detail_re(), settings());
        let result = engine
            .run(
                &mut renderer,
                &throttle(),
                &RunBudget::unlimited(),
                "not a url at all",
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_discovery_respects_url_budget() {
        let start = "https://example.com/search";
        let mut renderer = FakeRenderer::new().page(
            start,
            &[&links(&["/listing/a1", "/listing/b2", "/listing/c3", "/listing/d4"])],
        );

        let mut engine = DiscoveryEngine::new(detail_re(), settings());
        engine
            .run(
                &mut renderer,
                &throttle(),
                &RunBudget::new(None, Some(2)),
                start,
            )
            .await
            .unwrap();

        // The harvest that crossed the cap finishes; no further pages load
        assert!(engine.detail_urls().len() >= 2);
        assert_eq!(engine.pages_visited(), 1);
    }

    #[test]
    fn test_next_page_candidates_kinds() {
        let html = r#"
            <html><body>
                <a rel="next" href="/search?p=b">More</a>
                <a href="/search/3">3</a>
                <a href="/search?page=4">later</a>
                <a href="https://other.com/search?page=9">offsite</a>
                <a href="/contact">Contact</a>
            </body></html>
        "#;
        let candidates = next_page_candidates(html, "https://example.com/search");
        assert_eq!(
            candidates,
            vec![
                "https://example.com/search?p=b",
                "https://example.com/search/3",
                "https://example.com/search?page=4",
            ]
        );
    }

    #[test]
    fn test_next_page_candidates_exclude_current_page() {
        let html = r#"<html><body><a href="/search?page=2">2</a></body></html>"#;
        let candidates = next_page_candidates(html, "https://example.com/search?page=2");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_crawl_state_insert_is_idempotent() {
        let state = CrawlState::new();
        assert!(state.insert_detail("https://example.com/listing/a1".to_string()));
        assert!(!state.insert_detail("https://example.com/listing/a1".to_string()));
        assert_eq!(state.seen_count(), 1);
    }
}
