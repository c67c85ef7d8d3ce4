use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

use crate::discovery::DiscoverySettings;
use crate::profiles::SiteProfile;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub start_urls: Vec<String>,
    /// Built-in site profile name ("apartments" or "bostonpads"), ignored
    /// when `custom_profile` is set.
    #[serde(default = "default_site")]
    pub site: String,
    /// Full per-site profile supplied from the config file.
    #[serde(default)]
    pub custom_profile: Option<SiteProfile>,
    /// Override just the detail-URL pattern of the selected profile.
    #[serde(default)]
    pub detail_url_pattern: Option<String>,
    #[serde(default = "default_out_prefix")]
    pub out_prefix: String,
    /// Also write the per-property min/max rollup tables.
    #[serde(default)]
    pub aggregate: bool,
    /// "webdriver" for JavaScript-rendered sites, "static" for plain HTTP.
    #[serde(default = "default_renderer")]
    pub renderer: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_renderer_sessions")]
    pub renderer_sessions: usize,
    #[serde(default = "default_render_timeout_secs")]
    pub render_timeout_secs: u64,
    /// Extra settle time after the wait condition is met, for late JS.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_request_jitter_ms")]
    pub request_jitter_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_scrolls")]
    pub max_scrolls: usize,
    #[serde(default = "default_min_new_per_round")]
    pub min_new_per_round: usize,
    #[serde(default = "default_stagnation_rounds")]
    pub stagnation_rounds: usize,
    #[serde(default = "default_scroll_delay_ms")]
    pub scroll_delay_ms: u64,
    #[serde(default = "default_scroll_jitter_ms")]
    pub scroll_jitter_ms: u64,
    /// Wall-clock budget for the whole run; exceeded means stop early and
    /// keep what was collected.
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    /// Cap on discovered detail URLs.
    #[serde(default)]
    pub max_urls: Option<usize>,
    /// Browser-exported cookie JSON for the static renderer.
    #[serde(default)]
    pub cookies_file: Option<String>,
}

fn default_site() -> String {
    "apartments".to_string()
}

fn default_out_prefix() -> String {
    "data/listings".to_string()
}

fn default_renderer() -> String {
    "webdriver".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_renderer_sessions() -> usize {
    1
}

fn default_render_timeout_secs() -> u64 {
    20
}

fn default_settle_ms() -> u64 {
    500
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_request_delay_ms() -> u64 {
    2000 // 2 seconds between requests to the same host
}

fn default_request_jitter_ms() -> u64 {
    500
}

fn default_max_pages() -> usize {
    30
}

fn default_max_scrolls() -> usize {
    40
}

fn default_min_new_per_round() -> usize {
    2
}

fn default_stagnation_rounds() -> usize {
    4
}

fn default_scroll_delay_ms() -> u64 {
    1000
}

fn default_scroll_jitter_ms() -> u64 {
    800
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "data/config.yaml";

        let mut config: Config = if let Ok(config_str) = fs::read_to_string(config_path) {
            serde_yaml::from_str(&config_str)
                .with_context(|| format!("failed to parse {}", config_path))?
        } else {
            Config {
                start_urls: vec![],
                site: default_site(),
                custom_profile: None,
                detail_url_pattern: None,
                out_prefix: default_out_prefix(),
                aggregate: false,
                renderer: default_renderer(),
                webdriver_url: default_webdriver_url(),
                headless: default_headless(),
                renderer_sessions: default_renderer_sessions(),
                render_timeout_secs: default_render_timeout_secs(),
                settle_ms: default_settle_ms(),
                tracing_level: default_tracing_level(),
                user_agent: default_user_agent(),
                request_delay_ms: default_request_delay_ms(),
                request_jitter_ms: default_request_jitter_ms(),
                max_pages: default_max_pages(),
                max_scrolls: default_max_scrolls(),
                min_new_per_round: default_min_new_per_round(),
                stagnation_rounds: default_stagnation_rounds(),
                scroll_delay_ms: default_scroll_delay_ms(),
                scroll_jitter_ms: default_scroll_jitter_ms(),
                max_runtime_secs: None,
                max_urls: None,
                cookies_file: None,
            }
        };

        // Override with environment variables if present
        if let Ok(start_urls) = env::var("START_URLS") {
            // Parse comma-separated start URLs
            config.start_urls = start_urls
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(site) = env::var("SITE") {
            config.site = site;
        }

        if let Ok(out_prefix) = env::var("OUT_PREFIX") {
            config.out_prefix = out_prefix;
        }

        if let Ok(renderer) = env::var("RENDERER") {
            config.renderer = renderer;
        }

        if let Ok(webdriver_url) = env::var("WEBDRIVER_URL") {
            config.webdriver_url = webdriver_url;
        }

        if let Ok(tracing_level) = env::var("TRACING_LEVEL") {
            config.tracing_level = tracing_level;
        }

        if let Ok(user_agent) = env::var("USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Ok(request_delay) = env::var("REQUEST_DELAY_MS") {
            config.request_delay_ms = request_delay
                .parse()
                .context("Failed to parse REQUEST_DELAY_MS environment variable")?;
        }

        if let Ok(sessions) = env::var("RENDERER_SESSIONS") {
            config.renderer_sessions = sessions
                .parse()
                .context("Failed to parse RENDERER_SESSIONS environment variable")?;
        }

        if let Ok(max_pages) = env::var("MAX_PAGES") {
            config.max_pages = max_pages
                .parse()
                .context("Failed to parse MAX_PAGES environment variable")?;
        }

        if let Ok(max_urls) = env::var("MAX_URLS") {
            config.max_urls = Some(
                max_urls
                    .parse()
                    .context("Failed to parse MAX_URLS environment variable")?,
            );
        }

        if let Ok(max_runtime) = env::var("MAX_RUNTIME_SECS") {
            config.max_runtime_secs = Some(
                max_runtime
                    .parse()
                    .context("Failed to parse MAX_RUNTIME_SECS environment variable")?,
            );
        }

        // Validate required fields
        if config.start_urls.is_empty() {
            anyhow::bail!(
                "At least one start URL is required (set via data/config.yaml or START_URLS env var)"
            );
        }

        if config.renderer != "webdriver" && config.renderer != "static" {
            anyhow::bail!(
                "renderer must be 'webdriver' or 'static', got '{}'",
                config.renderer
            );
        }

        if config.renderer_sessions == 0 {
            anyhow::bail!("renderer_sessions must be at least 1");
        }

        Ok(config)
    }

    pub fn create_default() -> Result<()> {
        std::fs::create_dir_all("data")?;

        let default_config = Config {
            start_urls: vec!["https://www.apartments.com/boston-ma/".to_string()],
            site: default_site(),
            custom_profile: None,
            detail_url_pattern: None,
            out_prefix: default_out_prefix(),
            aggregate: true,
            renderer: default_renderer(),
            webdriver_url: default_webdriver_url(),
            headless: default_headless(),
            renderer_sessions: default_renderer_sessions(),
            render_timeout_secs: default_render_timeout_secs(),
            settle_ms: default_settle_ms(),
            tracing_level: "info".to_string(),
            user_agent: default_user_agent(),
            request_delay_ms: default_request_delay_ms(),
            request_jitter_ms: default_request_jitter_ms(),
            max_pages: default_max_pages(),
            max_scrolls: default_max_scrolls(),
            min_new_per_round: default_min_new_per_round(),
            stagnation_rounds: default_stagnation_rounds(),
            scroll_delay_ms: default_scroll_delay_ms(),
            scroll_jitter_ms: default_scroll_jitter_ms(),
            max_runtime_secs: None,
            max_urls: None,
            cookies_file: None,
        };

        let config_str = serde_yaml::to_string(&default_config)?;
        fs::write("data/config.yaml", config_str)?;
        Ok(())
    }

    /// The site profile this run extracts with: the custom profile when one
    /// is configured, else the named built-in, with the detail-URL pattern
    /// override applied on top. An unknown site name or a pattern that does
    /// not compile is fatal at startup.
    pub fn resolve_profile(&self) -> Result<SiteProfile> {
        let mut profile = match &self.custom_profile {
            Some(profile) => profile.clone(),
            None => SiteProfile::builtin(&self.site).with_context(|| {
                format!(
                    "unknown site '{}' (built-ins: apartments, bostonpads; or supply custom_profile)",
                    self.site
                )
            })?,
        };

        if let Some(pattern) = &self.detail_url_pattern {
            profile.detail_url_pattern = pattern.clone();
        }
        profile.detail_regex()?;

        Ok(profile)
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            max_pages: self.max_pages,
            max_scrolls: self.max_scrolls,
            min_new_per_round: self.min_new_per_round,
            stagnation_rounds: self.stagnation_rounds,
            scroll_delay_ms: self.scroll_delay_ms,
            scroll_jitter_ms: self.scroll_jitter_ms,
            render_timeout: Duration::from_secs(self.render_timeout_secs),
        }
    }
}
