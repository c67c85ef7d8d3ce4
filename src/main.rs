mod aggregate;
mod amenities;
mod config;
mod discovery;
mod export;
mod extract;
mod http_client;
mod models;
mod normalize;
mod profiles;
mod renderer;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use std::sync::Arc;
use std::time::Duration;

use amenities::{FixedTaxonomy, OneHotEncoder};
use discovery::DiscoveryEngine;
use models::RunSummary;
use profiles::SiteProfile;
use renderer::{Renderer, RendererPool, RunBudget, StaticRenderer, Throttle, WebDriverRenderer};

#[derive(Parser, Debug)]
#[command(name = "rentgrid")]
#[command(about = "Scrapes rental listing sites into a flat feature table", long_about = None)]
struct Args {
    /// Parse a saved HTML file and print the extracted records
    #[arg(long)]
    parse_file: Option<String>,

    /// Source URL to attribute records to when using --parse-file
    #[arg(long)]
    url: Option<String>,

    /// Override the configured site profile
    #[arg(long)]
    site: Option<String>,

    /// Override the configured start URLs (repeatable)
    #[arg(long)]
    start_url: Vec<String>,

    /// Override the configured output file prefix
    #[arg(long)]
    out_prefix: Option<String>,

    /// Also write the per-property rollup tables
    #[arg(long)]
    aggregate: bool,

    /// Stop discovery once this many detail URLs are collected
    #[arg(long)]
    max_urls: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle parse-file command; it works without a full config
    if let Some(path) = args.parse_file {
        return parse_local_file(&path, args.url.as_deref(), args.site.as_deref());
    }

    // Load or create config first (before logging is initialized)
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(_) => {
            eprintln!("No config file found, creating default data/config.yaml");
            Config::create_default()?;
            eprintln!("Please edit data/config.yaml with your start URLs and site profile");
            return Ok(());
        }
    };

    // Operational overrides from the command line
    if let Some(site) = args.site {
        config.site = site;
    }
    if !args.start_url.is_empty() {
        config.start_urls = args.start_url;
    }
    if let Some(out_prefix) = args.out_prefix {
        config.out_prefix = out_prefix;
    }
    if args.aggregate {
        config.aggregate = true;
    }
    if let Some(max_urls) = args.max_urls {
        config.max_urls = Some(max_urls);
    }

    // Initialize logging - use RUST_LOG env var if set, otherwise use config
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
        tracing::info!("Logging level set from RUST_LOG environment variable");
    } else {
        let level = config.tracing_level.to_lowercase();
        let env_filter = match level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => {
                eprintln!("Invalid tracing level '{}', using 'info'", level);
                tracing::Level::INFO
            }
        };

        tracing_subscriber::fmt().with_max_level(env_filter).init();

        tracing::info!("Logging level set to: {} (from data/config.yaml)", level);
    }

    run_pipeline(config).await
}

async fn run_pipeline(config: Config) -> Result<()> {
    // Failure to obtain any renderer session is fatal; everything after this
    // degrades per URL instead
    let pool = Arc::new(
        build_renderer_pool(&config)
            .await
            .context("failed to obtain a renderer session")?,
    );

    let outcome = run_stages(&config, pool.clone()).await;
    pool.shutdown().await;
    outcome
}

async fn run_stages(config: &Config, pool: Arc<RendererPool>) -> Result<()> {
    let profile = Arc::new(config.resolve_profile()?);
    let taxonomy = Arc::new(FixedTaxonomy::new());
    let throttle = Arc::new(Throttle::new(
        config.request_delay_ms,
        config.request_jitter_ms,
    ));
    let budget = Arc::new(RunBudget::new(config.max_runtime_secs, config.max_urls));
    let mut summary = RunSummary::new();

    tracing::info!(
        "Starting rentgrid: site '{}', {} start URL(s), {} renderer session(s)",
        profile.name,
        config.start_urls.len(),
        pool.size()
    );

    let mut engine = DiscoveryEngine::new(profile.detail_regex()?, config.discovery_settings());
    {
        let mut lease = pool.acquire().await?;
        for start_url in &config.start_urls {
            engine
                .run(lease.renderer(), &throttle, &budget, start_url)
                .await?;
        }
    }
    let urls = engine.detail_urls();
    summary.pages_visited = engine.pages_visited();
    summary.urls_discovered = urls.len();

    let (records, skipped) = extract::extract_all(
        pool,
        throttle,
        budget,
        urls,
        profile,
        taxonomy,
        Duration::from_secs(config.render_timeout_secs),
    )
    .await;
    summary.documents_extracted = summary.urls_discovered - skipped.len();
    summary.records_emitted = records.len();
    summary.skipped = skipped;

    // The one-hot columns are shared across the whole table, so the label
    // universe must be complete before any record is encoded
    let encoder = OneHotEncoder::build(
        records
            .iter()
            .flat_map(|r| r.amenity_labels.iter().map(String::as_str)),
    );
    summary.labels_discovered = encoder.columns().len();
    summary.label_collisions = encoder.collisions().len();

    let table = export::per_unit_table(&records, &encoder);
    export::write_csv(&table, &format!("{}.csv", config.out_prefix))?;
    export::write_xlsx(&table, &format!("{}.xlsx", config.out_prefix))?;

    if config.aggregate {
        let aggregates = aggregate::aggregate_by_property(&records);
        tracing::info!(
            "Rolled {} records up into {} properties",
            records.len(),
            aggregates.len()
        );
        let agg_table = export::aggregated_table(&aggregates, &encoder);
        export::write_csv(&agg_table, &format!("{}_aggregated.csv", config.out_prefix))?;
        export::write_xlsx(&agg_table, &format!("{}_aggregated.xlsx", config.out_prefix))?;
    }

    summary.finish();
    println!("{}", summary.render_report());

    Ok(())
}

async fn build_renderer_pool(config: &Config) -> Result<RendererPool> {
    let mut renderers: Vec<Box<dyn Renderer>> = Vec::new();
    for _ in 0..config.renderer_sessions {
        match config.renderer.as_str() {
            "static" => {
                let renderer = StaticRenderer::new(&config.user_agent)?;
                if let Some(cookie_path) = &config.cookies_file {
                    if std::path::Path::new(cookie_path).exists() {
                        let site_url = config
                            .start_urls
                            .first()
                            .map(String::as_str)
                            .unwrap_or("https://localhost/");
                        match renderer.load_cookies_from_file(cookie_path, site_url) {
                            Ok(_) => {
                                tracing::info!("Successfully loaded cookies from {}", cookie_path)
                            }
                            Err(e) => tracing::warn!(
                                "Failed to load cookies from {}: {}",
                                cookie_path,
                                e
                            ),
                        }
                    } else {
                        tracing::info!(
                            "No {} file found. You can export cookies from your browser to avoid captchas.",
                            cookie_path
                        );
                    }
                }
                renderers.push(Box::new(renderer));
            }
            _ => {
                let renderer = WebDriverRenderer::connect(
                    &config.webdriver_url,
                    &config.user_agent,
                    config.headless,
                    Duration::from_millis(config.settle_ms),
                )
                .await?;
                renderers.push(Box::new(renderer));
            }
        }
    }
    Ok(RendererPool::new(renderers))
}

/// Parse a saved HTML file through the extractor and print the records
fn parse_local_file(path: &str, url: Option<&str>, site: Option<&str>) -> Result<()> {
    println!("Parsing file: {}", path);
    println!("{}", "=".repeat(80));

    // Try to load config for the profile, otherwise fall back to built-ins
    let profile = match site {
        Some(name) => SiteProfile::builtin(name)
            .with_context(|| format!("unknown site '{}' (built-ins: apartments, bostonpads)", name))?,
        None => match Config::load() {
            Ok(cfg) => cfg.resolve_profile()?,
            Err(_) => SiteProfile::apartments(),
        },
    };
    println!("Site profile: {}", profile.name);

    let html =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    let source_url = url
        .map(str::to_string)
        .unwrap_or_else(|| format!("file://{}", path));

    let taxonomy = FixedTaxonomy::new();
    let records = extract::extract_document(&html, &source_url, &profile, &taxonomy);

    println!("Extracted {} record(s)", records.len());
    println!("{}", "=".repeat(80));

    for (i, record) in records.iter().enumerate() {
        println!("\nRecord #{}", i + 1);
        println!("URL: {}", record.source_url);
        println!("Price: {:?}", record.price);
        println!("Beds: {:?}", record.beds);
        println!("Baths: {:?}", record.baths);
        println!("Sqft: {:?}", record.sqft);
        if let Some(amenities) = &record.amenities_raw {
            println!("Amenities: {}", amenities);
        }
        if !record.amenity_labels.is_empty() {
            println!("Labels: {:?}", record.amenity_labels);
        }
        if let Some(rent) = &record.raw.rent {
            println!("Rent text: {}", rent);
        }
        if let Some(details) = &record.raw.details {
            println!("Details text: {}", details);
        }
        println!("{}", "-".repeat(80));
    }

    if records.len() == 1 && !records[0].has_numeric_fields() {
        println!("No floorplan rows found. This might mean:");
        println!("  - The profile selectors need updating");
        println!("  - The website structure has changed");
        println!("  - The page is a search page, not a detail page");
    }

    Ok(())
}
