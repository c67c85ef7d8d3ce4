//! Document extraction: one rendered page in, zero-or-more listing records
//! out.
//!
//! `extract_document` is pure over the HTML string so it can be tested (and
//! re-run) without a renderer. The async driver at the bottom fans URLs out
//! over the renderer pool and reassembles results in input order.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::amenities::FixedTaxonomy;
use crate::models::{ListingRecord, RawFields, SkippedUrl};
use crate::normalize::{parse_baths, parse_beds, parse_price, parse_sqft};
use crate::profiles::{document_text, element_text, SiteProfile};
use crate::renderer::{RendererPool, RunBudget, Throttle};

/// Extract every floorplan row from a rendered detail page.
///
/// When no floorplan rows are found, exactly one record is still emitted so
/// page-level amenities are not lost.
pub fn extract_document(
    html: &str,
    url: &str,
    profile: &SiteProfile,
    taxonomy: &FixedTaxonomy,
) -> Vec<ListingRecord> {
    let doc = Html::parse_document(html);

    let title = profile.title.resolve(&doc);
    let description = profile.description.resolve(&doc);
    let meta = profile.meta.resolve(&doc);

    let amenity_labels = collect_amenity_labels(&doc, profile);
    let blob = assemble_blob(&doc, profile, &amenity_labels, &title, &description, &meta);
    let fixed_flags = taxonomy.classify(&blob);
    let amenities_raw = fixed_flags.summary();
    let amenities_list_raw = if amenity_labels.is_empty() {
        None
    } else {
        Some(amenity_labels.join("; "))
    };

    let mut records: Vec<ListingRecord> = Vec::new();
    let mut seen_raw: HashSet<(String, String, String, String)> = HashSet::new();

    let cells = Selector::parse(&profile.row_cell_selector()).ok();
    if let Some(cells) = cells {
        for det in first_matching_selection(&doc, &profile.details_selectors) {
            let Some(row) = find_row_container(det, &cells) else {
                tracing::trace!("no row container within ancestor bound, skipping anchor");
                continue;
            };

            let rent_raw = first_text_in(&row, &profile.rent_selectors);
            let pricing_raw = first_text_in(&row, &profile.pricing_selectors);
            let sqft_raw = first_text_in(&row, &profile.sqft_selectors);
            let details = element_text(&det);

            let signature = (
                rent_raw.clone().unwrap_or_default(),
                details.clone(),
                pricing_raw.clone().unwrap_or_default(),
                sqft_raw.clone().unwrap_or_default(),
            );
            if !seen_raw.insert(signature) {
                continue;
            }

            let price = rent_raw
                .as_deref()
                .and_then(parse_price)
                .or_else(|| pricing_raw.as_deref().and_then(parse_price));
            let beds = parse_beds(&details);
            let baths = parse_baths(&details);
            let sqft = sqft_raw
                .as_deref()
                .and_then(parse_sqft)
                .or_else(|| parse_sqft(&details));

            records.push(ListingRecord {
                source_url: url.to_string(),
                price,
                beds,
                baths,
                sqft,
                fixed_flags: fixed_flags.clone(),
                amenities_raw: amenities_raw.clone(),
                amenity_labels: amenity_labels.clone(),
                raw: RawFields {
                    rent: rent_raw,
                    details: Some(details).filter(|s| !s.is_empty()),
                    pricing: pricing_raw,
                    sqft: sqft_raw,
                    amenities: amenities_list_raw.clone(),
                },
            });
        }
    }

    // Rows that parse to the same numeric quad describe the same floorplan
    let mut seen_parsed = HashSet::new();
    records.retain(|r| seen_parsed.insert(r.parsed_signature()));

    if records.is_empty() {
        records.push(page_level_record(
            &doc,
            url,
            profile,
            taxonomy,
            &blob,
            &amenity_labels,
            amenities_list_raw,
            &title,
            &description,
            &meta,
        ));
    }

    records
}

/// Single-record fallback for pages without a floorplan grid. Numeric fields
/// resolve through the profile's page-level chains when it has any (the
/// single-listing site family); otherwise they stay null.
#[allow(clippy::too_many_arguments)]
fn page_level_record(
    doc: &Html,
    url: &str,
    profile: &SiteProfile,
    taxonomy: &FixedTaxonomy,
    blob: &str,
    amenity_labels: &[String],
    amenities_list_raw: Option<String>,
    title: &Option<String>,
    description: &Option<String>,
    meta: &Option<String>,
) -> ListingRecord {
    let page_price = profile.page_price.resolve(doc);
    let page_beds = profile.page_beds.resolve(doc);
    let page_baths = profile.page_baths.resolve(doc);
    let page_mode =
        page_price.is_some() || page_beds.is_some() || page_baths.is_some() || has_page_chains(profile);

    let (price, beds, baths, sqft) = if page_mode {
        let body = document_text(doc);
        let price = page_price.as_deref().and_then(parse_price);
        let beds = page_beds
            .as_deref()
            .and_then(parse_beds)
            .or_else(|| meta.as_deref().and_then(parse_beds))
            .or_else(|| title.as_deref().and_then(parse_beds))
            .or_else(|| parse_beds(&body));
        let baths = page_baths
            .as_deref()
            .and_then(parse_baths)
            .or_else(|| meta.as_deref().and_then(parse_baths))
            .or_else(|| title.as_deref().and_then(parse_baths))
            .or_else(|| parse_baths(&body));
        let sqft_source = [meta.as_deref(), title.as_deref(), description.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" | ");
        let sqft = parse_sqft(&sqft_source);
        (price, beds, baths, sqft)
    } else {
        (None, None, None, None)
    };

    let fixed_flags = taxonomy.classify(blob);
    let amenities_raw = fixed_flags.summary();

    ListingRecord {
        source_url: url.to_string(),
        price,
        beds,
        baths,
        sqft,
        fixed_flags,
        amenities_raw,
        amenity_labels: amenity_labels.to_vec(),
        raw: RawFields {
            rent: page_price,
            details: page_beds,
            pricing: None,
            sqft: None,
            amenities: amenities_list_raw,
        },
    }
}

fn has_page_chains(profile: &SiteProfile) -> bool {
    use crate::profiles::FieldStrategy;
    [&profile.page_price, &profile.page_beds, &profile.page_baths]
        .iter()
        .any(|s| match s {
            FieldStrategy::SelectorChain { selectors } => !selectors.is_empty(),
            FieldStrategy::StructuredList { selectors } => !selectors.is_empty(),
            FieldStrategy::RegexBlob { .. } => true,
        })
}

/// First selector in the chain that matches anything wins; its matches are
/// the floorplan anchors.
fn first_matching_selection<'a>(doc: &'a Html, selectors: &[String]) -> Vec<ElementRef<'a>> {
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            tracing::debug!("ignoring unparseable selector '{}'", sel);
            continue;
        };
        let matched: Vec<ElementRef> = doc.select(&selector).collect();
        if !matched.is_empty() {
            tracing::debug!("selector '{}' matched {} floorplan anchors", sel, matched.len());
            return matched;
        }
    }
    Vec::new()
}

/// Walk up at most four ancestor levels looking for the nearest `tr`/`div`
/// that also holds sibling floorplan cells.
fn find_row_container<'a>(anchor: ElementRef<'a>, cells: &Selector) -> Option<ElementRef<'a>> {
    let mut current = Some(anchor);
    for _ in 0..4 {
        let node = current?;
        let name = node.value().name();
        if (name == "tr" || name == "div") && node.select(cells).next().is_some() {
            return Some(node);
        }
        current = node.parent().and_then(ElementRef::wrap);
    }
    None
}

fn first_text_in(row: &ElementRef, selectors: &[String]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        row.select(&selector)
            .map(|el| element_text(&el))
            .find(|t| !t.is_empty())
    })
}

/// Exact structured amenity labels, deduplicated in first-seen order.
fn collect_amenity_labels(doc: &Html, profile: &SiteProfile) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut push = |text: String| {
        if !text.is_empty() && !labels.contains(&text) {
            labels.push(text);
        }
    };

    let li = match Selector::parse("li") {
        Ok(s) => s,
        Err(_) => return labels,
    };

    // Explicit amenity section containers
    for sel in &profile.amenity_section_selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        for section in doc.select(&selector) {
            for item in section.select(&li) {
                push(element_text(&item));
            }
        }
    }

    // Headings whose text marks an amenity list
    if !profile.amenity_heading_keywords.is_empty() {
        for tag in ["h2", "h3", "h4"] {
            let Ok(selector) = Selector::parse(tag) else {
                continue;
            };
            for heading in doc.select(&selector) {
                let heading_text = element_text(&heading).to_lowercase();
                if !profile
                    .amenity_heading_keywords
                    .iter()
                    .any(|kw| heading_text.contains(&kw.to_lowercase()))
                {
                    continue;
                }
                let Some(parent) = heading.parent().and_then(ElementRef::wrap) else {
                    continue;
                };
                for item in parent.select(&li) {
                    let text = element_text(&item);
                    let lower = text.to_lowercase();
                    if profile
                        .amenity_heading_keywords
                        .iter()
                        .any(|kw| lower.contains(&kw.to_lowercase()))
                    {
                        continue;
                    }
                    push(text);
                }
            }
        }
    }

    // Direct item elements (chip-style markup)
    for item in profile.amenity_items.resolve_list(doc) {
        push(item);
    }

    labels
}

/// One text blob per document for the fixed-keyword classifier.
fn assemble_blob(
    doc: &Html,
    profile: &SiteProfile,
    labels: &[String],
    title: &Option<String>,
    description: &Option<String>,
    meta: &Option<String>,
) -> String {
    let mut chunks: Vec<String> = Vec::new();
    chunks.extend(labels.iter().cloned());
    for field in [title, meta, description].into_iter().flatten() {
        chunks.push(field.clone());
    }
    for sel in &profile.blob_selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        for el in doc.select(&selector) {
            let text = element_text(&el);
            if text.len() > 8 {
                chunks.push(text);
            }
        }
    }
    chunks.join(" | ")
}

/// Render and extract a batch of detail URLs over the renderer pool.
///
/// Concurrency is bounded by pool size; results come back in input order so
/// the output table is deterministic. Per-URL failures are collected, never
/// fatal.
pub async fn extract_all(
    pool: Arc<RendererPool>,
    throttle: Arc<Throttle>,
    budget: Arc<RunBudget>,
    urls: Vec<String>,
    profile: Arc<SiteProfile>,
    taxonomy: Arc<FixedTaxonomy>,
    render_timeout: Duration,
) -> (Vec<ListingRecord>, Vec<SkippedUrl>) {
    let wait_css = profile.wait_selector();
    let total = urls.len();
    let mut tasks: JoinSet<(usize, String, Result<Vec<ListingRecord>, String>)> = JoinSet::new();

    for (index, url) in urls.into_iter().enumerate() {
        let pool = pool.clone();
        let throttle = throttle.clone();
        let budget = budget.clone();
        let profile = profile.clone();
        let taxonomy = taxonomy.clone();
        let wait_css = wait_css.clone();

        tasks.spawn(async move {
            let mut lease = match pool.acquire().await {
                Ok(lease) => lease,
                Err(e) => return (index, url, Err(format!("{:#}", e))),
            };
            if budget.time_exhausted() {
                return (index, url, Err("run budget exhausted".to_string()));
            }
            throttle.wait(&url).await;

            tracing::debug!("[{}/{}] rendering {}", index + 1, total, url);
            match lease
                .renderer()
                .render(&url, wait_css.as_deref(), render_timeout)
                .await
            {
                Ok(html) => {
                    let records = extract_document(&html, &url, &profile, &taxonomy);
                    tracing::info!("[{}/{}] rows+={} <- {}", index + 1, total, records.len(), url);
                    (index, url, Ok(records))
                }
                Err(e) => (index, url, Err(format!("{:#}", e))),
            }
        });
    }

    let mut finished: Vec<(usize, String, Result<Vec<ListingRecord>, String>)> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => finished.push(result),
            Err(e) => tracing::error!("extraction task failed: {}", e),
        }
    }
    finished.sort_by_key(|(index, _, _)| *index);

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for (_, url, outcome) in finished {
        match outcome {
            Ok(mut rows) => records.append(&mut rows),
            Err(reason) => {
                tracing::warn!("skipping {}: {}", url, reason);
                skipped.push(SkippedUrl { url, reason });
            }
        }
    }
    (records, skipped)
}
