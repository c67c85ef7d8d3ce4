//! Per-site locator taxonomy.
//!
//! Listing sites share one pipeline but disagree on markup, so everything
//! site-specific lives in a [`SiteProfile`]: the detail-page URL pattern,
//! ordered selector fallback chains for each field, and the amenity-section
//! heuristics. Two profiles ship built in; a custom profile can be supplied
//! whole from the config file.

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// How to pull one logical field out of a rendered document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FieldStrategy {
    /// Ordered CSS selector chain; the first selector yielding non-empty
    /// text wins.
    SelectorChain { selectors: Vec<String> },
    /// Regex over the document's whole text; capture group 1 if present,
    /// else the full match.
    RegexBlob { pattern: String },
    /// Every element matched by any of the selectors contributes one item.
    StructuredList { selectors: Vec<String> },
}

impl FieldStrategy {
    pub fn chain<S: Into<String>>(selectors: impl IntoIterator<Item = S>) -> Self {
        FieldStrategy::SelectorChain {
            selectors: selectors.into_iter().map(Into::into).collect(),
        }
    }

    pub fn items<S: Into<String>>(selectors: impl IntoIterator<Item = S>) -> Self {
        FieldStrategy::StructuredList {
            selectors: selectors.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve to a single text value, or `None` when nothing matches.
    pub fn resolve(&self, doc: &Html) -> Option<String> {
        match self {
            FieldStrategy::SelectorChain { selectors } => selectors.iter().find_map(|sel| {
                let selector = Selector::parse(sel).ok()?;
                doc.select(&selector)
                    .map(|el| element_text(&el))
                    .find(|t| !t.is_empty())
            }),
            FieldStrategy::RegexBlob { pattern } => {
                let re = Regex::new(pattern).ok()?;
                let text = document_text(doc);
                re.captures(&text).map(|caps| {
                    caps.get(1)
                        .unwrap_or_else(|| caps.get(0).expect("regex match has group 0"))
                        .as_str()
                        .trim()
                        .to_string()
                })
            }
            FieldStrategy::StructuredList { .. } => {
                let items = self.resolve_list(doc);
                if items.is_empty() {
                    None
                } else {
                    Some(items.join(" | "))
                }
            }
        }
    }

    /// Resolve to a list of items, deduplicated in first-seen order.
    pub fn resolve_list(&self, doc: &Html) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |text: String| {
            if !text.is_empty() && !out.contains(&text) {
                out.push(text);
            }
        };
        match self {
            FieldStrategy::SelectorChain { selectors } => {
                for sel in selectors {
                    let Ok(selector) = Selector::parse(sel) else {
                        continue;
                    };
                    let matched: Vec<String> =
                        doc.select(&selector).map(|el| element_text(&el)).collect();
                    if matched.iter().any(|t| !t.is_empty()) {
                        matched.into_iter().for_each(&mut push);
                        break;
                    }
                }
            }
            FieldStrategy::RegexBlob { pattern } => {
                if let Ok(re) = Regex::new(pattern) {
                    let text = document_text(doc);
                    for caps in re.captures_iter(&text) {
                        let m = caps
                            .get(1)
                            .unwrap_or_else(|| caps.get(0).expect("regex match has group 0"));
                        push(m.as_str().trim().to_string());
                    }
                }
            }
            FieldStrategy::StructuredList { selectors } => {
                for sel in selectors {
                    let Ok(selector) = Selector::parse(sel) else {
                        continue;
                    };
                    for el in doc.select(&selector) {
                        push(element_text(&el));
                    }
                }
            }
        }
        out
    }
}

/// Everything the pipeline needs to know about one target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    /// Detail pages are the only URLs discovery emits.
    pub detail_url_pattern: String,
    /// Selectors whose presence signals the page content has rendered.
    #[serde(default)]
    pub wait_selectors: Vec<String>,
    /// Floorplan-row anchor cells (beds/baths text). Ordered fallback chain;
    /// the first selector matching anything wins.
    #[serde(default)]
    pub details_selectors: Vec<String>,
    #[serde(default)]
    pub rent_selectors: Vec<String>,
    #[serde(default)]
    pub pricing_selectors: Vec<String>,
    #[serde(default)]
    pub sqft_selectors: Vec<String>,
    #[serde(default = "default_title_strategy")]
    pub title: FieldStrategy,
    #[serde(default = "default_description_strategy")]
    pub description: FieldStrategy,
    #[serde(default = "default_meta_strategy")]
    pub meta: FieldStrategy,
    /// Page-level fallbacks for single-listing sites without floorplan grids.
    #[serde(default = "empty_chain")]
    pub page_price: FieldStrategy,
    #[serde(default = "empty_chain")]
    pub page_beds: FieldStrategy,
    #[serde(default = "empty_chain")]
    pub page_baths: FieldStrategy,
    /// Containers whose text feeds the fixed-keyword amenity blob.
    #[serde(default = "default_blob_selectors")]
    pub blob_selectors: Vec<String>,
    /// Explicit amenity sections; every `li` inside contributes a label.
    #[serde(default)]
    pub amenity_section_selectors: Vec<String>,
    /// Direct amenity item elements (sites without list sections).
    #[serde(default = "empty_items")]
    pub amenity_items: FieldStrategy,
    /// Heading texts that mark an amenity list (matched case-insensitively).
    #[serde(default)]
    pub amenity_heading_keywords: Vec<String>,
}

fn default_title_strategy() -> FieldStrategy {
    FieldStrategy::chain(["h1", "[class*='title']"])
}

fn default_description_strategy() -> FieldStrategy {
    FieldStrategy::chain(["[class*='description']"])
}

fn default_meta_strategy() -> FieldStrategy {
    FieldStrategy::chain(["address", "[itemprop='address']"])
}

fn default_blob_selectors() -> Vec<String> {
    to_strings([
        ".amenities",
        ".features",
        ".property-features",
        ".facts",
        ".details",
        ".property-details",
        "ul",
        "dl",
        "table",
    ])
}

fn empty_chain() -> FieldStrategy {
    FieldStrategy::chain(Vec::<String>::new())
}

fn empty_items() -> FieldStrategy {
    FieldStrategy::items(Vec::<String>::new())
}

fn to_strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SiteProfile {
    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<SiteProfile> {
        match name {
            "apartments" => Some(Self::apartments()),
            "bostonpads" => Some(Self::bostonpads()),
            _ => None,
        }
    }

    /// Apartments.com-style sites: a floorplan pricing grid per property and
    /// titled amenity sections.
    pub fn apartments() -> SiteProfile {
        SiteProfile {
            name: "apartments".to_string(),
            detail_url_pattern: r"^https?://(www\.)?apartments\.com/.+-boston-ma/[^/]+/?$"
                .to_string(),
            wait_selectors: to_strings([
                ".detailsLabel",
                ".pricingColumn",
                ".rentLabel",
                ".sqftColumn",
                "h1",
            ]),
            details_selectors: to_strings([".detailsLabel"]),
            rent_selectors: to_strings([".rentLabel"]),
            pricing_selectors: to_strings([".pricingColumn"]),
            sqft_selectors: to_strings([".unitLabel.sqftColumn", ".sqftColumn"]),
            title: FieldStrategy::chain([
                "h1",
                "[data-testid='propertyName']",
                "[class*='PropertyName']",
            ]),
            description: FieldStrategy::chain(["#descriptionSection", "[class*='description']"]),
            meta: FieldStrategy::chain([
                "[data-testid='property-address']",
                "[class*='Address']",
                "address",
                "[itemprop='address']",
            ]),
            page_price: empty_chain(),
            page_beds: empty_chain(),
            page_baths: empty_chain(),
            blob_selectors: default_blob_selectors(),
            amenity_section_selectors: to_strings([
                ".amenitiesSection.amenitiesSectionV2",
                ".amenitiesSection",
            ]),
            amenity_items: empty_items(),
            amenity_heading_keywords: to_strings(["community amenities", "apartment features"]),
        }
    }

    /// BostonPads-style sites: one listing per page, amenity chips instead of
    /// titled sections.
    pub fn bostonpads() -> SiteProfile {
        SiteProfile {
            name: "bostonpads".to_string(),
            detail_url_pattern: r"^https?://(www\.)?bostonpads\.com/(allston-ma-apartments|brighton-ma-apartments|boston-apartments)/.+?-\d+/?$".to_string(),
            wait_selectors: to_strings(["h1", ".price", ".bpo-price", ".address", ".bpo-address"]),
            details_selectors: Vec::new(),
            rent_selectors: Vec::new(),
            pricing_selectors: Vec::new(),
            sqft_selectors: Vec::new(),
            title: FieldStrategy::chain([
                "h1",
                ".listing-title",
                ".property-title",
                "[class*='bpo-title']",
            ]),
            description: FieldStrategy::chain([
                ".description",
                "#description",
                ".prop-description",
                ".listing-description",
                "[class*='description']",
            ]),
            meta: FieldStrategy::chain([
                ".listing-info",
                ".property-meta",
                ".beds-baths",
                ".detail-list",
                ".property-details",
                ".facts",
                "[class*='beds']",
            ]),
            page_price: FieldStrategy::chain([".price", ".listing-price", ".rent", ".bpo-price"]),
            page_beds: FieldStrategy::chain([".bpo-beds-text"]),
            page_baths: FieldStrategy::chain([".bpo-listing-bath"]),
            blob_selectors: default_blob_selectors(),
            amenity_section_selectors: Vec::new(),
            amenity_items: FieldStrategy::items([".bpo-amenity-element"]),
            amenity_heading_keywords: Vec::new(),
        }
    }

    pub fn detail_regex(&self) -> Result<Regex> {
        Regex::new(&self.detail_url_pattern).with_context(|| {
            format!(
                "invalid detail_url_pattern for site '{}': {}",
                self.name, self.detail_url_pattern
            )
        })
    }

    /// Combined selector for "this row holds floorplan cells" checks.
    pub fn row_cell_selector(&self) -> String {
        self.rent_selectors
            .iter()
            .chain(self.pricing_selectors.iter())
            .chain(self.sqft_selectors.iter())
            .chain(self.details_selectors.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Combined wait condition for the renderer, if any.
    pub fn wait_selector(&self) -> Option<String> {
        if self.wait_selectors.is_empty() {
            None
        } else {
            Some(self.wait_selectors.join(", "))
        }
    }
}

/// Element text with whitespace runs collapsed, like `get_text(" ", strip)`.
pub fn element_text(el: &ElementRef) -> String {
    squish(&el.text().collect::<String>())
}

/// Whole-document text, used by regex-blob strategies and last-resort parses.
pub fn document_text(doc: &Html) -> String {
    squish(&doc.root_element().text().collect::<String>())
}

pub fn squish(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
