//! Pure text-to-number normalizers for listing fields.
//!
//! All parsers are total: any input yields `Some(value)` or `None`, never an
//! error. Listing sites disagree wildly on formatting, so each parser works
//! through a small ordered set of patterns and gives up quietly.

use regex::Regex;

/// Parse a price cell into a single dollar amount.
///
/// Handles "$2,345", "$2,345+", "$2,345/mo", and ranges like
/// "$2,100 - $2,600" or "2100 to 2600" (ranges resolve to their midpoint).
pub fn parse_price(text: &str) -> Option<f64> {
    if text.trim().is_empty() {
        return None;
    }

    // Normalize range separators so one pattern covers "to" and en/em dashes
    let normalized = text
        .replace(" to ", " - ")
        .replace('\u{2013}', "-")
        .replace('\u{2014}', "-");

    let range = Regex::new(r"\$?\s*(\d[\d,]*(?:\.\d+)?)\s*-\s*\$?\s*(\d[\d,]*(?:\.\d+)?)").ok()?;
    if let Some(caps) = range.captures(&normalized) {
        let a = caps[1].replace(',', "").parse::<f64>().ok()?;
        let b = caps[2].replace(',', "").parse::<f64>().ok()?;
        return Some((a + b) / 2.0);
    }

    let single = Regex::new(r"\$\s*(\d[\d,]*(?:\.\d+)?)").ok()?;
    single
        .captures(&normalized)
        .and_then(|caps| caps[1].replace(',', "").parse::<f64>().ok())
}

/// Parse a bed count from details text like "2 Beds", "Studio", "1-2 Beds".
///
/// "Studio" always wins, even when numeric text co-occurs. Ranges resolve to
/// their lower bound.
pub fn parse_beds(text: &str) -> Option<f64> {
    if text.trim().is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    if lower.contains("studio") {
        return Some(0.0);
    }

    let range = Regex::new(r"(\d+(?:\.\d+)?)\s*-\s*\d+(?:\.\d+)?\s*(?:bedrooms?|beds?|bd|br)\b")
        .ok()?;
    if let Some(caps) = range.captures(&lower) {
        return caps[1].parse().ok();
    }

    let single = Regex::new(r"(\d+(?:\.\d+)?)\s*(?:bedrooms?|beds?|bd|br)\b").ok()?;
    single.captures(&lower).and_then(|caps| caps[1].parse().ok())
}

/// Parse a bath count. Same shape as [`parse_beds`] minus the studio rule;
/// half baths ("1.5 Baths") come through as fractions.
pub fn parse_baths(text: &str) -> Option<f64> {
    if text.trim().is_empty() {
        return None;
    }
    let lower = text.to_lowercase();

    let range = Regex::new(r"(\d+(?:\.\d+)?)\s*-\s*\d+(?:\.\d+)?\s*(?:bathrooms?|baths?|ba)\b")
        .ok()?;
    if let Some(caps) = range.captures(&lower) {
        return caps[1].parse().ok();
    }

    let single = Regex::new(r"(\d+(?:\.\d+)?)\s*(?:bathrooms?|baths?|ba)\b").ok()?;
    single.captures(&lower).and_then(|caps| caps[1].parse().ok())
}

/// Parse square footage from text like "750 Sq Ft" or "1,050 sq. ft.".
///
/// Falls back to a bare 3-5 digit number filling the whole cell, which is how
/// sqft-labeled grid columns sometimes come through. Zero is treated as
/// unparseable.
pub fn parse_sqft(text: &str) -> Option<u32> {
    if text.trim().is_empty() {
        return None;
    }

    let labeled =
        Regex::new(r"(?i)(\d[\d,]*)\s*(?:sq\s*\.?\s*ft\.?|sf\b|ft2|ft²|square\s*feet)").ok()?;
    if let Some(caps) = labeled.captures(text) {
        return parse_positive_int(&caps[1]);
    }

    let bare = text.trim().replace(',', "");
    if (3..=5).contains(&bare.len()) && bare.chars().all(|c| c.is_ascii_digit()) {
        return parse_positive_int(&bare);
    }

    None
}

fn parse_positive_int(digits: &str) -> Option<u32> {
    digits
        .replace(',', "")
        .parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
}
