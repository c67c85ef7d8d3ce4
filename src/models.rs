use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::amenities::FixedFlags;

/// Original cell text for one floorplan row, kept for auditability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawFields {
    pub rent: Option<String>,
    pub details: Option<String>,
    pub pricing: Option<String>,
    pub sqft: Option<String>,
    pub amenities: Option<String>,
}

/// One rentable unit/floorplan extracted from a detail page.
///
/// Records are immutable after extraction; the aggregator and the one-hot
/// encoder only read them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRecord {
    pub source_url: String,
    pub price: Option<f64>,
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    pub sqft: Option<u32>,
    /// Fixed-taxonomy amenity flags, matched against the page text blob.
    pub fixed_flags: FixedFlags,
    /// Sorted, comma-joined names of the matched fixed amenity keys.
    pub amenities_raw: Option<String>,
    /// Exact structured amenity labels, first-seen order, deduplicated.
    pub amenity_labels: Vec<String>,
    pub raw: RawFields,
}

impl ListingRecord {
    pub fn has_numeric_fields(&self) -> bool {
        self.price.is_some() || self.beds.is_some() || self.baths.is_some() || self.sqft.is_some()
    }

    /// Signature over the parsed numeric quad. Rows from the same document
    /// with identical signatures describe the same floorplan and collapse.
    pub fn parsed_signature(&self) -> (Option<u64>, Option<u64>, Option<u64>, Option<u32>) {
        (
            self.price.map(f64::to_bits),
            self.beds.map(f64::to_bits),
            self.baths.map(f64::to_bits),
            self.sqft,
        )
    }
}

/// Rollup of all ListingRecords sharing a source URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyAggregate {
    pub source_url: String,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_beds: Option<f64>,
    pub max_beds: Option<f64>,
    pub min_baths: Option<f64>,
    pub max_baths: Option<f64>,
    pub min_sqft: Option<u32>,
    pub max_sqft: Option<u32>,
    pub fixed_flags: FixedFlags,
    pub amenities_raw: Option<String>,
    pub amenity_labels: Vec<String>,
}

/// A detail URL the run gave up on, with the reason it was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedUrl {
    pub url: String,
    pub reason: String,
}

/// Counters reported at the end of a run instead of failing on partial data.
#[derive(Debug)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_visited: usize,
    pub urls_discovered: usize,
    pub documents_extracted: usize,
    pub skipped: Vec<SkippedUrl>,
    pub records_emitted: usize,
    pub labels_discovered: usize,
    pub label_collisions: usize,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            pages_visited: 0,
            urls_discovered: 0,
            documents_extracted: 0,
            skipped: Vec::new(),
            records_emitted: 0,
            labels_discovered: 0,
            label_collisions: 0,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{}\n", "=".repeat(80)));
        out.push_str("Run summary\n");
        out.push_str(&format!("  started:             {}\n", self.started_at));
        if let Some(finished) = self.finished_at {
            out.push_str(&format!("  finished:            {}\n", finished));
        }
        out.push_str(&format!("  pages visited:       {}\n", self.pages_visited));
        out.push_str(&format!("  detail URLs found:   {}\n", self.urls_discovered));
        out.push_str(&format!("  documents extracted: {}\n", self.documents_extracted));
        out.push_str(&format!("  documents skipped:   {}\n", self.skipped.len()));
        for skip in &self.skipped {
            out.push_str(&format!("    {} ({})\n", skip.url, skip.reason));
        }
        out.push_str(&format!("  records emitted:     {}\n", self.records_emitted));
        out.push_str(&format!("  amenity labels:      {}\n", self.labels_discovered));
        out.push_str(&format!("  label collisions:    {}\n", self.label_collisions));
        out.push_str(&format!("{}", "=".repeat(80)));
        out
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(price: Option<f64>, beds: Option<f64>) -> ListingRecord {
        ListingRecord {
            source_url: "https://example.com/listing/1".to_string(),
            price,
            beds,
            baths: None,
            sqft: None,
            fixed_flags: FixedFlags::default(),
            amenities_raw: None,
            amenity_labels: vec![],
            raw: RawFields::default(),
        }
    }

    #[test]
    fn test_has_numeric_fields() {
        assert!(record(Some(1200.0), None).has_numeric_fields());
        assert!(record(None, Some(2.0)).has_numeric_fields());
        assert!(!record(None, None).has_numeric_fields());
    }

    #[test]
    fn test_parsed_signature_distinguishes_rows() {
        let a = record(Some(1200.0), Some(1.0));
        let b = record(Some(1200.0), Some(2.0));
        let c = record(Some(1200.0), Some(1.0));
        assert_ne!(a.parsed_signature(), b.parsed_signature());
        assert_eq!(a.parsed_signature(), c.parsed_signature());
    }

    #[test]
    fn test_summary_report_contains_counts() {
        let mut summary = RunSummary::new();
        summary.urls_discovered = 12;
        summary.records_emitted = 30;
        summary.skipped.push(SkippedUrl {
            url: "https://example.com/listing/9".to_string(),
            reason: "render failed".to_string(),
        });
        summary.finish();

        let report = summary.render_report();
        assert!(report.contains("detail URLs found:   12"));
        assert!(report.contains("records emitted:     30"));
        assert!(report.contains("render failed"));
    }
}
