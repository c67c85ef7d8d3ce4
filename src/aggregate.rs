//! Per-property rollup: all floorplan records sharing a source URL collapse
//! into one min/max row with union'd amenities.

use std::collections::{BTreeMap, BTreeSet};

use crate::amenities::FixedFlags;
use crate::models::{ListingRecord, PropertyAggregate};

/// Group records by source URL and roll each group up. Output is ordered by
/// URL and independent of record order within a group.
pub fn aggregate_by_property(records: &[ListingRecord]) -> Vec<PropertyAggregate> {
    let mut groups: BTreeMap<&str, Vec<&ListingRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.source_url.as_str())
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|(url, group)| rollup(url, &group))
        .collect()
}

fn rollup(url: &str, group: &[&ListingRecord]) -> PropertyAggregate {
    let fixed_flags = group
        .iter()
        .fold(FixedFlags::none(), |acc, r| acc.or(&r.fixed_flags));
    let amenities_raw = fixed_flags.summary();

    let labels: BTreeSet<&str> = group
        .iter()
        .flat_map(|r| r.amenity_labels.iter().map(String::as_str))
        .collect();

    PropertyAggregate {
        source_url: url.to_string(),
        min_price: float_min(group.iter().filter_map(|r| r.price)),
        max_price: float_max(group.iter().filter_map(|r| r.price)),
        min_beds: float_min(group.iter().filter_map(|r| r.beds)),
        max_beds: float_max(group.iter().filter_map(|r| r.beds)),
        min_baths: float_min(group.iter().filter_map(|r| r.baths)),
        max_baths: float_max(group.iter().filter_map(|r| r.baths)),
        min_sqft: group.iter().filter_map(|r| r.sqft).min(),
        max_sqft: group.iter().filter_map(|r| r.sqft).max(),
        fixed_flags,
        amenities_raw,
        amenity_labels: labels.into_iter().map(str::to_string).collect(),
    }
}

/// Min over non-null values; all-null folds to null, never zero.
fn float_min(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| match acc {
        Some(m) => Some(f64::min(m, v)),
        None => Some(v),
    })
}

fn float_max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| match acc {
        Some(m) => Some(f64::max(m, v)),
        None => Some(v),
    })
}
