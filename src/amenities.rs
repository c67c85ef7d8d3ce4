//! Amenity classification.
//!
//! Two independent namespaces: a closed, hand-authored keyword taxonomy
//! matched against free page text, and an open one-hot vocabulary discovered
//! at run time from structured amenity lists. The one-hot universe is shared
//! across the whole output table, so encoding is a two-pass operation:
//! collect every label first, then assign columns.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Closed amenity vocabulary: key, then the patterns that imply it.
/// Declaration order is the column order in the output table.
const AMENITY_RULES: &[(&str, &[&str])] = &[
    ("laundry", &[r"laundry", r"in-?unit laundry", r"washer", r"dryer", r"laundry in building"]),
    ("parking", &[r"parking", r"garage"]),
    ("pets_allowed", &[r"pet friendly", r"cats? ok", r"dogs? ok", r"\bpets?\b"]),
    ("no_pets", &[r"\bno pets\b", r"pets not allowed"]),
    ("ac", &[r"air conditioning", r"\bac\b", r"central air"]),
    ("heating", &[r"\bheating\b", r"heat.*included"]),
    ("utilities_inc", &[r"utilities included", r"hot water.*included", r"heat.*included", r"electric.*included"]),
    ("dishwasher", &[r"dishwasher"]),
    ("elevator", &[r"elevator"]),
    ("balcony", &[r"balcony", r"patio", r"deck", r"porch", r"terrace"]),
    ("hardwood", &[r"hardwood", r"wood floors"]),
    ("gym", &[r"gym", r"fitness"]),
    ("pool", &[r"pool"]),
    ("furnished", &[r"furnished"]),
];

/// Keys of the fixed taxonomy, in output-column order.
pub fn fixed_keys() -> Vec<&'static str> {
    AMENITY_RULES.iter().map(|(key, _)| *key).collect()
}

/// Boolean flags over the fixed amenity keys, in [`fixed_keys`] order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixedFlags {
    bits: Vec<bool>,
}

impl FixedFlags {
    pub fn none() -> Self {
        Self {
            bits: vec![false; AMENITY_RULES.len()],
        }
    }

    pub fn values(&self) -> &[bool] {
        &self.bits
    }

    /// Monotone union: a key is set if either side has it.
    pub fn or(&self, other: &FixedFlags) -> FixedFlags {
        FixedFlags {
            bits: self
                .bits
                .iter()
                .zip(other.bits.iter())
                .map(|(a, b)| *a || *b)
                .collect(),
        }
    }

    pub fn matched_keys(&self) -> Vec<&'static str> {
        AMENITY_RULES
            .iter()
            .zip(self.bits.iter())
            .filter(|(_, set)| **set)
            .map(|((key, _), _)| *key)
            .collect()
    }

    /// Human-readable summary: sorted, comma-joined matched keys.
    pub fn summary(&self) -> Option<String> {
        let mut keys = self.matched_keys();
        if keys.is_empty() {
            return None;
        }
        keys.sort_unstable();
        Some(keys.join(", "))
    }
}

impl Default for FixedFlags {
    fn default() -> Self {
        Self::none()
    }
}

/// Compiled fixed-keyword matcher. Patterns are matched case-insensitively
/// anywhere in the assembled page text blob.
pub struct FixedTaxonomy {
    rules: Vec<Vec<Regex>>,
}

impl FixedTaxonomy {
    pub fn new() -> Self {
        let rules = AMENITY_RULES
            .iter()
            .map(|(_, patterns)| {
                patterns
                    .iter()
                    .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
                    .collect()
            })
            .collect();
        Self { rules }
    }

    pub fn classify(&self, blob: &str) -> FixedFlags {
        let bits = self
            .rules
            .iter()
            .map(|patterns| patterns.iter().any(|re| re.is_match(blob)))
            .collect();
        FixedFlags { bits }
    }
}

impl Default for FixedTaxonomy {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a raw amenity label into a stable, spreadsheet-friendly column name
/// like `Amenity_In_Unit_Laundry`.
pub fn sanitize_label(label: &str) -> String {
    let mut s = label.trim().to_string();
    if let Ok(re) = Regex::new(r"[\s/,+()\-]+") {
        s = re.replace_all(&s, "_").into_owned();
    }
    s.retain(|c| c.is_ascii_alphanumeric() || c == '_');
    if let Ok(re) = Regex::new(r"_+") {
        s = re.replace_all(&s, "_").into_owned();
    }
    s = s.trim_matches('_').to_string();
    if s.is_empty() {
        s = "Amenity".to_string();
    }
    if !s.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        s = format!("A_{}", s);
    }
    format!("Amenity_{}", s)
}

/// One dynamic column: the sanitized name and the exact raw label it encodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OneHotColumn {
    pub column: String,
    pub label: String,
}

/// Two raw labels sanitized to the same column name. The first-seen label
/// keeps the column; the loser is reported for review, never silently merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCollision {
    pub label: String,
    pub winner: String,
    pub column: String,
}

/// Dynamic one-hot encoder over the corpus-wide label universe.
///
/// Labels are processed in sorted order, so column assignment and collision
/// resolution are independent of discovery order.
pub struct OneHotEncoder {
    columns: Vec<OneHotColumn>,
    collisions: Vec<LabelCollision>,
}

impl OneHotEncoder {
    pub fn build<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let universe: BTreeSet<&str> = labels
            .into_iter()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let mut columns = Vec::new();
        let mut collisions = Vec::new();
        let mut taken: HashMap<String, String> = HashMap::new();

        for label in universe {
            let column = sanitize_label(label);
            match taken.get(&column) {
                Some(winner) => {
                    tracing::warn!(
                        "amenity label '{}' collides with '{}' on column {}",
                        label,
                        winner,
                        column
                    );
                    collisions.push(LabelCollision {
                        label: label.to_string(),
                        winner: winner.clone(),
                        column,
                    });
                }
                None => {
                    taken.insert(column.clone(), label.to_string());
                    columns.push(OneHotColumn {
                        column,
                        label: label.to_string(),
                    });
                }
            }
        }

        columns.sort_by(|a, b| a.column.cmp(&b.column));
        Self {
            columns,
            collisions,
        }
    }

    pub fn columns(&self) -> &[OneHotColumn] {
        &self.columns
    }

    pub fn collisions(&self) -> &[LabelCollision] {
        &self.collisions
    }

    /// Encode one record's label set against the shared columns. A column is
    /// set only on an exact raw-label match.
    pub fn encode(&self, labels: &[String]) -> Vec<bool> {
        self.columns
            .iter()
            .map(|col| labels.iter().any(|l| l.trim() == col.label))
            .collect()
    }
}
