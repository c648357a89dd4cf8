//! Deterministic cache-key and group derivation for schedule queries.
//!
//! Two logically identical queries must always map to the same key, no matter
//! how the routing layer ordered or formatted their parameters. Group-scoped
//! invalidation relies on the same normalization, so the query path and the
//! invalidation path can never disagree about which entity owns an entry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameters that identify the owning scheduling entity, in priority order.
const GROUP_PARAMS: [&str; 2] = ["group", "lecturer"];

/// The three query kinds served by the cache, each with its own TTL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Full schedule lookups for a date range.
    Schedule,
    /// Group/lecturer search results.
    Search,
    /// Filter option listings (disciplines, locations, lecturers).
    FilterOptions,
}

impl Category {
    /// All categories, in counter-array order.
    pub const ALL: [Self; 3] = [Self::Schedule, Self::Search, Self::FilterOptions];

    /// Stable label used as the cache-key prefix.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Search => "search",
            Self::FilterOptions => "filter",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Schedule => 0,
            Self::Search => 1,
            Self::FilterOptions => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A derived cache key plus the group tag the entry is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKey {
    /// Opaque store key, canonical for the (category, params) pair.
    pub key: String,
    /// Owning entity tag; empty when the query has no single owner
    /// (e.g. a global filter-options lookup).
    pub group: String,
}

/// Derive the canonical cache key and group tag for a logical query.
///
/// Parameter names are lowercased and sorted; values are trimmed, have
/// internal whitespace collapsed, and are uppercased. Malformed or missing
/// required parameters are the routing layer's problem, not this function's.
#[must_use]
pub fn build_key(category: Category, params: &[(&str, &str)]) -> QueryKey {
    let mut normalized: Vec<(String, String)> = params
        .iter()
        .map(|(name, value)| (name.trim().to_lowercase(), normalize_value(value)))
        .collect();
    normalized.sort();

    let mut key = String::from(category.label());
    key.push(':');
    for (i, (name, value)) in normalized.iter().enumerate() {
        if i > 0 {
            key.push('&');
        }
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }

    let group = extract_group(&normalized);
    QueryKey { key, group }
}

/// Canonical form of a parameter value or invalidation target.
pub(crate) fn normalize_value(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn extract_group(normalized: &[(String, String)]) -> String {
    for param in GROUP_PARAMS {
        if let Some((_, value)) = normalized.iter().find(|(name, _)| name == param) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }
    String::new()
}
