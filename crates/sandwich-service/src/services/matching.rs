//! Name matching for query lookups
//!
//! Names and queries are both decomposed to NFKD, stripped of combining marks
//! and lowercased, so `Café` matches `cafe` and full-width digits match ASCII.

use sandwich_core::Snowflake;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold a name or query for comparison
pub fn normalize(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// A prepared query
#[derive(Debug, Clone)]
pub struct NameQuery {
    raw: String,
    folded: String,
}

impl NameQuery {
    /// `None` for a blank query
    pub fn new(query: &str) -> Option<Self> {
        let raw = query.trim();
        if raw.is_empty() {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            folded: normalize(raw),
        })
    }

    /// Exact id match, or substring of any of the names
    pub fn matches<'a>(&self, id: Snowflake, names: impl IntoIterator<Item = &'a str>) -> bool {
        if id.to_string() == self.raw {
            return true;
        }
        names
            .into_iter()
            .any(|name| normalize(name).contains(&self.folded))
    }
}
