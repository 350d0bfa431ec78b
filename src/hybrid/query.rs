//! Cross-reference expansion for legal queries.
//!
//! Consolidated instruments number their divisions inconsistently: what one
//! version calls "Chapter 3" another calls "Article 3". A query naming one
//! also searches for the other.

use regex::Regex;
use std::sync::LazyLock;

static DIVISION_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(chapter|article)\s+(\d+)\b").expect("static regex")
});

/// Append the counterpart of every "chapter N" / "article N" reference.
pub fn expand_legal_query(query: &str) -> String {
    let mut additions: Vec<String> = Vec::new();
    for caps in DIVISION_REF.captures_iter(query) {
        let counterpart = if caps[1].eq_ignore_ascii_case("chapter") {
            "Article"
        } else {
            "Chapter"
        };
        let term = format!("{} {}", counterpart, &caps[2]);
        let already = query.to_lowercase().contains(&term.to_lowercase());
        if !already && !additions.contains(&term) {
            additions.push(term);
        }
    }

    if additions.is_empty() {
        query.to_string()
    } else {
        format!("{} {}", query, additions.join(" "))
    }
}
