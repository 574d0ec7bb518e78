// ABOUTME: DOM parsing, querying and serialization utilities shared by the engine.
// ABOUTME: Wraps scraper's HTML tree with a removal/attribute side table and a selector cache.

//! DOM utilities for HTML fragment manipulation.
//!
//! Parsed trees are never mutated in place. Components record their
//! decisions (removed subtrees, attribute rewrites) in a [`Fragment`]'s side
//! table keyed by node identity, and the fragment is serialized once.

pub mod compiled;
pub mod fragment;
pub mod selector;

pub use compiled::get_or_compile;
pub use fragment::{parse_in_context, root_of, Fragment};

use scraper::ElementRef;

/// Collapses runs of whitespace into single spaces and trims.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-normalized text content of an element.
pub fn element_text(el: &ElementRef) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Heading-like tags used by the fingerprint and re-location heuristics.
pub const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6", "caption"];

/// Returns true if the tag is a heading-like element.
pub fn is_heading_tag(tag: &str) -> bool {
    HEADING_TAGS.iter().any(|h| tag.eq_ignore_ascii_case(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  hello   world  "), "hello world");
        assert_eq!(normalize_whitespace("no\textra\nspaces"), "no extra spaces");
        assert_eq!(normalize_whitespace(""), "");
    }

    #[test]
    fn test_is_heading_tag() {
        assert!(is_heading_tag("h3"));
        assert!(is_heading_tag("CAPTION"));
        assert!(!is_heading_tag("header"));
    }
}
