// ABOUTME: Short text signature of a captured element, used to verify later extractions.
// ABOUTME: Heading first, then bold text, then the first substantial text node.

use scraper::{ElementRef, Node};

use crate::dom::{get_or_compile, is_heading_tag, normalize_whitespace, parse_in_context, root_of};

/// Maximum fingerprint length in characters.
pub const MAX_FINGERPRINT_CHARS: usize = 50;

/// A candidate shorter than this never matches by reverse containment.
const MIN_REVERSE_MATCH_CHARS: usize = 10;

/// Text nodes must be longer than this to serve as a fallback fingerprint.
const MIN_TEXT_NODE_CHARS: usize = 10;

/// Extracts a fingerprint from an HTML fragment.
pub fn extract_fingerprint(html: &str) -> Option<String> {
    let (doc, root) = parse_in_context(html);
    representative_text(root_of(&doc, root), MAX_FINGERPRINT_CHARS)
}

/// Extracts a fingerprint from an element of an already parsed page.
pub fn fingerprint_of(el: ElementRef<'_>) -> Option<String> {
    representative_text(el, MAX_FINGERPRINT_CHARS)
}

/// Heading text, then bold text, then the first text node longer than ten
/// characters, collapsed and cut to `max_chars`.
pub fn representative_text(el: ElementRef<'_>, max_chars: usize) -> Option<String> {
    let headings = el
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| is_heading_tag(e.value().name()));
    if let Some(text) = first_non_empty(headings) {
        return Some(truncate_chars(&text, max_chars));
    }

    if let Some(bold) = get_or_compile("b, strong") {
        if let Some(text) = first_non_empty(el.select(&bold)) {
            return Some(truncate_chars(&text, max_chars));
        }
    }

    el.descendants()
        .filter(|n| {
            !n.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
            })
        })
        .filter_map(|n| match n.value() {
            Node::Text(t) => Some(t.trim()),
            _ => None,
        })
        .find(|t| t.chars().count() > MIN_TEXT_NODE_CHARS)
        .map(|t| truncate_chars(&normalize_whitespace(t), max_chars))
}

fn first_non_empty<'a>(mut elements: impl Iterator<Item = ElementRef<'a>>) -> Option<String> {
    elements.find_map(|e| {
        let text = crate::dom::element_text(&e);
        (!text.is_empty()).then_some(text)
    })
}

/// Cuts a string to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}

/// Loose match used to pick among candidates: either string contains the
/// other, ignoring case. Reverse containment needs a candidate of at least
/// ten characters.
pub fn fingerprint_matches(candidate: &str, fingerprint: &str) -> bool {
    let candidate = normalize_whitespace(candidate).to_lowercase();
    let fingerprint = normalize_whitespace(fingerprint).to_lowercase();
    if fingerprint.is_empty() || candidate.is_empty() {
        return false;
    }
    candidate.contains(&fingerprint)
        || (candidate.chars().count() >= MIN_REVERSE_MATCH_CHARS
            && fingerprint.contains(&candidate))
}

/// Strict check before overwriting a cache: the text of `html` must contain
/// the fingerprint.
pub fn verify_fingerprint(html: &str, fingerprint: &str) -> bool {
    let expected = normalize_whitespace(fingerprint).to_lowercase();
    if expected.is_empty() {
        return true;
    }
    let (doc, root) = parse_in_context(html);
    crate::dom::element_text(&root_of(&doc, root))
        .to_lowercase()
        .contains(&expected)
}
