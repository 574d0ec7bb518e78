// ABOUTME: CSS selector synthesis for re-identifying a captured element across page loads.
// ABOUTME: Tries id, tag+class+attribute, nth-of-type, then ancestor paths, falling back to non-unique.

//! Selector synthesizer.
//!
//! Given an element inside a parsed document, produce a selector that yields
//! exactly that element when queried against the same document. When no
//! unique selector can be built, the non-unique base selector is returned and
//! the fingerprint is expected to disambiguate at refresh time.

use scraper::{ElementRef, Html};

use crate::dom::get_or_compile;

/// Attributes considered stable enough to qualify a selector, in priority order.
pub const USEFUL_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-component",
    "data-section",
    "data-module",
    "data-type",
    "data-t",
    "role",
];

/// Class substrings that indicate transient interaction state.
const STATE_CLASS_MARKERS: &[&str] = &["hover", "active"];

const MAX_CLASSES: usize = 3;
const MAX_ANCESTOR_DEPTH: usize = 4;

/// Which step of the algorithm produced the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorStrategy {
    Id,
    Base,
    NthOfType,
    AncestorPath,
    DataAncestor,
    NonUnique,
}

/// A synthesized selector and whether it is unique in the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedSelector {
    pub selector: String,
    pub unique: bool,
    pub strategy: SelectorStrategy,
}

/// Builds a selector for `target` within `doc`.
pub fn synthesize_selector(doc: &Html, target: ElementRef<'_>) -> SynthesizedSelector {
    if let Some(id) = non_empty_attr(&target, "id") {
        return SynthesizedSelector {
            selector: format!("#{}", css_escape(id)),
            unique: true,
            strategy: SelectorStrategy::Id,
        };
    }

    let base = base_selector(&target);
    if is_unique_for(doc, &base, &target) {
        return found(base, SelectorStrategy::Base);
    }

    if let Some(n) = nth_among_similar_siblings(&target) {
        let nth = format!("{}:nth-of-type({})", base, n);
        if is_unique_for(doc, &nth, &target) {
            return found(nth, SelectorStrategy::NthOfType);
        }
    }

    let mut path = base.clone();
    let mut current = target;
    for _ in 0..MAX_ANCESTOR_DEPTH {
        let Some(parent) = current.parent().and_then(ElementRef::wrap) else {
            break;
        };
        if parent.value().name().eq_ignore_ascii_case("html") {
            break;
        }

        if let Some(data_sel) = data_attribute_selector(&parent) {
            if is_unique_for(doc, &data_sel, &parent) {
                let candidate = format!("{} > {}", data_sel, path);
                if is_unique_for(doc, &candidate, &target) {
                    return found(candidate, SelectorStrategy::DataAncestor);
                }
            }
        }

        let prefix = match non_empty_attr(&parent, "id") {
            Some(id) => format!("#{}", css_escape(id)),
            None => base_selector(&parent),
        };
        path = format!("{} > {}", prefix, path);
        if is_unique_for(doc, &path, &target) {
            return found(path, SelectorStrategy::AncestorPath);
        }
        current = parent;
    }

    SynthesizedSelector {
        selector: base,
        unique: false,
        strategy: SelectorStrategy::NonUnique,
    }
}

fn found(selector: String, strategy: SelectorStrategy) -> SynthesizedSelector {
    SynthesizedSelector {
        selector,
        unique: true,
        strategy,
    }
}

fn non_empty_attr<'a>(el: &ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name).map(str::trim).filter(|v| !v.is_empty())
}

/// Classes usable in a selector: no state classes, at most three.
fn stable_classes<'a>(el: &ElementRef<'a>) -> Vec<&'a str> {
    el.value()
        .classes()
        .filter(|c| {
            let lower = c.to_lowercase();
            !STATE_CLASS_MARKERS.iter().any(|m| lower.contains(m))
        })
        .take(MAX_CLASSES)
        .collect()
}

/// Tag, up to three stable classes, and the first useful attribute.
fn base_selector(el: &ElementRef<'_>) -> String {
    let mut full = el.value().name().to_lowercase();
    for class in stable_classes(el) {
        full.push('.');
        full.push_str(&css_escape(class));
    }
    if let Some((name, value)) = USEFUL_ATTRIBUTES
        .iter()
        .find_map(|name| non_empty_attr(el, name).map(|v| (*name, v)))
    {
        full.push_str(&attribute_clause(name, value));
    }
    full
}

/// `tag[data-x="v"]` for the first data attribute in the priority list.
fn data_attribute_selector(el: &ElementRef<'_>) -> Option<String> {
    USEFUL_ATTRIBUTES
        .iter()
        .filter(|name| name.starts_with("data-"))
        .find_map(|name| non_empty_attr(el, name).map(|v| (*name, v)))
        .map(|(name, value)| {
            format!(
                "{}{}",
                el.value().name().to_lowercase(),
                attribute_clause(name, value)
            )
        })
}

fn attribute_clause(name: &str, value: &str) -> String {
    format!(
        "[{}=\"{}\"]",
        name,
        value.replace('\\', "\\\\").replace('"', "\\\"")
    )
}

/// 1-indexed position among siblings sharing the tag and every stable class.
fn nth_among_similar_siblings(target: &ElementRef<'_>) -> Option<usize> {
    let parent = target.parent()?;
    let tag = target.value().name();
    let classes = stable_classes(target);
    let mut position = 0;
    for sibling in parent.children().filter_map(ElementRef::wrap) {
        let similar = sibling.value().name() == tag
            && classes
                .iter()
                .all(|c| sibling.value().classes().any(|sc| sc == *c));
        if similar {
            position += 1;
        }
        if sibling.id() == target.id() {
            return Some(position);
        }
    }
    None
}

/// True when `css` parses and matches exactly `target` in `doc`.
fn is_unique_for(doc: &Html, css: &str, target: &ElementRef<'_>) -> bool {
    let Some(selector) = get_or_compile(css) else {
        return false;
    };
    let mut matches = doc.select(&selector);
    match (matches.next(), matches.next()) {
        (Some(only), None) => only.id() == target.id(),
        _ => false,
    }
}

/// Escapes a CSS identifier following the CSSOM `CSS.escape()` algorithm.
pub fn css_escape(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len());
    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{:x} ", code));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}
