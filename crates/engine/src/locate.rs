// ABOUTME: Finds a stored widget in a freshly fetched page, by selector or by its heading text.
// ABOUTME: Generic single-tag selectors match nothing; heading search skips site navigation.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};

use crate::dom::{element_text, get_or_compile, is_heading_tag, normalize_whitespace};
use crate::fingerprint::{fingerprint_matches, fingerprint_of};

/// Selectors this broad would match some unrelated element on every page.
pub const GENERIC_TAGS: &[&str] = &[
    "div", "section", "article", "main", "aside", "header", "footer", "nav",
];

/// Heading and title-like elements searched during heading fallback.
const TITLE_LIKE: &str = r#"h1, h2, h3, h4, h5, h6, caption, [class*="title"], [class*="heading"], [class*="header"]"#;

/// A class-matched title candidate holding any of these is a container, not a title.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "li", "main", "nav", "ol", "p",
    "section", "table", "ul",
];

/// A `header` below one of these is part of the content, not the site banner.
const SECTIONING_TAGS: &[&str] = &["article", "aside", "main", "section"];

/// Growth and climbing never enter these.
const PAGE_LEVEL_TAGS: &[&str] = &["html", "body", "main"];

const CARD_DATA_ATTRS: &[&str] = &["data-testid", "data-component", "data-module", "data-section"];

/// Class segments naming a card. Segments are split on `-` and `_`.
static CARD_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(card|widget|module|panel|tile|box)s?$").unwrap());

/// Class segments naming the title strip of a card rather than the card.
static TITLE_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(header|heading|head|title|label|caption)s?$").unwrap());

const MAX_CARD_SEARCH_DEPTH: usize = 5;
const DEFAULT_CLIMB: usize = 3;
const SMALL_FRAGMENT_CHARS: usize = 1000;
const MAX_FRAGMENT_CHARS: usize = 2000;

pub fn is_generic_selector(selector: &str) -> bool {
    let s = selector.trim().to_ascii_lowercase();
    GENERIC_TAGS.contains(&s.as_str())
}

/// Elements matching a stored selector. Generic and unparsable selectors
/// match nothing.
pub fn select_candidates<'a>(doc: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    if is_generic_selector(selector) {
        return Vec::new();
    }
    match get_or_compile(selector.trim()) {
        Some(sel) => doc.select(&sel).collect(),
        None => Vec::new(),
    }
}

/// Picks one element among the candidates: the only one, the first whose
/// fingerprint matches, or else the first.
pub fn choose_match<'a>(
    candidates: &[ElementRef<'a>],
    fingerprint: Option<&str>,
) -> Option<ElementRef<'a>> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        [first, ..] => {
            let matched = fingerprint.and_then(|fp| {
                candidates.iter().copied().find(|c| {
                    fingerprint_of(*c).is_some_and(|cfp| fingerprint_matches(&cfp, fp))
                })
            });
            Some(matched.unwrap_or(*first))
        }
    }
}

/// Re-locates a widget by its heading text and climbs to the enclosing card.
///
/// Only real titles outside the site navigation are considered, and a title
/// whose text equals the fingerprint beats one that merely contains it.
/// Without a card-like ancestor the climb is a fixed three levels. Either
/// way a small fragment keeps growing while the parent stays under the size
/// limit and brings in no other heading.
pub fn find_by_heading<'a>(doc: &'a Html, fingerprint: &str) -> Option<ElementRef<'a>> {
    let wanted = normalize_whitespace(fingerprint).to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let sel = get_or_compile(TITLE_LIKE)?;
    let titles: Vec<(ElementRef<'a>, String)> = doc
        .select(&sel)
        .filter(is_title_candidate)
        .map(|el| {
            let text = element_text(&el).to_lowercase();
            (el, text)
        })
        .collect();

    let heading = titles
        .iter()
        .find(|(_, text)| *text == wanted)
        .or_else(|| titles.iter().find(|(_, text)| fingerprint_matches(text, &wanted)))
        .map(|(el, _)| *el)?;

    let fragment = card_ancestor(heading).unwrap_or_else(|| climb(heading, DEFAULT_CLIMB));
    Some(grow_small_fragment(fragment))
}

fn is_title_candidate(el: &ElementRef<'_>) -> bool {
    if in_site_chrome(el) {
        return false;
    }
    let name = el.value().name();
    if is_heading_tag(name) {
        return true;
    }
    !matches!(name, "header" | "nav" | "footer")
        && !el
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(|d| BLOCK_TAGS.contains(&d.value().name()))
}

/// True inside navigation or the page banner.
fn in_site_chrome(el: &ElementRef<'_>) -> bool {
    std::iter::once(*el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|a| is_chrome_landmark(&a))
}

fn is_chrome_landmark(el: &ElementRef<'_>) -> bool {
    let role = el.value().attr("role").unwrap_or_default();
    if role.eq_ignore_ascii_case("navigation") || role.eq_ignore_ascii_case("banner") {
        return true;
    }
    match el.value().name() {
        "nav" => true,
        "header" => !el.ancestors().filter_map(ElementRef::wrap).any(|a| {
            SECTIONING_TAGS.contains(&a.value().name()) || is_card_like(&a)
        }),
        _ => false,
    }
}

fn parent_element<'a>(el: ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.parent()
        .and_then(ElementRef::wrap)
        .filter(|p| !PAGE_LEVEL_TAGS.contains(&p.value().name()))
}

fn is_card_like(el: &ElementRef<'_>) -> bool {
    CARD_DATA_ATTRS.iter().any(|a| el.value().attr(a).is_some())
        || el.value().attr("class").is_some_and(is_card_class)
}

/// Some class token names a card, e.g. `news-card` or `widget`, without
/// naming its title strip the way `module-header` or `title-box` do.
fn is_card_class(class: &str) -> bool {
    class.split_whitespace().any(|token| {
        let segments: Vec<&str> = token.split(['-', '_']).filter(|s| !s.is_empty()).collect();
        segments.iter().any(|s| CARD_SEGMENT_RE.is_match(s))
            && !segments.iter().any(|s| TITLE_SEGMENT_RE.is_match(s))
    })
}

fn card_ancestor(start: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut current = start;
    for _ in 0..MAX_CARD_SEARCH_DEPTH {
        current = parent_element(current)?;
        if is_card_like(&current) {
            return Some(current);
        }
    }
    None
}

fn climb(start: ElementRef<'_>, levels: usize) -> ElementRef<'_> {
    let mut current = start;
    for _ in 0..levels {
        match parent_element(current) {
            Some(p) => current = p,
            None => break,
        }
    }
    current
}

fn heading_count(el: &ElementRef<'_>) -> usize {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| is_heading_tag(d.value().name()))
        .count()
}

/// Small fragments climb while the parent stays within the size limit and
/// holds no heading of a neighbouring widget.
fn grow_small_fragment(start: ElementRef<'_>) -> ElementRef<'_> {
    let mut current = start;
    let mut size = current.html().len();
    let headings = heading_count(&current);
    while size < SMALL_FRAGMENT_CHARS {
        let Some(parent) = parent_element(current) else {
            break;
        };
        let parent_size = parent.html().len();
        if parent_size > MAX_FRAGMENT_CHARS || parent_size <= size || heading_count(&parent) > headings {
            break;
        }
        current = parent;
        size = parent_size;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_selectors_match_nothing() {
        let doc = Html::parse_document("<div><section>x</section></div>");
        assert!(select_candidates(&doc, "div").is_empty());
        assert!(select_candidates(&doc, " Section ").is_empty());
        assert!(select_candidates(&doc, "[[[").is_empty());
        assert_eq!(select_candidates(&doc, "div > section").len(), 1);
    }

    #[test]
    fn choose_match_uses_fingerprint_then_first() {
        let doc = Html::parse_document(
            r#"<div class="c"><h2>Sports</h2></div><div class="c"><h2>Top Stories</h2></div>"#,
        );
        let candidates = select_candidates(&doc, "div.c");
        let chosen = choose_match(&candidates, Some("Top Stories")).unwrap();
        assert_eq!(element_text(&chosen), "Top Stories");

        let fallback = choose_match(&candidates, Some("Weather")).unwrap();
        assert_eq!(element_text(&fallback), "Sports");
        assert!(choose_match(&[], Some("x")).is_none());
    }

    #[test]
    fn heading_fallback_climbs_to_card() {
        let doc = Html::parse_document(
            r#"<main><div class="news-card" data-x="1"><header><h2>Top Stories</h2></header>
               <ul><li><a href="/a">A story</a></li></ul></div></main>"#,
        );
        let found = find_by_heading(&doc, "Top Stories").unwrap();
        assert_eq!(found.value().attr("class"), Some("news-card"));
    }

    #[test]
    fn heading_fallback_without_card_climbs_three_levels() {
        let doc = Html::parse_document(
            r#"<main><section id="s"><div id="a"><div id="b"><div id="c"><h2>Market movers</h2></div></div></div></section></main>"#,
        );
        let found = find_by_heading(&doc, "market movers").unwrap();
        // Three levels up is #a; the fragment is small so it grows up to, not into, main.
        assert_eq!(found.value().attr("id"), Some("s"));
    }

    #[test]
    fn growth_stops_before_oversized_ancestor() {
        let filler = "x".repeat(2500);
        let html = format!(
            r#"<article><p>{}</p><div><div><div id="target"><h3>Weather</h3><p>Sunny</p></div></div></div></article>"#,
            filler
        );
        let doc = Html::parse_document(&html);
        let found = find_by_heading(&doc, "Weather").unwrap();
        assert_ne!(found.value().name(), "article");
    }

    #[test]
    fn small_card_grows_until_a_neighbouring_heading() {
        let doc = Html::parse_document(
            r#"<div id="rail"><div id="outer"><div class="card"><h2>Weather</h2></div><p>Sunny all day</p></div>
               <div class="card"><h2>Traffic</h2></div></div>"#,
        );
        let found = find_by_heading(&doc, "Weather").unwrap();
        assert_eq!(found.value().attr("id"), Some("outer"));
    }

    #[test]
    fn site_navigation_is_not_mistaken_for_the_widget() {
        let doc = Html::parse_document(
            r#"<header class="site-header"><nav><a href="/">Home</a><a href="/top">Top Stories</a></nav></header>
               <section class="rail"><h2>Top Stories</h2><ul><li><a href="/s/1">Council approves budget</a></li></ul></section>"#,
        );
        let found = find_by_heading(&doc, "Top Stories").unwrap();
        assert_eq!(found.value().attr("class"), Some("rail"));
    }

    #[test]
    fn exact_title_beats_containing_title() {
        let doc = Html::parse_document(
            r#"<div class="promo-card"><h3>More from Top Stories today</h3></div>
               <div class="news-card"><h3>Top Stories</h3></div>"#,
        );
        let found = find_by_heading(&doc, "Top Stories").unwrap();
        assert_eq!(found.value().attr("class"), Some("news-card"));
    }

    #[test]
    fn title_wrapper_classes_are_not_cards() {
        let doc = Html::parse_document(
            r#"<section class="rail"><div class="module-header"><h2>Top Stories</h2></div>
               <ul><li><a href="/s/1">Council approves budget</a></li></ul></section>"#,
        );
        let found = find_by_heading(&doc, "Top Stories").unwrap();
        assert_eq!(found.value().attr("class"), Some("rail"));
        assert!(element_text(&found).contains("Council approves budget"));
    }

    #[test]
    fn test_is_card_class() {
        assert!(is_card_class("news-card"));
        assert!(is_card_class("a widget"));
        assert!(is_card_class("tiles"));
        assert!(!is_card_class("module-header"));
        assert!(!is_card_class("title-box"));
        assert!(!is_card_class("card__title"));
        assert!(!is_card_class("boxer"));
    }

    #[test]
    fn heading_fallback_misses() {
        let doc = Html::parse_document("<h2>Sports</h2>");
        assert!(find_by_heading(&doc, "Top Stories").is_none());
    }
}
