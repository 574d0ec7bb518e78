// ABOUTME: Detects placeholder, empty-shell and duplicated markup in freshly extracted HTML.
// ABOUTME: Each signal is a pure predicate over counts; detect_staleness gathers the counts.

use std::collections::HashMap;
use std::fmt;

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};

use crate::dom::{element_text, get_or_compile, is_heading_tag, parse_in_context, root_of};

/// Class substrings left behind by loading placeholders.
const SKELETON_CLASS_MARKERS: &[&str] = &[
    "skeleton",
    "shimmer",
    "placeholder-glow",
    "placeholder-wave",
    "loading-placeholder",
    "content-loader",
    "is-loading",
];

const ARTICLE_LIKE: &str = r#"article, li, [class*="story"], [class*="card"], [class*="item"]"#;

static SKELETON_MATCHER: Lazy<Option<AhoCorasick>> = Lazy::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(SKELETON_CLASS_MARKERS)
        .ok()
});

static SUB_CONTAINER_CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)detail|content|title|headline|desc|summary").unwrap());

/// Why a fragment looks stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    SkeletonMarkers,
    EmptyContainer,
    EmptySubContainers,
    ResponsiveDuplicate,
    WrapperSkeleton,
    ImagesVanished,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StaleReason::SkeletonMarkers => "skeleton markers",
            StaleReason::EmptyContainer => "heading without content",
            StaleReason::EmptySubContainers => "empty content slots",
            StaleReason::ResponsiveDuplicate => "responsive duplicate links",
            StaleReason::WrapperSkeleton => "empty wrapper children",
            StaleReason::ImagesVanished => "images vanished",
        };
        f.write_str(s)
    }
}

/// Verdict of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Staleness {
    pub is_stale: bool,
    pub reason: Option<StaleReason>,
}

impl Staleness {
    pub fn fresh() -> Self {
        Self::default()
    }

    pub fn stale(reason: StaleReason) -> Self {
        Self {
            is_stale: true,
            reason: Some(reason),
        }
    }
}

/// Counts taken from the previous cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviousCounts {
    pub images: usize,
}

impl PreviousCounts {
    pub fn from_html(html: &str) -> Self {
        Self {
            images: count_images(html),
        }
    }
}

/// Number of `img` elements in an HTML fragment.
pub fn count_images(html: &str) -> usize {
    let Some(sel) = get_or_compile("img") else {
        return 0;
    };
    parse_in_context(html).0.select(&sel).count()
}

pub fn has_skeleton_markers(class_marker_hits: usize, skeleton_word_count: usize) -> bool {
    class_marker_hits > 0 || skeleton_word_count > 2
}

pub fn is_empty_container(has_heading: bool, links: usize, article_like: usize) -> bool {
    has_heading && links <= 1 && article_like <= 1
}

pub fn has_empty_sub_containers(empty_slots: usize) -> bool {
    empty_slots >= 2
}

/// Hidden mobile/desktop copies of the same list show up as repeated link
/// texts.
pub fn is_responsive_duplicate(total_long_texts: usize, distinct_long_texts: usize) -> bool {
    let duplicates = total_long_texts.saturating_sub(distinct_long_texts);
    duplicates >= 5 && duplicates >= distinct_long_texts
}

pub fn is_wrapper_skeleton(children: usize, empty_children: usize, text_len: usize) -> bool {
    children >= 10 && empty_children * 5 >= children * 4 && text_len < 2000
}

pub fn images_vanished(previous: usize, current: usize) -> bool {
    previous >= 3 && current == 0
}

/// Runs every signal over `html`, first hit wins.
pub fn detect_staleness(html: &str, previous: PreviousCounts) -> Staleness {
    let (doc, root) = parse_in_context(html);
    let root = root_of(&doc, root);
    let elements: Vec<ElementRef<'_>> = root
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .collect();

    let class_marker_hits = match SKELETON_MATCHER.as_ref() {
        Some(matcher) => elements
            .iter()
            .filter_map(|el| el.value().attr("class"))
            .filter(|class| matcher.is_match(class))
            .count(),
        None => 0,
    };
    let skeleton_word_count = html.to_lowercase().matches("skeleton").count();
    if has_skeleton_markers(class_marker_hits, skeleton_word_count) {
        return Staleness::stale(StaleReason::SkeletonMarkers);
    }

    let has_heading = elements.iter().any(|el| is_heading_tag(el.value().name()));
    let links = count(&doc, "a");
    let article_like = count(&doc, ARTICLE_LIKE);
    if is_empty_container(has_heading, links, article_like) {
        return Staleness::stale(StaleReason::EmptyContainer);
    }

    let empty_slots = elements
        .iter()
        .filter(|el| {
            el.value()
                .attr("class")
                .is_some_and(|c| SUB_CONTAINER_CLASS_RE.is_match(c))
        })
        .filter(|el| element_text(el).is_empty() && el.children().all(|c| !c.value().is_element()))
        .count();
    if has_empty_sub_containers(empty_slots) {
        return Staleness::stale(StaleReason::EmptySubContainers);
    }

    let (total, distinct) = long_anchor_texts(&doc);
    if is_responsive_duplicate(total, distinct) {
        return Staleness::stale(StaleReason::ResponsiveDuplicate);
    }

    let text_len = element_text(&root).chars().count();
    let wrapper_hit = elements.iter().any(|el| {
        let children: Vec<ElementRef<'_>> = el.children().filter_map(ElementRef::wrap).collect();
        let empty = children.iter().filter(|c| is_fully_empty(c)).count();
        is_wrapper_skeleton(children.len(), empty, text_len)
    });
    if wrapper_hit {
        return Staleness::stale(StaleReason::WrapperSkeleton);
    }

    let images = elements.iter().filter(|el| el.value().name() == "img").count();
    if images_vanished(previous.images, images) {
        return Staleness::stale(StaleReason::ImagesVanished);
    }

    Staleness::fresh()
}

fn count(doc: &Html, css: &str) -> usize {
    get_or_compile(css).map_or(0, |sel| doc.select(&sel).count())
}

/// No text, no link and no image below the element.
fn is_fully_empty(el: &ElementRef<'_>) -> bool {
    if !element_text(el).is_empty() {
        return false;
    }
    !el.descendants()
        .filter_map(ElementRef::wrap)
        .any(|d| matches!(d.value().name(), "a" | "img" | "svg" | "picture"))
}

/// Total and distinct anchor texts longer than ten characters.
fn long_anchor_texts(doc: &Html) -> (usize, usize) {
    let Some(sel) = get_or_compile("a") else {
        return (0, 0);
    };
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut total = 0;
    for a in doc.select(&sel) {
        let text = element_text(&a);
        if text.chars().count() > 10 {
            total += 1;
            *seen.entry(text).or_default() += 1;
        }
    }
    (total, seen.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize) -> String {
        (0..n)
            .map(|i| format!(r#"<li><a href="/{i}">Headline number {i}</a></li>"#))
            .collect()
    }

    #[test]
    fn heading_without_links_or_articles_is_stale() {
        let verdict = detect_staleness(
            "<div><h2>Top Stories</h2><p>Loading your stories now</p></div>",
            PreviousCounts::default(),
        );
        assert_eq!(verdict, Staleness::stale(StaleReason::EmptyContainer));
    }

    #[test]
    fn real_list_is_fresh() {
        let html = format!("<div><h2>Top Stories</h2><ul>{}</ul></div>", links(4));
        assert_eq!(
            detect_staleness(&html, PreviousCounts::default()),
            Staleness::fresh()
        );
    }

    #[test]
    fn skeleton_class_is_stale() {
        let html = format!(r#"<div><div class="Skeleton-row"></div><ul>{}</ul></div>"#, links(3));
        assert_eq!(
            detect_staleness(&html, PreviousCounts::default()).reason,
            Some(StaleReason::SkeletonMarkers)
        );
    }

    #[test]
    fn empty_sub_containers_are_stale() {
        let html = format!(
            r#"<div><ul>{}</ul><div class="item-title"></div><p class="card-detail"> </p></div>"#,
            links(3)
        );
        assert_eq!(
            detect_staleness(&html, PreviousCounts::default()).reason,
            Some(StaleReason::EmptySubContainers)
        );
    }

    #[test]
    fn duplicated_link_lists_are_stale() {
        let html = format!("<div><ul>{}</ul><ul>{}</ul></div>", links(5), links(5));
        assert_eq!(
            detect_staleness(&html, PreviousCounts::default()).reason,
            Some(StaleReason::ResponsiveDuplicate)
        );
    }

    #[test]
    fn wrapper_with_empty_children_is_stale() {
        let empties: String = (0..9).map(|_| "<div></div>").collect();
        let html = format!(
            r#"<div><a href="/a">A</a><a href="/b">B</a><ul><li>1</li><li>2</li></ul><section>{}<div>x</div></section></div>"#,
            empties
        );
        assert_eq!(
            detect_staleness(&html, PreviousCounts::default()).reason,
            Some(StaleReason::WrapperSkeleton)
        );
    }

    #[test]
    fn vanished_images_are_stale() {
        let html = format!("<div><ul>{}</ul></div>", links(3));
        assert_eq!(
            detect_staleness(&html, PreviousCounts { images: 3 }).reason,
            Some(StaleReason::ImagesVanished)
        );
        assert!(!detect_staleness(&html, PreviousCounts { images: 2 }).is_stale);
    }

    #[test]
    fn predicate_boundaries() {
        assert!(!has_skeleton_markers(0, 2));
        assert!(has_skeleton_markers(0, 3));
        assert!(is_empty_container(true, 1, 1));
        assert!(!is_empty_container(true, 2, 0));
        assert!(!is_empty_container(false, 0, 0));
        assert!(!has_empty_sub_containers(1));
        assert!(is_responsive_duplicate(10, 5));
        assert!(!is_responsive_duplicate(9, 5));
        assert!(!is_responsive_duplicate(20, 12));
        assert!(is_wrapper_skeleton(10, 8, 1999));
        assert!(!is_wrapper_skeleton(10, 7, 0));
        assert!(!is_wrapper_skeleton(9, 9, 0));
        assert!(!is_wrapper_skeleton(10, 10, 2000));
        assert!(images_vanished(3, 0));
        assert!(!images_vanished(3, 1));
    }

    #[test]
    fn previous_counts_from_html() {
        assert_eq!(
            PreviousCounts::from_html(r#"<img src="a"><p><img src="b"></p>"#).images,
            2
        );
    }
}
