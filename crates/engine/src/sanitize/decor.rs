// ABOUTME: Removal of duplicate, decorative and unrenderable subtrees from captured fragments.
// ABOUTME: Screen-reader and mobile duplicates, broken or empty SVGs, decorative images, empty wrappers.

use std::collections::HashSet;

use ego_tree::NodeId;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::ElementRef;

use super::styles::declaration_value;
use crate::dom::compiled::compile_list;
use crate::dom::{get_or_compile, Fragment};

/// Structural duplicates: screen-reader copies, mobile copies, short labels.
const DUPLICATE_MARKERS: &[&str] = &[
    ".sr-only",
    ".visually-hidden",
    ".visuallyhidden",
    ".screen-reader-text",
    ".screen-reader-only",
    ".a11y-hidden",
    ".u-visually-hidden",
    ".mobile-only",
    ".show-mobile",
    ".visible-mobile",
    ".hidden-desktop",
    ".hide-desktop",
    ".short-label",
    ".label-short",
    ".abbr-label",
    ".abbreviated",
];

/// Descendants that make a wrapper worth keeping.
const CONTENT_TAGS: &[&str] = &["img", "svg", "picture", "video", "a"];

const DRAWABLE_SVG_TAGS: &[&str] = &[
    "path", "circle", "rect", "ellipse", "line", "polyline", "polygon", "use", "image", "text",
];

const MAX_UNSIZED_PATH_DATA: usize = 1000;
const MAX_DECORATIVE_DATA_URI: usize = 500;

static RANKING_CLASS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)number|rank|index").unwrap());

/// Runs every removal in this module. Removing a hidden sprite sheet can
/// orphan `<use>` references elsewhere, so the SVG removals repeat until
/// nothing changes. Empty wrappers are checked last so that wrappers emptied
/// by the other removals go too.
pub fn remove_decorative(frag: &mut Fragment) {
    remove_duplicate_markers(frag);
    while remove_broken_sprites(frag) + remove_unrenderable_svgs(frag) > 0 {}
    remove_decorative_images(frag);
    remove_empty_wrappers(frag);
}

fn remove_all(frag: &mut Fragment, ids: Vec<NodeId>) -> usize {
    let count = ids.len();
    for id in ids {
        frag.remove(id);
    }
    count
}

pub fn remove_duplicate_markers(frag: &mut Fragment) {
    if let Some(sel) = compile_list(DUPLICATE_MARKERS) {
        let ids = frag.select_ids(&sel);
        remove_all(frag, ids);
    }
}

/// `div`/`span` with no live text and no live image, svg, picture, video or
/// link below it.
pub fn remove_empty_wrappers(frag: &mut Fragment) {
    let Some(sel) = get_or_compile("div, span") else {
        return;
    };
    let ids: Vec<NodeId> = frag
        .select(&sel)
        .into_iter()
        .filter(|el| {
            frag.text_of(**el).is_empty()
                && !frag.any_live_descendant(el, |d| CONTENT_TAGS.contains(&d.value().name()))
        })
        .map(|el| el.id())
        .collect();
    remove_all(frag, ids);
}

/// SVGs whose `<use>` points at an in-fragment id that is not there.
/// Returns how many were removed.
pub fn remove_broken_sprites(frag: &mut Fragment) -> usize {
    let (Some(svg_sel), Some(use_sel)) = (get_or_compile("svg"), get_or_compile("use")) else {
        return 0;
    };
    let known_ids: HashSet<String> = frag
        .elements()
        .iter()
        .filter_map(|el| frag.attr(el, "id"))
        .collect();
    let ids: Vec<NodeId> = frag
        .select(&svg_sel)
        .into_iter()
        .filter(|svg| {
            svg.select(&use_sel)
                .filter(|u| !frag.is_removed(**u))
                .filter_map(|u| frag.attr(&u, "href"))
                .filter_map(|href| href.strip_prefix('#').map(str::to_string))
                .any(|target| !known_ids.contains(&target))
        })
        .map(|svg| svg.id())
        .collect();
    remove_all(frag, ids)
}

/// Returns how many SVGs were removed.
pub fn remove_unrenderable_svgs(frag: &mut Fragment) -> usize {
    let Some(sel) = get_or_compile("svg") else {
        return 0;
    };
    let ids: Vec<NodeId> = frag
        .select(&sel)
        .into_iter()
        .filter(|svg| !svg_is_renderable(&svg_facts(frag, svg)))
        .map(|svg| svg.id())
        .collect();
    remove_all(frag, ids)
}

/// What the renderability heuristic looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SvgFacts {
    pub has_drawable_child: bool,
    pub has_dimensions: bool,
    pub path_data_len: usize,
    pub has_visible_paint: bool,
}

/// No drawable child, or unsized with either oversized path data or no
/// visible paint.
pub fn svg_is_renderable(f: &SvgFacts) -> bool {
    if !f.has_drawable_child {
        return false;
    }
    if !f.has_dimensions && (f.path_data_len > MAX_UNSIZED_PATH_DATA || !f.has_visible_paint) {
        return false;
    }
    true
}

fn svg_facts(frag: &Fragment, svg: &ElementRef<'_>) -> SvgFacts {
    let live: Vec<ElementRef<'_>> = svg
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|d| !frag.is_removed(**d))
        .collect();

    let style = frag.attr(svg, "style").unwrap_or_default();
    let has_dimensions = ["width", "height", "viewBox"]
        .iter()
        .any(|a| frag.attr(svg, a).is_some_and(|v| !v.trim().is_empty()))
        || declaration_value(&style, "width").is_some()
        || declaration_value(&style, "height").is_some();

    let path_data_len = live
        .iter()
        .filter(|d| d.value().name() == "path")
        .filter_map(|d| frag.attr(d, "d"))
        .map(|d| d.len())
        .sum();

    SvgFacts {
        has_drawable_child: live
            .iter()
            .any(|d| DRAWABLE_SVG_TAGS.contains(&d.value().name())),
        has_dimensions,
        path_data_len,
        has_visible_paint: has_visible_paint(frag, svg, &live),
    }
}

fn paint_values(frag: &Fragment, el: &ElementRef<'_>) -> Vec<String> {
    let style = frag.attr(el, "style").unwrap_or_default();
    let mut values = Vec::new();
    for prop in ["fill", "stroke"] {
        if let Some(v) = frag.attr(el, prop) {
            values.push(v.trim().to_ascii_lowercase());
        }
        if let Some(v) = declaration_value(&style, prop) {
            values.push(v.trim().to_ascii_lowercase());
        }
    }
    values
}

fn is_visible_paint(value: &str) -> bool {
    !matches!(value, "none" | "transparent" | "")
}

/// Default fill is visible, so paint is only missing when the root turns
/// fill off and nothing below paints either. `currentColor` counts as paint.
fn has_visible_paint(frag: &Fragment, svg: &ElementRef<'_>, live: &[ElementRef<'_>]) -> bool {
    let root_paint = paint_values(frag, svg);
    let root_fill_off = frag
        .attr(svg, "fill")
        .map(|v| !is_visible_paint(&v.trim().to_ascii_lowercase()))
        .unwrap_or(false)
        || declaration_value(&frag.attr(svg, "style").unwrap_or_default(), "fill")
            .is_some_and(|v| !is_visible_paint(&v.trim().to_ascii_lowercase()));
    if !root_fill_off {
        return true;
    }
    root_paint.iter().any(|v| is_visible_paint(v))
        || live
            .iter()
            .flat_map(|d| paint_values(frag, d))
            .any(|v| is_visible_paint(&v))
}

/// Ranking numbers and tiny inline images that duplicate list markers.
pub fn remove_decorative_images(frag: &mut Fragment) {
    let Some(sel) = get_or_compile("img") else {
        return;
    };
    let ids: Vec<NodeId> = frag
        .select(&sel)
        .into_iter()
        .filter(|img| {
            let in_list_item = img
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| a.value().name() == "li");
            let alt = frag.attr(img, "alt");
            let class = frag.attr(img, "class").unwrap_or_default();
            let src = frag.attr(img, "src").unwrap_or_default();
            is_decorative_image(alt.as_deref(), &class, &src, in_list_item)
        })
        .map(|img| img.id())
        .collect();
    remove_all(frag, ids);
}

pub fn is_decorative_image(alt: Option<&str>, class: &str, src: &str, in_list_item: bool) -> bool {
    let alt = alt.map(str::trim).filter(|a| !a.is_empty());
    if in_list_item && alt.is_some_and(|a| a.chars().all(|c| c.is_ascii_digit())) {
        return true;
    }
    if alt.is_none() && RANKING_CLASS_RE.is_match(class) {
        return true;
    }
    in_list_item
        && src.trim_start().to_ascii_lowercase().starts_with("data:")
        && src.len() < MAX_DECORATIVE_DATA_URI
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(html: &str) -> String {
        let mut frag = Fragment::parse(html);
        remove_decorative(&mut frag);
        frag.serialize()
    }

    #[test]
    fn sr_only_removed_and_parent_kept() {
        assert_eq!(
            run(r#"<div><span class="sr-only">hidden</span><p>Real text</p></div>"#),
            "<div><p>Real text</p></div>"
        );
    }

    #[test]
    fn empty_wrappers_removed_but_image_wrappers_kept() {
        assert_eq!(
            run(r#"<div><div><span> </span></div><div><img src="a.png"></div><span><a href="x"></a></span></div>"#),
            r#"<div><div><img src="a.png" /></div><span><a href="x"></a></span></div>"#
        );
    }

    #[test]
    fn wrapper_emptied_by_decorative_image_goes_too() {
        assert_eq!(
            run(r#"<ul><li><div><img alt="1" src="n.png"></div>Story</li></ul>"#),
            "<ul><li>Story</li></ul>"
        );
    }

    #[test]
    fn broken_sprite_reference_removed() {
        let html = "<p>x<svg width=\"10\"><use href=\"#missing\"></use></svg>\
                    <svg width=\"10\"><use href=\"#icon\"></use></svg>\
                    <svg style=\"display:none\"><symbol id=\"icon\"><path d=\"M0 0\"></path></symbol></svg></p>";
        let out = run(html);
        assert!(!out.contains("#missing"));
        assert!(out.contains("#icon"));
    }

    #[test]
    fn oversized_sprite_sheet_takes_its_users_along() {
        let html = format!(
            "<p>x<svg width=\"10\"><use href=\"#i\"></use></svg>\
             <svg style=\"display:none\"><symbol id=\"i\"><path d=\"{}\"></path></symbol></svg></p>",
            "M0 0".repeat(300)
        );
        let once = run(&html);
        assert_eq!(once, "<p>x</p>");
        assert_eq!(run(&once), once);
    }

    #[test]
    fn test_svg_is_renderable() {
        let ok = SvgFacts {
            has_drawable_child: true,
            has_dimensions: true,
            path_data_len: 5000,
            has_visible_paint: false,
        };
        assert!(svg_is_renderable(&ok));
        assert!(!svg_is_renderable(&SvgFacts { has_drawable_child: false, ..ok }));
        assert!(!svg_is_renderable(&SvgFacts { has_dimensions: false, ..ok }));
        assert!(svg_is_renderable(&SvgFacts {
            has_dimensions: false,
            path_data_len: 1000,
            has_visible_paint: true,
            ..ok
        }));
    }

    #[test]
    fn current_color_counts_as_paint() {
        let out = run(r#"<p>a<svg fill="none"><path stroke="currentColor" d="M0 0L1 1"></path></svg></p>"#);
        assert!(out.contains("<svg"));
        let out = run(r#"<p>a<svg fill="none"><path d="M0 0L1 1"></path></svg></p>"#);
        assert!(!out.contains("<svg"));
    }

    #[test]
    fn test_is_decorative_image() {
        assert!(is_decorative_image(Some(" 3 "), "", "a.png", true));
        assert!(!is_decorative_image(Some("3"), "", "a.png", false));
        assert!(is_decorative_image(None, "rank-badge", "a.png", false));
        assert!(!is_decorative_image(Some("Logo"), "rank-badge", "a.png", false));
        assert!(is_decorative_image(Some("x"), "", "data:image/gif;base64,R0lGOD", true));
        assert!(!is_decorative_image(Some("x"), "", &format!("data:{}", "A".repeat(600)), true));
    }
}
