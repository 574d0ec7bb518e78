// ABOUTME: Sanitizer pipeline turning extracted HTML into safe, self-contained widget markup.
// ABOUTME: Steps record edits in a Fragment side table; one serializer pass produces the output.

//! Content sanitizer and normalizer.
//!
//! The pipeline runs over a detached, parsed fragment:
//!
//! 0. render side table (tab extraction only)
//! 1. user exclusions
//! 2. duplicate and decorative removal
//! 3. progressive-loading cleanup on images
//! 4. `position: fixed|sticky` removal
//! 5. URL resolution and anchor hardening
//! 6. lazy image promotion
//! 7. `cursor` removal
//! 8. image tiering
//!
//! The serialized result then goes through an ammonia allowlist
//! ([`safe::clean`]): scripts, frames, embedded objects, forms, comments,
//! event handler attributes and `javascript:` URLs never reach the output.
//! Running the pipeline on its own output changes nothing.

pub mod decor;
pub mod render;
pub mod safe;
pub mod styles;
pub mod tiers;
pub mod urls;

use std::collections::HashMap;

use ego_tree::NodeId;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;
use url::Url;

use crate::dom::{get_or_compile, Fragment};
pub use render::{ImageMetrics, RenderReport};
pub use tiers::ImageTier;

/// Lazy-load source attributes, first present absolute URL wins.
const LAZY_SRC_ATTRS: &[&str] = &[
    "data-image",
    "data-src",
    "data-lazy-src",
    "data-original",
    "data-lazy",
];

static BARE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]+$").unwrap());
static LOADING_CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)skeleton|blur|placeholder").unwrap());

/// Pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct SanitizeOptions {
    /// Page the fragment came from; relative URLs resolve against it.
    pub base_url: Option<Url>,
    pub excluded_selectors: Vec<String>,
    pub resolve_lazy_images: bool,
    pub assign_tiers: bool,
    /// Previously cached HTML, source of carried-over image tiers.
    pub previous_html: Option<String>,
    pub render: Option<RenderReport>,
}

impl SanitizeOptions {
    /// Every step enabled, for refreshed content.
    pub fn refresh(base_url: Option<Url>) -> Self {
        Self {
            base_url,
            resolve_lazy_images: true,
            assign_tiers: true,
            ..Default::default()
        }
    }

    /// Capture already has a live styled page, so lazy images and tiering
    /// are left to the page.
    pub fn capture(base_url: Option<Url>) -> Self {
        Self {
            base_url,
            ..Default::default()
        }
    }

    pub fn with_exclusions(mut self, selectors: &[String]) -> Self {
        self.excluded_selectors = selectors.to_vec();
        self
    }

    pub fn with_previous_html(mut self, html: impl Into<String>) -> Self {
        self.previous_html = Some(html.into());
        self
    }

    pub fn with_render(mut self, report: RenderReport) -> Self {
        self.render = Some(report);
        self
    }
}

/// Runs the full pipeline and serializes the result.
pub fn sanitize(html: &str, opts: &SanitizeOptions) -> String {
    let mut frag = Fragment::parse(html);

    let metrics = match &opts.render {
        Some(report) => render::apply_render_report(&mut frag, report),
        None => HashMap::new(),
    };

    apply_exclusions(&mut frag, &opts.excluded_selectors);
    decor::remove_decorative(&mut frag);
    clean_progressive_images(&mut frag);
    rewrite_styles(&mut frag, styles::strip_dangerous_positioning);

    if let Some(base) = &opts.base_url {
        resolve_urls(&mut frag, base);
    }
    harden_anchors(&mut frag);

    if opts.resolve_lazy_images {
        promote_lazy_images(&mut frag, opts.base_url.as_ref());
    }
    rewrite_styles(&mut frag, styles::strip_cursor);

    if opts.assign_tiers {
        let previous = opts
            .previous_html
            .as_deref()
            .map(tiers::previous_tiers)
            .unwrap_or_default();
        tiers::assign_tiers(&mut frag, &metrics, &previous);
    }

    safe::clean(&frag.serialize())
}

/// True for selectors that are just a lowercase tag name, e.g. `div`.
pub fn is_bare_tag_selector(selector: &str) -> bool {
    BARE_TAG_RE.is_match(selector.trim())
}

/// Removes subtrees matching user exclusions. Bare tag names and selectors
/// that do not parse are skipped.
pub fn apply_exclusions(frag: &mut Fragment, selectors: &[String]) {
    for raw in selectors {
        let selector = raw.trim();
        if selector.is_empty() {
            continue;
        }
        if is_bare_tag_selector(selector) {
            warn!(selector, "skipping exclusion that names a bare tag");
            continue;
        }
        let Some(compiled) = get_or_compile(selector) else {
            warn!(selector, "skipping exclusion that does not parse");
            continue;
        };
        for id in frag.select_ids(&compiled) {
            frag.remove(id);
        }
    }
}

/// Drops `loading` and skeleton/blur/placeholder classes from images.
fn clean_progressive_images(frag: &mut Fragment) {
    let Some(sel) = get_or_compile("img") else {
        return;
    };
    let edits: Vec<(NodeId, bool, Option<Option<String>>)> = frag
        .select(&sel)
        .into_iter()
        .map(|img| {
            let has_loading = frag.attr(&img, "loading").is_some();
            let classes = frag.classes(&img);
            let kept: Vec<String> = classes
                .iter()
                .filter(|c| !LOADING_CLASS_RE.is_match(c))
                .cloned()
                .collect();
            let class_edit = (kept.len() != classes.len())
                .then(|| (!kept.is_empty()).then(|| kept.join(" ")));
            (img.id(), has_loading, class_edit)
        })
        .collect();

    for (id, has_loading, class_edit) in edits {
        if has_loading {
            frag.remove_attr(id, "loading");
        }
        match class_edit {
            Some(Some(class)) => frag.set_attr(id, "class", class),
            Some(None) => frag.remove_attr(id, "class"),
            None => {}
        }
    }
}

/// Applies a style rewrite to every element with a `style` attribute,
/// dropping the attribute when nothing is left.
fn rewrite_styles(frag: &mut Fragment, rewrite: fn(&str) -> Option<String>) {
    let Some(sel) = get_or_compile("[style]") else {
        return;
    };
    let edits: Vec<(NodeId, String)> = frag
        .select(&sel)
        .into_iter()
        .filter_map(|el| {
            let style = frag.attr(&el, "style")?;
            rewrite(&style).map(|s| (el.id(), s))
        })
        .collect();
    for (id, style) in edits {
        if style.trim().is_empty() {
            frag.remove_attr(id, "style");
        } else {
            frag.set_attr(id, "style", style);
        }
    }
}

fn resolve_urls(frag: &mut Fragment, base: &Url) {
    let targets: &[(&str, &str, fn(&Url, &str) -> Option<String>)] = &[
        ("a[href]", "href", urls::resolve_url),
        ("img[src]", "src", urls::resolve_url),
        ("img[srcset]", "srcset", urls::resolve_srcset),
        ("[style]", "style", urls::resolve_style_urls),
    ];
    for (css, attr, resolve) in targets {
        let Some(sel) = get_or_compile(css) else {
            continue;
        };
        let edits: Vec<(NodeId, String)> = frag
            .select(&sel)
            .into_iter()
            .filter_map(|el| {
                let value = frag.attr(&el, attr)?;
                resolve(base, &value).map(|v| (el.id(), v))
            })
            .collect();
        for (id, value) in edits {
            frag.set_attr(id, attr, value);
        }
    }
}

/// Every link opens in a new tab without an opener reference.
fn harden_anchors(frag: &mut Fragment) {
    let Some(sel) = get_or_compile("a") else {
        return;
    };
    for id in frag.select_ids(&sel) {
        frag.set_attr(id, "target", "_blank");
        frag.set_attr(id, "rel", "noopener noreferrer");
    }
}

fn promote_lazy_images(frag: &mut Fragment, base: Option<&Url>) {
    let Some(sel) = get_or_compile("img") else {
        return;
    };
    let edits: Vec<(NodeId, String)> = frag
        .select(&sel)
        .into_iter()
        .filter_map(|img| {
            let lazy = LAZY_SRC_ATTRS
                .iter()
                .filter_map(|a| frag.attr(&img, a))
                .map(|v| v.trim().to_string())
                .find(|v| urls::is_absolute_http(v))?;
            let lazy = match (base, lazy.starts_with("//")) {
                (Some(base), true) => urls::resolve_url(base, &lazy).unwrap_or(lazy),
                _ => lazy,
            };
            Some((img.id(), lazy))
        })
        .collect();
    for (id, src) in edits {
        frag.set_attr(id, "src", src);
    }
}
