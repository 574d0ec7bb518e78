// ABOUTME: Final allowlist pass over sanitized widget markup, built on ammonia.
// ABOUTME: Keeps the markup the pipeline produces and strips active content and unsafe URLs.

use std::collections::{HashMap, HashSet};

use crate::dom::fragment::{table_context, wrap_in, UNSAFE_TAGS};
use crate::dom::Fragment;

/// Content and layout elements a widget may keep, SVG drawing included.
const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "address", "article", "aside", "audio", "b", "bdi", "bdo", "big", "blockquote",
    "br", "caption", "center", "cite", "code", "col", "colgroup", "data", "dd", "del", "details",
    "dfn", "div", "dl", "dt", "em", "figcaption", "figure", "font", "footer", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hgroup", "hr", "i", "img", "ins", "kbd", "li", "main", "mark",
    "nav", "ol", "p", "picture", "pre", "q", "rp", "rt", "ruby", "s", "samp", "section", "small",
    "source", "span", "strong", "sub", "summary", "sup", "table", "tbody", "td", "tfoot", "th",
    "thead", "time", "tr", "track", "u", "ul", "var", "video", "wbr",
    // svg
    "svg", "g", "defs", "symbol", "use", "path", "circle", "rect", "ellipse", "line",
    "polyline", "polygon", "text", "tspan", "image", "clipPath", "mask", "linearGradient",
    "radialGradient", "stop",
];

/// Attributes any allowed element may keep. Every attribute a pipeline step
/// reads is here, so a second run decides exactly like the first.
const ALLOWED_ATTRIBUTES: &[&str] = &[
    "class", "style", "id", "title", "alt", "href", "src", "srcset", "sizes", "width", "height",
    "target", "datetime", "colspan", "rowspan", "scope", "headers", "lang", "dir", "role",
    "poster", "controls", "type", "media", "start", "reversed", "value", "open",
    // svg
    "viewBox", "d", "fill", "stroke", "stroke-width", "stroke-linecap", "stroke-linejoin",
    "fill-rule", "clip-rule", "fill-opacity", "stroke-opacity", "opacity", "transform", "cx",
    "cy", "r", "rx", "ry", "x", "y", "x1", "y1", "x2", "y2", "points", "offset", "stop-color",
    "gradientUnits", "preserveAspectRatio", "clip-path",
];

const ALLOWED_ATTRIBUTE_PREFIXES: &[&str] = &["data-", "aria-"];

const URL_SCHEMES: &[&str] = &["http", "https", "mailto", "tel", "data"];

const LINK_REL: &str = "noopener noreferrer";

/// Runs the allowlist over serialized pipeline output.
///
/// `data:` URLs survive only as image sources. Anchors get
/// `rel="noopener noreferrer"`. Table-part fragments are cleaned inside
/// their table context so rows and cells survive.
pub fn clean(html: &str) -> String {
    let context = table_context(html);

    let mut builder = ammonia::Builder::new();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .clean_content_tags(UNSAFE_TAGS.iter().copied().collect::<HashSet<_>>())
        .tag_attributes(HashMap::new())
        .generic_attributes(ALLOWED_ATTRIBUTES.iter().copied().collect())
        .generic_attribute_prefixes(ALLOWED_ATTRIBUTE_PREFIXES.iter().copied().collect())
        .url_schemes(URL_SCHEMES.iter().copied().collect())
        .link_rel(Some(LINK_REL))
        .attribute_filter(|element, attribute, value| {
            let is_data = value.trim_start().get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"));
            if is_data && !(element == "img" && attribute == "src") {
                None
            } else {
                Some(value.into())
            }
        });

    let cleaned = builder.clean(&wrap_in(html, context)).to_string();
    Fragment::parse_wrapped(&cleaned, context).serialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn active_content_is_stripped() {
        let html = r#"<div><iframe srcdoc="<script>alert(1)</script>"></iframe><object data="x.swf"></object><embed src="x.swf"><meta http-equiv="refresh" content="0;url=https://evil"><base href="https://evil/"><style>body{position:fixed}</style><form action="https://evil"><input name="q"></form><p>Kept</p></div>"#;
        assert_eq!(clean(html), "<div><p>Kept</p></div>");
    }

    #[test]
    fn unsafe_urls_are_dropped() {
        let out = clean(r#"<a href="javascript:alert(1)">x</a><a href="data:text/html,hi">y</a>"#);
        assert!(!out.contains("javascript:"));
        assert!(!out.contains("data:"));
        assert!(out.contains(">x</a>"));
        assert_eq!(
            clean(r#"<img src="data:image/gif;base64,R0">"#),
            r#"<img src="data:image/gif;base64,R0" />"#
        );
    }

    #[test]
    fn pipeline_attributes_survive() {
        let html = r##"<a href="https://a.com/x" rel="noopener noreferrer" target="_blank">x</a><img class="hero" data-tier="icon" src="https://a.com/i.png" srcset="https://a.com/i2.png 2x" style="color: red" /><svg viewBox="0 0 10 10" width="10"><use href="#i"></use></svg>"##;
        assert_eq!(clean(html), html);
    }

    #[test]
    fn table_rows_survive_cleaning() {
        assert_eq!(
            clean("<tr><td>Arsenal</td><td>42</td></tr>"),
            "<tr><td>Arsenal</td><td>42</td></tr>"
        );
    }
}
