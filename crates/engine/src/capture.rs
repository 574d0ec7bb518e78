// ABOUTME: Capture entrypoint turning an element of a parsed page into a new artifact.
// ABOUTME: Synthesizes the selector, fingerprint, display name, favicon, and sanitized cache.

use scraper::{ElementRef, Html};
use url::Url;
use uuid::Uuid;

use crate::dom::get_or_compile;
use crate::dom::selector::synthesize_selector;
use crate::error::RefreshError;
use crate::fingerprint::{fingerprint_of, representative_text};
use crate::locate::select_candidates;
use crate::model::Artifact;
use crate::sanitize::{sanitize, SanitizeOptions};

/// Maximum display name length in characters.
pub const MAX_NAME_CHARS: usize = 80;

const OP: &str = "Capture";

/// Creates an artifact for `target`, an element of `doc` loaded from `page_url`.
pub fn capture_element(
    doc: &Html,
    target: ElementRef<'_>,
    page_url: &str,
) -> Result<Artifact, RefreshError> {
    let base = Url::parse(page_url).map_err(|e| {
        RefreshError::invalid_url(page_url, OP, Some(anyhow::anyhow!("invalid URL: {}", e)))
    })?;

    let synthesized = synthesize_selector(doc, target);
    if !synthesized.unique {
        tracing::debug!(selector = %synthesized.selector, "captured selector is not unique");
    }
    let html_cache = sanitize(&target.html(), &SanitizeOptions::capture(Some(base.clone())));
    let name = representative_text(target, MAX_NAME_CHARS)
        .or_else(|| page_title(doc))
        .unwrap_or_else(|| base.host_str().unwrap_or(page_url).to_string());

    Ok(Artifact {
        id: Uuid::new_v4().to_string(),
        url: page_url.to_string(),
        selector: synthesized.selector,
        heading_fingerprint: fingerprint_of(target),
        html_cache,
        name,
        favicon: favicon_url(doc, &base),
        ..Default::default()
    })
}

/// Parses `page` and captures the `nth` element matching `selector`.
pub fn capture_selector(
    page: &str,
    page_url: &str,
    selector: &str,
    nth: usize,
) -> Result<Artifact, RefreshError> {
    let doc = Html::parse_document(page);
    if get_or_compile(selector).is_none() {
        return Err(RefreshError::extract(
            page_url,
            OP,
            Some(anyhow::anyhow!("invalid selector {:?}", selector)),
        ));
    }
    let candidates = select_candidates(&doc, selector);
    let Some(target) = candidates.get(nth).copied() else {
        return Err(RefreshError::extract(
            page_url,
            OP,
            Some(anyhow::anyhow!(
                "selector {:?} matched {} element(s), wanted index {}",
                selector,
                candidates.len(),
                nth
            )),
        ));
    };
    capture_element(&doc, target, page_url)
}

fn page_title(doc: &Html) -> Option<String> {
    let sel = get_or_compile("title")?;
    doc.select(&sel)
        .next()
        .map(|t| crate::dom::element_text(&t))
        .filter(|t| !t.is_empty())
        .map(|t| crate::fingerprint::truncate_chars(&t, MAX_NAME_CHARS))
}

fn favicon_url(doc: &Html, base: &Url) -> Option<String> {
    let declared = get_or_compile(r#"link[rel~="icon"], link[rel="shortcut icon"]"#).and_then(|sel| {
        doc.select(&sel)
            .filter_map(|l| l.value().attr("href"))
            .find_map(|href| base.join(href.trim()).ok())
    });
    match declared {
        Some(url) => Some(url.to_string()),
        None if matches!(base.scheme(), "http" | "https") => {
            base.join("/favicon.ico").ok().map(String::from)
        }
        None => None,
    }
}
