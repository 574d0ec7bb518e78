// ABOUTME: Relative URL resolution for links, images, srcset candidates and inline style url() values.
// ABOUTME: Leaves absolute, data:, blob:, fragment, javascript:, mailto: and tel: references untouched.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

static STYLE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"]*))\s*\)"#).unwrap()
});

const UNTOUCHED_PREFIXES: &[&str] = &["data:", "blob:", "javascript:", "mailto:", "tel:", "#"];

/// Resolves `raw` against `base`. Returns `None` when the reference should
/// be left as it is.
pub fn resolve_url(base: &Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if UNTOUCHED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return None;
    }
    if !trimmed.starts_with("//") && Url::parse(trimmed).is_ok() {
        return None;
    }
    base.join(trimmed).ok().map(String::from)
}

/// Resolves every candidate URL of a `srcset`, keeping descriptors.
pub fn resolve_srcset(base: &Url, srcset: &str) -> Option<String> {
    if srcset.to_ascii_lowercase().contains("data:") {
        return None;
    }
    let mut changed = false;
    let candidates: Vec<String> = srcset
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|candidate| {
            let (url, descriptor) = match candidate.split_once(char::is_whitespace) {
                Some((u, d)) => (u, Some(d.trim())),
                None => (candidate, None),
            };
            let url = match resolve_url(base, url) {
                Some(resolved) => {
                    changed = true;
                    resolved
                }
                None => url.to_string(),
            };
            match descriptor {
                Some(d) if !d.is_empty() => format!("{} {}", url, d),
                _ => url,
            }
        })
        .collect();
    changed.then(|| candidates.join(", "))
}

/// Resolves `url(...)` references inside an inline style.
pub fn resolve_style_urls(base: &Url, style: &str) -> Option<String> {
    let mut changed = false;
    let rewritten = STYLE_URL_RE.replace_all(style, |caps: &Captures| {
        let (inner, quote) = if let Some(m) = caps.get(1) {
            (m.as_str(), "\"")
        } else if let Some(m) = caps.get(2) {
            (m.as_str(), "'")
        } else {
            (caps.get(3).map_or("", |m| m.as_str()), "")
        };
        match resolve_url(base, inner) {
            Some(resolved) => {
                changed = true;
                format!("url({q}{}{q})", resolved, q = quote)
            }
            None => caps[0].to_string(),
        }
    });
    changed.then(|| rewritten.into_owned())
}

/// True for `http(s)://` and protocol-relative URLs.
pub fn is_absolute_http(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://a.com/b/c").unwrap()
    }

    #[test]
    fn root_relative_and_dot_relative() {
        assert_eq!(resolve_url(&base(), "/x").as_deref(), Some("https://a.com/x"));
        assert_eq!(resolve_url(&base(), "./y").as_deref(), Some("https://a.com/b/y"));
        assert_eq!(resolve_url(&base(), "../z").as_deref(), Some("https://a.com/z"));
        assert_eq!(resolve_url(&base(), "w.png").as_deref(), Some("https://a.com/b/w.png"));
        assert_eq!(
            resolve_url(&base(), "//cdn.a.com/i.png").as_deref(),
            Some("https://cdn.a.com/i.png")
        );
    }

    #[test]
    fn special_schemes_untouched() {
        for raw in [
            "https://b.com/x",
            "data:image/png;base64,AAA",
            "blob:https://a.com/1",
            "#top",
            "javascript:void(0)",
            "mailto:me@a.com",
            "tel:123",
            "",
        ] {
            assert_eq!(resolve_url(&base(), raw), None, "{raw}");
        }
    }

    #[test]
    fn srcset_candidates_resolved() {
        assert_eq!(
            resolve_srcset(&base(), "/a.png 1x, b.png 2x").as_deref(),
            Some("https://a.com/a.png 1x, https://a.com/b/b.png 2x")
        );
        assert_eq!(resolve_srcset(&base(), "https://x.com/a.png 1x"), None);
    }

    #[test]
    fn style_urls_resolved_with_quotes_kept() {
        assert_eq!(
            resolve_style_urls(&base(), r#"background: url("/bg.png") no-repeat"#).as_deref(),
            Some(r#"background: url("https://a.com/bg.png") no-repeat"#)
        );
        assert_eq!(
            resolve_style_urls(&base(), "background-image:url( img/x.jpg )").as_deref(),
            Some("background-image:url(https://a.com/b/img/x.jpg)")
        );
        assert_eq!(resolve_style_urls(&base(), "color: red"), None);
    }
}
