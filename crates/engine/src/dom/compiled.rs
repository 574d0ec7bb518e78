// ABOUTME: Pre-compiled CSS selector cache for O(1) selector lookup.
// ABOUTME: Stored artifact selectors and fixed marker lists are parsed once and reused.

//! Selector caching for efficient repeated DOM queries.
//!
//! Stored artifact selectors are queried on every refresh, and the sanitizer
//! queries the same fixed selector lists for every fragment. This module
//! compiles each selector once and reuses it for all subsequent queries.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use scraper::Selector;

/// Upper bound on cached selectors. Stored selectors come from user data, so
/// the cache is reset rather than allowed to grow with every artifact.
const MAX_CACHED_SELECTORS: usize = 1024;

/// Thread-safe cache of compiled CSS selectors. Only valid selectors are kept.
static SELECTOR_CACHE: Lazy<RwLock<HashMap<String, Selector>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Gets or compiles a CSS selector, caching the result.
///
/// Returns `Some(Selector)` if the selector is valid, `None` if invalid.
pub fn get_or_compile(css: &str) -> Option<Selector> {
    if let Some(cached) = SELECTOR_CACHE.read().get(css) {
        return Some(cached.clone());
    }

    let compiled = Selector::parse(css).ok()?;
    let mut cache = SELECTOR_CACHE.write();
    if cache.len() >= MAX_CACHED_SELECTORS && !cache.contains_key(css) {
        cache.clear();
    }
    cache.insert(css.to_string(), compiled.clone());
    Some(compiled)
}

#[cfg(test)]
fn is_cached(css: &str) -> bool {
    SELECTOR_CACHE.read().contains_key(css)
}

#[cfg(test)]
fn cached_len() -> usize {
    SELECTOR_CACHE.read().len()
}

/// Compiles a fixed list of selectors joined into one selector group.
/// Entries that fail to parse are skipped individually.
pub fn compile_list(selectors: &[&str]) -> Option<Selector> {
    let valid: Vec<&str> = selectors
        .iter()
        .copied()
        .filter(|s| get_or_compile(s).is_some())
        .collect();
    if valid.is_empty() {
        return None;
    }
    get_or_compile(&valid.join(", "))
}
