// ABOUTME: Artifact data model and the two split storage records it is persisted as.
// ABOUTME: Provides the split/join conversions keyed by artifact id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One captured widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub url: String,
    pub selector: String,
    #[serde(default, alias = "fingerprint")]
    pub heading_fingerprint: Option<String>,
    #[serde(default)]
    pub html_cache: String,
    #[serde(default)]
    pub excluded_selectors: Vec<String>,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refresh_paused: bool,
    #[serde(default)]
    pub custom_label: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub favicon: Option<String>,
}

impl Artifact {
    /// Label shown in progress reports: custom label, then name, then url.
    pub fn display_label(&self) -> &str {
        match self.custom_label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ if !self.name.trim().is_empty() => &self.name,
            _ => &self.url,
        }
    }

    /// Adds a selector to the exclusion list, keeping it a set.
    pub fn exclude(&mut self, selector: impl Into<String>) -> bool {
        let selector = selector.into();
        if self.excluded_selectors.iter().any(|s| *s == selector) {
            return false;
        }
        self.excluded_selectors.push(selector);
        true
    }

    /// Splits the artifact into its metadata and content records.
    pub fn split(&self) -> (SyncRecord, LocalRecord) {
        let sync = SyncRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            favicon: self.favicon.clone(),
            custom_label: self.custom_label.clone(),
            heading_fingerprint: self.heading_fingerprint.clone(),
            selector: self.selector.clone(),
            refresh_paused: self.refresh_paused,
            last_refresh: self.last_refresh,
        };
        let local = LocalRecord {
            selector: self.selector.clone(),
            html_cache: self.html_cache.clone(),
            last_refresh: self.last_refresh,
            excluded_selectors: self.excluded_selectors.clone(),
        };
        (sync, local)
    }
}

/// Metadata record kept in the small synchronized store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub custom_label: Option<String>,
    #[serde(default)]
    pub heading_fingerprint: Option<String>,
    pub selector: String,
    #[serde(default)]
    pub refresh_paused: bool,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Content record kept in the larger local store, keyed by artifact id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub selector: String,
    #[serde(default)]
    pub html_cache: String,
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    pub excluded_selectors: Vec<String>,
}

/// Merge-by-id join of the two storage tiers.
///
/// Sync order is preserved. A sync record without local content yields an
/// artifact with an empty cache. Local records without a sync record are
/// dropped. When both tiers carry a selector or refresh time, the newer
/// refresh wins; the tiers are not written atomically together.
pub fn join_records(sync: Vec<SyncRecord>, mut local: HashMap<String, LocalRecord>) -> Vec<Artifact> {
    let mut artifacts = Vec::with_capacity(sync.len());
    for record in sync {
        let content = local.remove(&record.id);
        let mut artifact = Artifact {
            id: record.id,
            url: record.url,
            selector: record.selector,
            heading_fingerprint: record.heading_fingerprint,
            last_refresh: record.last_refresh,
            refresh_paused: record.refresh_paused,
            custom_label: record.custom_label,
            name: record.name,
            favicon: record.favicon,
            ..Default::default()
        };
        if let Some(content) = content {
            let local_is_newer = match (content.last_refresh, artifact.last_refresh) {
                (Some(l), Some(s)) => l > s,
                (Some(_), None) => true,
                _ => false,
            };
            if local_is_newer {
                artifact.last_refresh = content.last_refresh;
                if !content.selector.is_empty() {
                    artifact.selector = content.selector;
                }
            }
            artifact.html_cache = content.html_cache;
            artifact.excluded_selectors = content.excluded_selectors;
        }
        artifacts.push(artifact);
    }
    for id in local.keys() {
        warn!(artifact = %id, "local content without metadata record, dropping");
    }
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Artifact {
        Artifact {
            id: "a1".to_string(),
            url: "https://a.com/b/c".to_string(),
            selector: "div.card".to_string(),
            heading_fingerprint: Some("Top Stories".to_string()),
            html_cache: "<div class=\"card\"><h2>Top Stories</h2></div>".to_string(),
            excluded_selectors: vec![".ad".to_string()],
            last_refresh: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            refresh_paused: false,
            custom_label: None,
            name: "Top Stories".to_string(),
            favicon: Some("https://a.com/favicon.ico".to_string()),
        }
    }

    #[test]
    fn split_then_join_restores_artifact() {
        let artifact = sample();
        let (sync, local) = artifact.split();
        let mut map = HashMap::new();
        map.insert(artifact.id.clone(), local);
        let joined = join_records(vec![sync], map);
        assert_eq!(joined, vec![artifact]);
    }

    #[test]
    fn join_keeps_sync_only_records() {
        let (sync, _) = sample().split();
        let joined = join_records(vec![sync], HashMap::new());
        assert_eq!(joined.len(), 1);
        assert!(joined[0].html_cache.is_empty());
        assert!(joined[0].excluded_selectors.is_empty());
    }

    #[test]
    fn join_drops_orphaned_local_records() {
        let (_, local) = sample().split();
        let mut map = HashMap::new();
        map.insert("orphan".to_string(), local);
        assert!(join_records(Vec::new(), map).is_empty());
    }

    #[test]
    fn join_prefers_newer_local_selector() {
        let artifact = sample();
        let (sync, mut local) = artifact.split();
        local.selector = "#healed".to_string();
        local.last_refresh = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let mut map = HashMap::new();
        map.insert(artifact.id.clone(), local);
        let joined = join_records(vec![sync], map);
        assert_eq!(joined[0].selector, "#healed");
    }

    #[test]
    fn serializes_with_camel_case_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("htmlCache").is_some());
        assert!(json.get("headingFingerprint").is_some());
        assert!(json.get("refreshPaused").is_some());
    }

    #[test]
    fn accepts_short_fingerprint_field_name() {
        let json = r#"{"id":"x","url":"https://a.com","selector":"p","fingerprint":"Hello"}"#;
        let artifact: Artifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.heading_fingerprint.as_deref(), Some("Hello"));
    }

    #[test]
    fn display_label_falls_back() {
        let mut artifact = sample();
        assert_eq!(artifact.display_label(), "Top Stories");
        artifact.custom_label = Some("Mine".to_string());
        assert_eq!(artifact.display_label(), "Mine");
        artifact.custom_label = None;
        artifact.name.clear();
        assert_eq!(artifact.display_label(), "https://a.com/b/c");
    }

    #[test]
    fn exclude_is_a_set() {
        let mut artifact = sample();
        assert!(!artifact.exclude(".ad"));
        assert!(artifact.exclude(".promo"));
        assert_eq!(artifact.excluded_selectors, vec![".ad", ".promo"]);
    }
}
