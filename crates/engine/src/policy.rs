// ABOUTME: Site policy deciding which URLs skip straight to active-tab extraction.
// ABOUTME: Default registry is loaded from embedded JSON keyed by domain.

//! Per-site extraction policy.
//!
//! Some sites only render their widgets in a focused tab. A [`TabPolicy`]
//! names them so the refresh engine does not waste the earlier stages.

use std::collections::HashSet;

use serde::Deserialize;

/// Embedded list of sites that need a focused tab.
const BUILTIN_POLICIES_JSON: &str = include_str!("../data/site_policies.json");

/// Decides whether a URL must go directly to active-tab extraction.
pub trait TabPolicy: Send + Sync {
    fn requires_active_tab(&self, url: &str) -> bool;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePolicy {
    pub domain: String,
    #[serde(default)]
    pub active_tab: bool,
}

/// Domain-keyed policy registry. A domain also covers its subdomains.
#[derive(Debug, Clone, Default)]
pub struct SitePolicyRegistry {
    active_tab_domains: HashSet<String>,
}

impl SitePolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, policy: SitePolicy) {
        if policy.active_tab {
            self.active_tab_domains
                .insert(policy.domain.trim().to_lowercase());
        }
    }

    pub fn len(&self) -> usize {
        self.active_tab_domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_tab_domains.is_empty()
    }
}

impl TabPolicy for SitePolicyRegistry {
    fn requires_active_tab(&self, url: &str) -> bool {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
        else {
            return false;
        };
        self.active_tab_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }
}

/// Loads the builtin registry from embedded JSON.
///
/// # Panics
///
/// Panics if the embedded JSON is malformed.
pub fn load_builtin_policies() -> SitePolicyRegistry {
    let policies: Vec<SitePolicy> =
        serde_json::from_str(BUILTIN_POLICIES_JSON).expect("failed to parse builtin site policies");
    let mut registry = SitePolicyRegistry::new();
    for policy in policies {
        registry.register(policy);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_loads_and_is_inert() {
        let registry = load_builtin_policies();
        assert!(registry.is_empty());
        assert!(!registry.requires_active_tab("https://www.example.com/"));
    }

    #[test]
    fn registered_domain_covers_subdomains() {
        let mut registry = SitePolicyRegistry::new();
        registry.register(SitePolicy {
            domain: "Example.com".to_string(),
            active_tab: true,
        });
        registry.register(SitePolicy {
            domain: "other.com".to_string(),
            active_tab: false,
        });
        assert_eq!(registry.len(), 1);
        assert!(registry.requires_active_tab("https://example.com/x"));
        assert!(registry.requires_active_tab("https://news.example.com/"));
        assert!(!registry.requires_active_tab("https://notexample.com/"));
        assert!(!registry.requires_active_tab("https://other.com/"));
        assert!(!registry.requires_active_tab("not a url"));
    }
}
