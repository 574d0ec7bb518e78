// ABOUTME: Render side table computed inside a live tab and applied to the detached copy.
// ABOUTME: Carries hidden element indices and rendered image measurements keyed by document order.

use std::collections::HashMap;

use ego_tree::NodeId;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dom::Fragment;

/// Rendered size of one image and its nearest container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetrics {
    /// Element index in document order, the extracted element being 0.
    pub index: usize,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub container_width: f64,
    #[serde(default)]
    pub container_height: f64,
    #[serde(default)]
    pub src: String,
}

/// What the in-page extraction script reports back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReport {
    pub found: bool,
    #[serde(default)]
    pub match_count: usize,
    #[serde(default)]
    pub html: String,
    /// Number of elements in the extracted subtree, root included.
    #[serde(default)]
    pub element_count: usize,
    /// Indices of elements computed as `display: none`.
    #[serde(default)]
    pub hidden: Vec<usize>,
    #[serde(default)]
    pub images: Vec<ImageMetrics>,
}

impl RenderReport {
    /// Number of `img` elements in the reported HTML.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// Elements of the fragment in the same order the page script numbers them.
fn indexed_elements(frag: &Fragment) -> Vec<ElementRef<'_>> {
    frag.root()
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .collect()
}

/// Removes hidden elements and returns image measurements keyed by node.
///
/// When the reparsed fragment does not have the element count the page
/// reported, indices cannot be trusted and the side table is ignored.
pub fn apply_render_report(frag: &mut Fragment, report: &RenderReport) -> HashMap<NodeId, ImageMetrics> {
    let ids: Vec<NodeId> = indexed_elements(frag).iter().map(|el| el.id()).collect();
    if report.element_count != 0 && report.element_count != ids.len() {
        warn!(
            reported = report.element_count,
            parsed = ids.len(),
            "render side table does not line up with parsed html, ignoring"
        );
        return HashMap::new();
    }

    for index in &report.hidden {
        // The extracted root itself is never dropped.
        if *index == 0 {
            continue;
        }
        if let Some(id) = ids.get(*index) {
            frag.remove(*id);
        }
    }

    report
        .images
        .iter()
        .filter_map(|m| ids.get(m.index).map(|id| (*id, m.clone())))
        .collect()
}
