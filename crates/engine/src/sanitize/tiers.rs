// ABOUTME: Image presentation tiers and the pure size classifier behind them.
// ABOUTME: Tiers are stored in data-tier; previous tiers are carried over by image source.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ego_tree::NodeId;

use super::render::ImageMetrics;
use crate::dom::{get_or_compile, parse_in_context, Fragment};

/// Attribute the tier is stored in.
pub const TIER_ATTR: &str = "data-tier";

/// Presentation tier of an image, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTier {
    Icon,
    Small,
    Thumbnail,
    Medium,
    Preview,
}

impl ImageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageTier::Icon => "icon",
            ImageTier::Small => "small",
            ImageTier::Thumbnail => "thumbnail",
            ImageTier::Medium => "medium",
            ImageTier::Preview => "preview",
        }
    }
}

impl fmt::Display for ImageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icon" => Ok(ImageTier::Icon),
            "small" => Ok(ImageTier::Small),
            "thumbnail" => Ok(ImageTier::Thumbnail),
            "medium" => Ok(ImageTier::Medium),
            "preview" => Ok(ImageTier::Preview),
            other => Err(format!("unknown image tier: {}", other)),
        }
    }
}

/// Primitive inputs to the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierInputs {
    pub height: f64,
    pub image_area: f64,
    pub container_area: f64,
    /// Image area divided by container area, 0.0 to 1.0.
    pub area_ratio: f64,
}

impl TierInputs {
    pub fn from_metrics(m: &ImageMetrics) -> Self {
        let image_area = m.width * m.height;
        let container_area = m.container_width * m.container_height;
        let area_ratio = if container_area > 0.0 {
            image_area / container_area
        } else {
            0.0
        };
        Self {
            height: m.height,
            image_area,
            container_area,
            area_ratio,
        }
    }
}

/// Classifies an image by rendered size.
///
/// Height and image area decide the two smallest tiers. Past that the
/// area ratio decides, capped by the container's own area.
pub fn classify_tier(i: TierInputs) -> ImageTier {
    if i.height < 40.0 || i.image_area < 1600.0 {
        ImageTier::Icon
    } else if i.height < 70.0 || i.image_area < 4900.0 {
        ImageTier::Small
    } else if i.area_ratio < 0.10 {
        ImageTier::Small
    } else if i.area_ratio < 0.25 || i.container_area < 15_000.0 {
        ImageTier::Thumbnail
    } else if i.area_ratio < 0.50 || i.container_area < 40_000.0 {
        ImageTier::Medium
    } else {
        ImageTier::Preview
    }
}

/// Tiers assigned in previously cached HTML, keyed by image source.
pub fn previous_tiers(html: &str) -> HashMap<String, ImageTier> {
    let mut tiers = HashMap::new();
    let Some(sel) = get_or_compile("img[data-tier]") else {
        return tiers;
    };
    let (doc, _) = parse_in_context(html);
    for img in doc.select(&sel) {
        let (Some(src), Some(tier)) = (img.value().attr("src"), img.value().attr(TIER_ATTR)) else {
            continue;
        };
        if let Ok(tier) = tier.parse() {
            tiers.entry(src.to_string()).or_insert(tier);
        }
    }
    tiers
}

/// Tags every untagged image: previous tier by source first, then the
/// classifier when measurements exist.
pub fn assign_tiers(
    frag: &mut Fragment,
    metrics: &HashMap<NodeId, ImageMetrics>,
    previous: &HashMap<String, ImageTier>,
) {
    let Some(sel) = get_or_compile("img") else {
        return;
    };
    let assignments: Vec<(NodeId, ImageTier)> = frag
        .select(&sel)
        .into_iter()
        .filter(|img| frag.attr(img, TIER_ATTR).is_none())
        .filter_map(|img| {
            let carried = frag
                .attr(&img, "src")
                .and_then(|src| previous.get(&src).copied());
            let tier = carried.or_else(|| {
                metrics
                    .get(&img.id())
                    .map(|m| classify_tier(TierInputs::from_metrics(m)))
            })?;
            Some((img.id(), tier))
        })
        .collect();
    for (id, tier) in assignments {
        frag.set_attr(id, TIER_ATTR, tier.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measured(w: f64, h: f64, cw: f64, ch: f64) -> ImageTier {
        classify_tier(TierInputs::from_metrics(&ImageMetrics {
            width: w,
            height: h,
            container_width: cw,
            container_height: ch,
            ..Default::default()
        }))
    }

    #[test]
    fn thirty_pixel_image_is_icon_in_any_container() {
        assert_eq!(measured(30.0, 30.0, 40.0, 40.0), ImageTier::Icon);
        assert_eq!(measured(30.0, 30.0, 2000.0, 2000.0), ImageTier::Icon);
    }

    #[test]
    fn image_filling_sixty_percent_of_large_container_is_preview() {
        let inputs = TierInputs {
            height: 120.0,
            image_area: 120.0 * 120.0,
            container_area: 200.0 * 200.0,
            area_ratio: 0.60,
        };
        assert_eq!(classify_tier(inputs), ImageTier::Preview);
    }

    #[test]
    fn threshold_boundaries() {
        let base = TierInputs {
            height: 100.0,
            image_area: 10_000.0,
            container_area: 100_000.0,
            area_ratio: 0.6,
        };
        assert_eq!(classify_tier(TierInputs { height: 39.9, ..base }), ImageTier::Icon);
        assert_eq!(classify_tier(TierInputs { height: 40.0, ..base }), ImageTier::Small);
        assert_eq!(classify_tier(TierInputs { image_area: 1599.0, ..base }), ImageTier::Icon);
        assert_eq!(classify_tier(TierInputs { height: 69.0, ..base }), ImageTier::Small);
        assert_eq!(classify_tier(TierInputs { image_area: 4899.0, ..base }), ImageTier::Small);
        assert_eq!(classify_tier(TierInputs { area_ratio: 0.09, ..base }), ImageTier::Small);
        assert_eq!(classify_tier(TierInputs { area_ratio: 0.10, ..base }), ImageTier::Thumbnail);
        assert_eq!(classify_tier(TierInputs { area_ratio: 0.25, ..base }), ImageTier::Medium);
        assert_eq!(
            classify_tier(TierInputs { container_area: 14_999.0, ..base }),
            ImageTier::Thumbnail
        );
        assert_eq!(
            classify_tier(TierInputs { container_area: 39_999.0, ..base }),
            ImageTier::Medium
        );
        assert_eq!(classify_tier(TierInputs { area_ratio: 0.50, ..base }), ImageTier::Preview);
    }

    #[test]
    fn previous_tiers_keyed_by_src() {
        let tiers = previous_tiers(
            r#"<img src="https://a.com/1.png" data-tier="icon"><img src="https://a.com/2.png" data-tier="bogus"><img src="x">"#,
        );
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers.get("https://a.com/1.png"), Some(&ImageTier::Icon));
    }

    #[test]
    fn tagged_images_are_left_alone_and_previous_wins() {
        let mut frag = Fragment::parse(
            r#"<div><img src="a.png" data-tier="medium"><img src="b.png"><img src="c.png"></div>"#,
        );
        let ids = frag.select_ids(&get_or_compile("img").unwrap());
        let mut metrics = HashMap::new();
        for id in &ids {
            metrics.insert(
                *id,
                ImageMetrics {
                    width: 30.0,
                    height: 30.0,
                    ..Default::default()
                },
            );
        }
        let mut previous = HashMap::new();
        previous.insert("b.png".to_string(), ImageTier::Preview);
        assign_tiers(&mut frag, &metrics, &previous);
        assert_eq!(
            frag.serialize(),
            r#"<div><img data-tier="medium" src="a.png" /><img data-tier="preview" src="b.png" /><img data-tier="icon" src="c.png" /></div>"#
        );
    }
}
