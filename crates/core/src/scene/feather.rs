use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::{
    config::CenterImageConfig,
    render::{Primitive, Rect, Viewport},
};

/// Radial soft mask applied to the centre image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatherMask {
    pub bounds: Rect,
    pub center: Vec2,
    pub inner_radius: f32,
    pub outer_radius: f32,
}

impl FeatherMask {
    /// Bounding box of the soft disc.
    pub fn disc(&self) -> Rect {
        Rect::from_center(self.center, Vec2::splat(self.outer_radius * 2.0))
    }

    pub fn into_primitive(self, image: &str) -> Primitive {
        Primitive::MaskedImage {
            image: image.to_owned(),
            bounds: self.bounds,
            center: self.center,
            inner_radius: self.inner_radius,
            outer_radius: self.outer_radius,
        }
    }
}

/// Places the image in the middle of the viewport (its longest side scaled to
/// `size_ratio` of the shorter viewport side) and derives the mask radii.
///
/// The soft edge is centred on the mask radius. It never reaches past the
/// image's own half-extent: an oversized feather is clamped, not extrapolated.
pub fn feather_mask(image: &CenterImageConfig, viewport: Viewport, feather_radius: f32) -> FeatherMask {
    let center = viewport.center();
    let native = Vec2::new(image.width.max(1) as f32, image.height.max(1) as f32);
    let scale = viewport.min_side() * image.size_ratio / native.max_element();
    let size = native * scale;
    let bounds = Rect::from_center(center, size);

    let half_extent = (size.min_element() * 0.5).max(0.0);
    let mask_radius = (half_extent * image.mask_ratio).clamp(0.0, half_extent);
    let feather = if feather_radius.is_finite() {
        feather_radius.clamp(0.0, half_extent)
    } else {
        0.0
    };

    let outer_radius = (mask_radius + feather * 0.5).min(half_extent);
    let inner_radius = (outer_radius - feather).max(0.0);

    FeatherMask {
        bounds,
        center,
        inner_radius,
        outer_radius,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> CenterImageConfig {
        CenterImageConfig {
            path: "cover.png".into(),
            width,
            height,
            ..CenterImageConfig::default()
        }
    }

    #[test]
    fn mask_stays_inside_the_image_for_any_feather() {
        let viewports = [Viewport::new(1920, 1080), Viewport::new(1080, 1920), Viewport::new(640, 640)];
        let images = [image(512, 512), image(800, 300), image(300, 900)];
        for viewport in viewports {
            for img in &images {
                for feather in [0.0, 4.0, 32.0, 256.0, 10_000.0, f32::INFINITY] {
                    let mask = feather_mask(img, viewport, feather);
                    assert!(mask.inner_radius >= 0.0);
                    assert!(mask.inner_radius <= mask.outer_radius);
                    assert!(
                        mask.bounds.contains_rect(&mask.disc(), 1e-3),
                        "feather {feather} escapes {:?}",
                        mask.bounds
                    );
                }
            }
        }
    }

    #[test]
    fn image_scales_with_the_shorter_viewport_side() {
        let mask = feather_mask(&image(512, 256), Viewport::new(1920, 1000), 0.0);
        let size = mask.bounds.size();
        assert!((size.x - 440.0).abs() < 1e-3);
        assert!((size.y - 220.0).abs() < 1e-3);
        assert_eq!(mask.center, Vec2::new(960.0, 500.0));
    }

    #[test]
    fn zero_feather_is_a_hard_edge() {
        let mask = feather_mask(&image(512, 512), Viewport::new(1000, 1000), 0.0);
        assert_eq!(mask.inner_radius, mask.outer_radius);
        assert!((mask.outer_radius - 220.0).abs() < 1e-3);
    }

    #[test]
    fn feather_softens_inward_at_full_mask() {
        let mask = feather_mask(&image(512, 512), Viewport::new(1000, 1000), 40.0);
        assert!((mask.outer_radius - 220.0).abs() < 1e-3);
        assert!((mask.inner_radius - 180.0).abs() < 1e-3);
    }

    #[test]
    fn negative_size_collapses_to_an_empty_mask() {
        let img = CenterImageConfig {
            size_ratio: -0.5,
            ..image(512, 512)
        };
        let mask = feather_mask(&img, Viewport::new(1000, 1000), 40.0);
        assert_eq!(mask.inner_radius, 0.0);
        assert_eq!(mask.outer_radius, 0.0);
    }
}
