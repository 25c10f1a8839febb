use std::f32::consts::{FRAC_PI_2, TAU};

use glam::Vec2;

use crate::{
    config::{RadialFillConfig, SpectrumConfig},
    render::{rgba, Primitive, Rect, Viewport},
    FrameFeatures, VisualParameterSet,
};

use super::SpectrumLayout;

const BAR_HEADROOM: f32 = 0.9;
const RADIAL_INNER: f32 = 0.22;
const RADIAL_SPAN: f32 = 0.26;

#[derive(Debug, Clone)]
pub struct SpectrumMode {
    bar_count: usize,
    layout: SpectrumLayout,
    bar_gap: f32,
    rotation: f32,
    mirror: bool,
    temporal_smoothing: f32,
    fill: Option<RadialFillConfig>,
    /// Radial heights drawn last frame.
    previous: Vec<f32>,
}

impl SpectrumMode {
    pub fn new(config: &SpectrumConfig) -> Self {
        Self {
            bar_count: config.bar_count.max(1),
            layout: config.layout,
            bar_gap: config.bar_gap,
            rotation: config.rotation_deg.to_radians(),
            mirror: config.mirror,
            temporal_smoothing: config.temporal_smoothing.clamp(0.0, 0.99),
            fill: config.fill.clone(),
            previous: Vec::new(),
        }
    }

    pub fn step(
        &mut self,
        params: &VisualParameterSet,
        features: &FrameFeatures,
        viewport: Viewport,
    ) -> Vec<Primitive> {
        let heights = resample_bands(&features.spectrum, self.bar_count);
        let color = rgba(params.primary_color, 1.0);
        match self.layout {
            SpectrumLayout::Bars => vec![Primitive::Bars {
                rects: self.bars(&heights, params.amplitude, viewport),
                color,
            }],
            SpectrumLayout::Radial => {
                let heights = self.radial_heights(heights);
                let spokes = radial_spokes(&heights, params.amplitude, viewport, self.rotation);
                let mut primitives = Vec::with_capacity(2);
                let fill = self.fill.as_ref().filter(|fill| features.envelope >= fill.threshold);
                if let Some(fill) = fill {
                    primitives.push(Primitive::Fill {
                        points: spokes.iter().map(|[_, tip]| *tip).collect(),
                        color: rgba(params.primary_color, fill.opacity),
                    });
                }
                primitives.push(Primitive::Segments {
                    segments: spokes,
                    color,
                    width: (viewport.min_side() * TAU * RADIAL_INNER / heights.len() as f32 * 0.5).max(1.0),
                });
                primitives
            }
        }
    }

    /// Mirrors, then blends with last frame's heights.
    fn radial_heights(&mut self, heights: Vec<f32>) -> Vec<f32> {
        let mut heights = if self.mirror { mirrored(&heights) } else { heights };
        if self.temporal_smoothing > 0.0 && self.previous.len() == heights.len() {
            let keep = self.temporal_smoothing;
            for (previous, height) in self.previous.iter().zip(heights.iter_mut()) {
                *height = keep * previous + (1.0 - keep) * *height;
            }
        }
        self.previous.clone_from(&heights);
        heights
    }

    fn bars(&self, heights: &[f32], amplitude: f32, viewport: Viewport) -> Vec<Rect> {
        let width = viewport.width as f32;
        let height = viewport.height as f32;
        let slot = width / heights.len() as f32;
        let inset = slot * self.bar_gap * 0.5;

        heights
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let bar = (value * amplitude * height * BAR_HEADROOM).clamp(0.0, height);
                Rect {
                    min: Vec2::new(i as f32 * slot + inset, height - bar),
                    max: Vec2::new((i + 1) as f32 * slot - inset, height),
                }
            })
            .collect()
    }
}

/// Resamples band magnitudes to `bars` values: averages when there are fewer
/// bars than bands, interpolates linearly when there are more.
pub fn resample_bands(bands: &[f32], bars: usize) -> Vec<f32> {
    let bars = bars.max(1);
    let count = bands.len();
    if count == 0 {
        return vec![0.0; bars];
    }
    if bars <= count {
        return (0..bars)
            .map(|i| {
                let start = i * count / bars;
                let end = ((i + 1) * count / bars).max(start + 1);
                let slice = &bands[start..end];
                slice.iter().sum::<f32>() / slice.len() as f32
            })
            .collect();
    }
    if count == 1 {
        return vec![bands[0]; bars];
    }

    let scale = (count - 1) as f32 / (bars - 1) as f32;
    (0..bars)
        .map(|i| {
            let position = i as f32 * scale;
            let lower = (position.floor() as usize).min(count - 1);
            let upper = (lower + 1).min(count - 1);
            let t = position - lower as f32;
            bands[lower] + (bands[upper] - bands[lower]) * t
        })
        .collect()
}

/// `values` followed by its interior in reverse, so a ring closes on itself:
/// `[a, b, c, d]` becomes `[a, b, c, d, c, b]`.
fn mirrored(values: &[f32]) -> Vec<f32> {
    let mut out = values.to_vec();
    if values.len() > 2 {
        out.extend(values[1..values.len() - 1].iter().rev());
    }
    out
}

/// One spoke per height, the first at 12 o'clock turned clockwise by `rotation` radians.
fn radial_spokes(heights: &[f32], amplitude: f32, viewport: Viewport, rotation: f32) -> Vec<[Vec2; 2]> {
    let center = viewport.center();
    let min_side = viewport.min_side();
    let inner = min_side * RADIAL_INNER;
    let max_outer = min_side * 0.5;

    heights
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let angle = TAU * i as f32 / heights.len() as f32 - FRAC_PI_2 + rotation;
            let direction = Vec2::from_angle(angle);
            let outer = (inner + value * amplitude * min_side * RADIAL_SPAN).min(max_outer);
            [center + direction * inner, center + direction * outer]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mapping::ParameterTable, ParameterConfig};

    #[test]
    fn aggregates_when_fewer_bars_than_bands() {
        let bands = [0.0, 1.0, 0.5, 0.5, 1.0, 1.0];
        assert_eq!(resample_bands(&bands, 3), vec![0.5, 0.5, 1.0]);
        assert_eq!(resample_bands(&bands, 6), bands.to_vec());
    }

    #[test]
    fn interpolates_when_more_bars_than_bands() {
        let bands = [0.0, 1.0];
        let bars = resample_bands(&bands, 5);
        assert_eq!(bars, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(resample_bands(&[0.3], 4), vec![0.3; 4]);
        assert_eq!(resample_bands(&[], 2), vec![0.0; 2]);
    }

    #[test]
    fn bars_fill_the_width_and_stay_on_screen() {
        let mode = SpectrumMode::new(&SpectrumConfig {
            bar_count: 10,
            bar_gap: 0.0,
            ..SpectrumConfig::default()
        });
        let viewport = Viewport::new(1000, 500);
        let rects = mode.bars(&[1.0; 10], 4.0, viewport);
        assert_eq!(rects.len(), 10);
        assert_eq!(rects[0].min.x, 0.0);
        assert_eq!(rects[9].max.x, 1000.0);
        assert!(rects.iter().all(|r| r.min.y >= 0.0 && r.max.y == 500.0));
    }

    #[test]
    fn radial_spokes_start_on_the_inner_ring() {
        let viewport = Viewport::new(800, 800);
        let spokes = radial_spokes(&[0.0, 0.5, 1.0, 0.25], 1.0, viewport, 0.0);
        let center = viewport.center();
        for [start, end] in spokes {
            assert!((start.distance(center) - 800.0 * RADIAL_INNER).abs() < 1e-3);
            assert!(end.distance(center) <= 400.0 + 1e-3);
        }
    }

    #[test]
    fn rotation_turns_the_first_spoke_clockwise() {
        let viewport = Viewport::new(800, 800);
        let center = viewport.center();
        let [_, upright] = radial_spokes(&[1.0, 1.0], 1.0, viewport, 0.0)[0];
        assert!((upright.x - center.x).abs() < 1e-3 && upright.y < center.y);

        let [_, turned] = radial_spokes(&[1.0, 1.0], 1.0, viewport, 90_f32.to_radians())[0];
        assert!(turned.x > center.x && (turned.y - center.y).abs() < 1e-3);
    }

    #[test]
    fn mirror_reflects_the_interior_bands() {
        assert_eq!(mirrored(&[1.0, 2.0, 3.0, 4.0]), vec![1.0, 2.0, 3.0, 4.0, 3.0, 2.0]);
        assert_eq!(mirrored(&[1.0, 2.0]), vec![1.0, 2.0]);

        let mut mode = SpectrumMode::new(&SpectrumConfig {
            mirror: true,
            temporal_smoothing: 0.0,
            ..SpectrumConfig::default()
        });
        assert_eq!(mode.radial_heights(vec![0.1, 0.2, 0.3]), vec![0.1, 0.2, 0.3, 0.2]);
    }

    #[test]
    fn temporal_smoothing_blends_with_the_previous_frame() {
        let mut mode = SpectrumMode::new(&SpectrumConfig {
            temporal_smoothing: 0.75,
            ..SpectrumConfig::default()
        });
        assert_eq!(mode.radial_heights(vec![1.0, 0.0]), vec![1.0, 0.0]);
        assert_eq!(mode.radial_heights(vec![0.0, 1.0]), vec![0.75, 0.25]);
        // A different length starts over.
        assert_eq!(mode.radial_heights(vec![0.5]), vec![0.5]);
    }

    #[test]
    fn radial_fill_follows_the_envelope_threshold() {
        let mut mode = SpectrumMode::new(&SpectrumConfig {
            bar_count: 8,
            layout: SpectrumLayout::Radial,
            fill: Some(RadialFillConfig {
                threshold: 0.5,
                opacity: 0.25,
            }),
            ..SpectrumConfig::default()
        });
        let params = ParameterTable::resolve(&ParameterConfig::default()).0.base_values();
        let viewport = Viewport::new(640, 480);
        let mut features = FrameFeatures::silent(32, 2048);

        features.envelope = 0.2;
        let quiet = mode.step(&params, &features, viewport);
        assert_eq!(quiet.len(), 1);
        assert!(matches!(quiet[0], Primitive::Segments { .. }));

        features.envelope = 0.8;
        let loud = mode.step(&params, &features, viewport);
        assert_eq!(loud.len(), 2);
        match &loud[0] {
            Primitive::Fill { points, color } => {
                assert_eq!(points.len(), 8);
                assert_eq!(color.w, 0.25);
            }
            other => panic!("expected the fill under the spokes, got {other:?}"),
        }
    }
}
