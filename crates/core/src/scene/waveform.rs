use std::f32::consts::{FRAC_PI_2, TAU};

use glam::Vec2;

use crate::{
    config::{RadialFillConfig, WaveformConfig},
    render::{rgba, Primitive, Viewport},
    FrameFeatures, VisualParameterSet,
};

use super::WaveformRenderMode;

const LINEAR_HEADROOM: f32 = 0.45;
const CIRCLE_BASE_RADIUS: f32 = 0.28;
const CIRCLE_SWING: f32 = 0.22;
const MAX_RING_SEGMENTS: usize = 720;

#[derive(Debug, Clone)]
pub struct WaveformMode {
    render_mode: WaveformRenderMode,
    line_width: f32,
    rotation: f32,
    fill: Option<RadialFillConfig>,
}

impl WaveformMode {
    pub fn new(config: &WaveformConfig) -> Self {
        Self {
            render_mode: config.render_mode,
            line_width: config.line_width,
            rotation: config.rotation_deg.to_radians(),
            fill: config.fill.clone(),
        }
    }

    pub fn step(
        &mut self,
        params: &VisualParameterSet,
        features: &FrameFeatures,
        viewport: Viewport,
    ) -> Vec<Primitive> {
        let color = rgba(params.primary_color, 1.0);
        match self.render_mode {
            WaveformRenderMode::Linear => vec![Primitive::Polyline {
                points: linear_path(&features.samples, params.amplitude, viewport),
                color,
                width: self.line_width,
                closed: false,
            }],
            WaveformRenderMode::Circular => {
                let points = ring_path(
                    &features.samples,
                    params.amplitude,
                    features.envelope,
                    viewport,
                    self.rotation,
                );
                let mut primitives = Vec::with_capacity(2);
                let fill = self.fill.as_ref().filter(|fill| features.envelope >= fill.threshold);
                if let Some(fill) = fill {
                    primitives.push(Primitive::Fill {
                        points: points.clone(),
                        color: rgba(params.primary_color, fill.opacity),
                    });
                }
                primitives.push(Primitive::Polyline {
                    points,
                    color,
                    width: self.line_width,
                    closed: true,
                });
                primitives
            }
        }
    }
}

/// Samples mapped across the real output width: the first point sits at
/// x = 0 and the last at x = width, whatever the aspect ratio.
pub(crate) fn linear_path(samples: &[f32], amplitude: f32, viewport: Viewport) -> Vec<Vec2> {
    let width = viewport.width as f32;
    let height = viewport.height as f32;
    let mid = height * 0.5;

    if samples.len() < 2 {
        return vec![Vec2::new(0.0, mid), Vec2::new(width, mid)];
    }

    let swing = mid * LINEAR_HEADROOM * amplitude;
    let last_sample = (samples.len() - 1) as f32;
    let count = (viewport.width as usize + 1).min(samples.len()).max(2);
    let last_point = (count - 1) as f32;

    (0..count)
        .map(|j| {
            let u = j as f32 / last_point;
            let index = (u * last_sample).round() as usize;
            let value = samples[index.min(samples.len() - 1)].clamp(-1.0, 1.0);
            let y = (mid - value * swing).clamp(0.0, height);
            Vec2::new(u * width, y)
        })
        .collect()
}

/// Closed ring around the centre starting at 12 o'clock, turned clockwise by
/// `rotation` radians.
fn ring_path(
    samples: &[f32],
    amplitude: f32,
    envelope: f32,
    viewport: Viewport,
    rotation: f32,
) -> Vec<Vec2> {
    let center = viewport.center();
    let min_side = viewport.min_side();
    let base_radius = min_side * CIRCLE_BASE_RADIUS;
    let swing = min_side * CIRCLE_SWING * amplitude * (0.5 + 0.6 * envelope.clamp(0.0, 1.0));

    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let segments = n.min(MAX_RING_SEGMENTS);
    let max_radius = min_side * 0.5;

    (0..segments)
        .map(|j| {
            let index = j * n / segments;
            let angle = TAU * j as f32 / segments as f32 - FRAC_PI_2 + rotation;
            let value = samples[index].clamp(-1.0, 1.0);
            let radius = (base_radius + value * swing).clamp(0.0, max_radius);
            center + Vec2::from_angle(angle) * radius
        })
        .collect()
}
