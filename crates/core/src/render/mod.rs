//! Renderer-agnostic draw data. Everything here is plain geometry in pixel
//! space (origin top-left, y down); no GPU state is touched.

use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Output surface size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    pub fn center(&self) -> Vec2 {
        self.size() * 0.5
    }

    pub fn min_side(&self) -> f32 {
        self.width.min(self.height) as f32
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn from_center(center: Vec2, size: Vec2) -> Self {
        Self {
            min: center - size * 0.5,
            max: center + size * 0.5,
        }
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn contains_rect(&self, other: &Rect, tolerance: f32) -> bool {
        other.min.x >= self.min.x - tolerance
            && other.min.y >= self.min.y - tolerance
            && other.max.x <= self.max.x + tolerance
            && other.max.y <= self.max.y + tolerance
    }
}

/// A single particle as drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSprite {
    pub position: Vec2,
    pub size: f32,
    pub alpha: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Polyline {
        points: Vec<Vec2>,
        color: Vec4,
        width: f32,
        closed: bool,
    },
    Bars {
        rects: Vec<Rect>,
        color: Vec4,
    },
    /// Independent line segments, used by radial spectrum spokes.
    Segments {
        segments: Vec<[Vec2; 2]>,
        color: Vec4,
        width: f32,
    },
    Points {
        sprites: Vec<PointSprite>,
        color: Vec4,
    },
    /// Interior of a closed outline, drawn under the outline itself.
    Fill {
        points: Vec<Vec2>,
        color: Vec4,
    },
    /// Image drawn into `bounds` and masked by a disc: fully opaque inside
    /// `inner_radius`, fading to transparent at `outer_radius`.
    MaskedImage {
        image: String,
        bounds: Rect,
        center: Vec2,
        inner_radius: f32,
        outer_radius: f32,
    },
}

pub fn rgba(color: Vec3, alpha: f32) -> Vec4 {
    color.extend(alpha.clamp(0.0, 1.0))
}

/// Immutable snapshot of one frame. Ownership moves to the sink on emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawFrame {
    frame_index: u64,
    timestamp: f64,
    viewport: Viewport,
    primitives: Vec<Primitive>,
}

impl DrawFrame {
    pub fn new(frame_index: u64, timestamp: f64, viewport: Viewport, primitives: Vec<Primitive>) -> Self {
        Self {
            frame_index,
            timestamp,
            viewport,
            primitives,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    /// Number of particle sprites in the frame.
    pub fn particle_count(&self) -> usize {
        self.primitives
            .iter()
            .map(|primitive| match primitive {
                Primitive::Points { sprites, .. } => sprites.len(),
                _ => 0,
            })
            .sum()
    }
}
