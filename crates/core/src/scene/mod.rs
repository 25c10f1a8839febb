use serde::{Deserialize, Serialize};

use crate::{
    config::{CenterImageConfig, VisualConfig},
    render::{DrawFrame, Primitive, Viewport},
    FrameFeatures, VisualParameterSet,
};

mod feather;
mod particles;
mod spectrum;
mod waveform;

pub use feather::{feather_mask, FeatherMask};
pub use particles::{Particle, ParticleArena, ParticleField};
pub use spectrum::{resample_bands, SpectrumMode};
pub use waveform::WaveformMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualMode {
    #[default]
    Waveform,
    Spectrum,
    Particle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformRenderMode {
    #[default]
    Linear,
    Circular,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumLayout {
    #[default]
    Bars,
    Radial,
}

/// Per-mode engine. Every arm turns `(parameters, dt, features)` into
/// geometry for the current viewport.
#[derive(Debug, Clone)]
pub enum VisualSimulation {
    Waveform(WaveformMode),
    Spectrum(SpectrumMode),
    Particle(ParticleField),
}

impl VisualSimulation {
    pub fn from_config(config: &VisualConfig) -> Self {
        match config.mode {
            VisualMode::Waveform => Self::Waveform(WaveformMode::new(&config.waveform)),
            VisualMode::Spectrum => Self::Spectrum(SpectrumMode::new(&config.spectrum)),
            VisualMode::Particle => Self::Particle(ParticleField::new(&config.particles)),
        }
    }

    pub fn mode(&self) -> VisualMode {
        match self {
            Self::Waveform(_) => VisualMode::Waveform,
            Self::Spectrum(_) => VisualMode::Spectrum,
            Self::Particle(_) => VisualMode::Particle,
        }
    }

    pub fn step(
        &mut self,
        params: &VisualParameterSet,
        dt: f32,
        features: &FrameFeatures,
        viewport: Viewport,
    ) -> Vec<Primitive> {
        match self {
            Self::Waveform(mode) => mode.step(params, features, viewport),
            Self::Spectrum(mode) => mode.step(params, features, viewport),
            Self::Particle(field) => field.step(params, dt, viewport),
        }
    }
}

/// The active simulation plus the optional centre image layer, bound to an
/// output size.
#[derive(Debug, Clone)]
pub struct Scene {
    viewport: Viewport,
    simulation: VisualSimulation,
    center_image: Option<CenterImageConfig>,
}

impl Scene {
    /// Out-of-range options are clamped and logged.
    pub fn new(config: &VisualConfig) -> Self {
        let mut config = config.clone();
        let mut issues = Vec::new();
        config.sanitize(&mut issues);
        for issue in issues {
            tracing::warn!(%issue, "visual option clamped");
        }
        Self {
            viewport: Viewport::new(config.width, config.height),
            simulation: VisualSimulation::from_config(&config),
            center_image: config.center_image,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn simulation(&self) -> &VisualSimulation {
        &self.simulation
    }

    /// Advances the simulation by `dt` seconds and snapshots the result.
    pub fn render(
        &mut self,
        frame_index: u64,
        timestamp: f64,
        params: &VisualParameterSet,
        dt: f32,
        features: &FrameFeatures,
    ) -> DrawFrame {
        let mut primitives = self.simulation.step(params, dt, features, self.viewport);
        if let Some(image) = &self.center_image {
            let mask = feather_mask(image, self.viewport, params.feather_radius);
            primitives.push(mask.into_primitive(&image.path));
        }
        DrawFrame::new(frame_index, timestamp, self.viewport, primitives)
    }
}
