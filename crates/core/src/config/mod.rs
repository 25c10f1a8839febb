use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    mapping::ParameterConfig,
    scene::{SpectrumLayout, VisualMode, WaveformRenderMode},
    ConfigRangeError, Result,
};

/// Sample rates the analysis chain accepts, in Hz.
pub const SAMPLE_RATE_RANGE: (u32, u32) = (8_000, 192_000);

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub visual: VisualConfig,
    pub live: LiveConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    /// Reads a TOML (or `.json`) configuration file and clamps every value
    /// into its declared range. Clamped values are logged, never fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: AppConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => toml::from_str(&text)?,
        };

        let issues = config.sanitize();
        for issue in &issues {
            tracing::warn!(%issue, "configuration value clamped");
        }
        tracing::info!(path = %path.display(), clamped = issues.len(), "configuration loaded");
        Ok(config)
    }

    /// Clamps every numeric option into range and returns what had to move.
    pub fn sanitize(&mut self) -> Vec<ConfigRangeError> {
        let mut issues = Vec::new();
        self.audio.sanitize(&mut issues);
        let nyquist = self.audio.sample_rate as f32 * 0.5;
        self.analysis.sanitize(nyquist, &mut issues);
        self.visual.sanitize(&mut issues);
        self.live.sanitize(&mut issues);
        self.export.sanitize(&mut issues);
        issues
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Analysis window length in samples.
    pub window_size: usize,
    /// New samples consumed per analysis step.
    pub hop_size: usize,
    /// How much unread audio the live feed keeps before dropping the oldest.
    pub live_buffer_seconds: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            window_size: 2048,
            hop_size: 1024,
            live_buffer_seconds: 2.0,
        }
    }
}

impl AudioConfig {
    fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        let (min_rate, max_rate) = SAMPLE_RATE_RANGE;
        clamp_field("audio.sample_rate", &mut self.sample_rate, min_rate, max_rate, issues);
        clamp_field("audio.window_size", &mut self.window_size, 64, 16_384, issues);
        clamp_field("audio.hop_size", &mut self.hop_size, 16, self.window_size, issues);
        clamp_field("audio.live_buffer_seconds", &mut self.live_buffer_seconds, 0.1, 30.0, issues);
    }

    pub fn hop_seconds(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub attack_ms: f32,
    pub release_ms: f32,
    pub band_count: usize,
    /// Explicit band edges in Hz. Overrides `band_count`, `min_hz` and `max_hz`.
    pub band_edges: Option<Vec<f32>>,
    pub min_hz: f32,
    pub max_hz: f32,
    /// Magnitude mapped to zero on the normalised band scale.
    pub floor_db: f32,
    /// One-pole smoothing applied to spectral flux, 0 disables it.
    pub flux_smoothing: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            attack_ms: 10.0,
            release_ms: 250.0,
            band_count: 32,
            band_edges: None,
            min_hz: 30.0,
            max_hz: 16_000.0,
            floor_db: -60.0,
            flux_smoothing: 0.9,
        }
    }
}

impl AnalysisConfig {
    fn sanitize(&mut self, nyquist: f32, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("analysis.attack_ms", &mut self.attack_ms, 0.1, 5_000.0, issues);
        clamp_field("analysis.release_ms", &mut self.release_ms, 0.1, 10_000.0, issues);
        clamp_field("analysis.band_count", &mut self.band_count, 1, 256, issues);
        clamp_field("analysis.min_hz", &mut self.min_hz, 1.0, nyquist, issues);
        clamp_field("analysis.max_hz", &mut self.max_hz, self.min_hz, nyquist, issues);
        clamp_field("analysis.floor_db", &mut self.floor_db, -160.0, -6.0, issues);
        clamp_field("analysis.flux_smoothing", &mut self.flux_smoothing, 0.0, 0.999, issues);

        if let Some(edges) = self.band_edges.as_mut() {
            for (index, edge) in edges.iter_mut().enumerate() {
                clamp_field(&format!("analysis.band_edges[{index}]"), edge, 1.0, nyquist, issues);
            }
            edges.sort_by(f32::total_cmp);
            edges.dedup();
            if edges.len() < 2 {
                tracing::warn!(
                    edges = edges.len(),
                    "band_edges needs at least two distinct edges, using log-spaced bands"
                );
                self.band_edges = None;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub mode: VisualMode,
    /// Output frame size in pixels.
    pub width: u32,
    pub height: u32,
    pub waveform: WaveformConfig,
    pub spectrum: SpectrumConfig,
    pub particles: ParticleConfig,
    pub center_image: Option<CenterImageConfig>,
    pub parameters: ParameterConfig,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            mode: VisualMode::Waveform,
            width: 1920,
            height: 1080,
            waveform: WaveformConfig::default(),
            spectrum: SpectrumConfig::default(),
            particles: ParticleConfig::default(),
            center_image: None,
            parameters: ParameterConfig::default(),
        }
    }
}

impl VisualConfig {
    pub(crate) fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("visual.width", &mut self.width, 16, 8192, issues);
        clamp_field("visual.height", &mut self.height, 16, 8192, issues);
        self.waveform.sanitize(issues);
        self.spectrum.sanitize(issues);
        self.particles.sanitize(issues);
        if let Some(image) = self.center_image.as_mut() {
            image.sanitize(issues);
        }
        self.parameters.sanitize(issues);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    pub render_mode: WaveformRenderMode,
    pub line_width: f32,
    /// Clockwise rotation of the circular ring, in degrees. The ring starts at 12 o'clock.
    pub rotation_deg: f32,
    pub fill: Option<RadialFillConfig>,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            render_mode: WaveformRenderMode::Linear,
            line_width: 2.0,
            rotation_deg: 0.0,
            fill: None,
        }
    }
}

impl WaveformConfig {
    fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("visual.waveform.line_width", &mut self.line_width, 0.5, 32.0, issues);
        clamp_field("visual.waveform.rotation_deg", &mut self.rotation_deg, -360.0, 360.0, issues);
        if let Some(fill) = self.fill.as_mut() {
            fill.sanitize("visual.waveform.fill", issues);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Number of bars drawn, independent of the analysis band count.
    pub bar_count: usize,
    pub layout: SpectrumLayout,
    /// Fraction of each bar slot left empty.
    pub bar_gap: f32,
    /// Radial layout only: clockwise rotation in degrees.
    pub rotation_deg: f32,
    /// Radial layout only: draws the bands low to high and back again so the
    /// ring is symmetric about its start.
    pub mirror: bool,
    /// Radial layout only: weight of the previous frame's heights, 0 disables.
    pub temporal_smoothing: f32,
    /// Radial layout only.
    pub fill: Option<RadialFillConfig>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            bar_count: 64,
            layout: SpectrumLayout::Bars,
            bar_gap: 0.2,
            rotation_deg: 0.0,
            mirror: false,
            temporal_smoothing: 0.3,
            fill: None,
        }
    }
}

impl SpectrumConfig {
    fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("visual.spectrum.bar_count", &mut self.bar_count, 1, 1024, issues);
        clamp_field("visual.spectrum.bar_gap", &mut self.bar_gap, 0.0, 0.9, issues);
        clamp_field("visual.spectrum.rotation_deg", &mut self.rotation_deg, -360.0, 360.0, issues);
        clamp_field(
            "visual.spectrum.temporal_smoothing",
            &mut self.temporal_smoothing,
            0.0,
            0.99,
            issues,
        );
        if let Some(fill) = self.fill.as_mut() {
            fill.sanitize("visual.spectrum.fill", issues);
        }
    }
}

/// Translucent fill inside a closed radial outline, shown only while the
/// envelope is at or above `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialFillConfig {
    pub threshold: f32,
    pub opacity: f32,
}

impl Default for RadialFillConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            opacity: 0.19,
        }
    }
}

impl RadialFillConfig {
    fn sanitize(&mut self, prefix: &str, issues: &mut Vec<ConfigRangeError>) {
        clamp_field(&format!("{prefix}.threshold"), &mut self.threshold, 0.0, 1.0, issues);
        clamp_field(&format!("{prefix}.opacity"), &mut self.opacity, 0.0, 1.0, issues);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    /// Population cap; the oldest particle is evicted when it is exceeded.
    pub max_particles: usize,
    pub lifetime_seconds: f32,
    /// Random fraction removed from each particle's lifetime.
    pub lifetime_jitter: f32,
    /// Exponential velocity decay per second.
    pub drag: f32,
    pub seed: u64,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            max_particles: 2000,
            lifetime_seconds: 2.5,
            lifetime_jitter: 0.3,
            drag: 0.6,
            seed: 0x5eed_a0e0,
        }
    }
}

impl ParticleConfig {
    fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("visual.particles.max_particles", &mut self.max_particles, 1, 100_000, issues);
        clamp_field("visual.particles.lifetime_seconds", &mut self.lifetime_seconds, 0.05, 60.0, issues);
        clamp_field("visual.particles.lifetime_jitter", &mut self.lifetime_jitter, 0.0, 1.0, issues);
        clamp_field("visual.particles.drag", &mut self.drag, 0.0, 20.0, issues);
    }
}

/// Image composited at the centre of the frame behind a feathered mask. Only
/// the pixel size is needed here, decoding happens in the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterImageConfig {
    pub path: String,
    pub width: u32,
    pub height: u32,
    /// Longest displayed image side relative to the shorter frame side.
    pub size_ratio: f32,
    /// Mask radius relative to half the shorter displayed image side.
    pub mask_ratio: f32,
}

impl Default for CenterImageConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            width: 512,
            height: 512,
            size_ratio: 0.44,
            mask_ratio: 1.0,
        }
    }
}

impl CenterImageConfig {
    fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("visual.center_image.width", &mut self.width, 1, 16_384, issues);
        clamp_field("visual.center_image.height", &mut self.height, 1, 16_384, issues);
        clamp_field("visual.center_image.size_ratio", &mut self.size_ratio, 0.05, 1.0, issues);
        clamp_field("visual.center_image.mask_ratio", &mut self.mask_ratio, 0.05, 1.0, issues);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub fps: u32,
    /// Undelivered frames kept for the renderer; the oldest is replaced when full.
    pub queue_depth: usize,
    pub render_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            queue_depth: 2,
            render_timeout_ms: 50,
        }
    }
}

impl LiveConfig {
    fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("live.fps", &mut self.fps, 1, 240, issues);
        clamp_field("live.queue_depth", &mut self.queue_depth, 1, 64, issues);
        clamp_field("live.render_timeout_ms", &mut self.render_timeout_ms, 1, 5_000, issues);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub fps: u32,
    /// Requested length. Defaults to the length of the audio track.
    pub duration_seconds: Option<f64>,
    /// Frames buffered ahead of the encoder before generation blocks.
    pub queue_depth: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            duration_seconds: None,
            queue_depth: 8,
        }
    }
}

impl ExportConfig {
    fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        clamp_field("export.fps", &mut self.fps, 1, 240, issues);
        clamp_field("export.queue_depth", &mut self.queue_depth, 1, 256, issues);
        if let Some(duration) = self.duration_seconds.as_mut() {
            clamp_field("export.duration_seconds", duration, 0.0, 86_400.0, issues);
        }
    }
}

/// Numeric types that can be range-checked through [`ConfigRangeError::check`].
pub(crate) trait RangeValue: Copy {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! range_value {
    ($($ty:ty),*) => {
        $(impl RangeValue for $ty {
            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }
        })*
    };
}

range_value!(u32, u64, usize, f32, f64);

pub(crate) fn clamp_field<T: RangeValue>(
    field: &str,
    value: &mut T,
    min: T,
    max: T,
    issues: &mut Vec<ConfigRangeError>,
) {
    let checked = ConfigRangeError::check(field, value.to_f64(), min.to_f64(), max.to_f64(), issues);
    *value = T::from_f64(checked);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_already_in_range() {
        let mut config = AppConfig::default();
        assert!(config.sanitize().is_empty());
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn clamps_out_of_range_values_and_reports_them() {
        let mut config = AppConfig::default();
        config.audio.hop_size = 4096;
        config.visual.particles.max_particles = 0;
        config.export.fps = 1000;

        let issues = config.sanitize();
        assert_eq!(config.audio.hop_size, config.audio.window_size);
        assert_eq!(config.visual.particles.max_particles, 1);
        assert_eq!(config.export.fps, 240);
        assert_eq!(issues.len(), 3);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let text = r#"
            [visual]
            mode = "particle"
            width = 1280
            height = 720

            [visual.parameters.emission_rate]
            base = 120.0
            sensitivity = 0.0

            [export]
            fps = 24
        "#;
        let mut config: AppConfig = toml::from_str(text).unwrap();
        assert!(config.sanitize().is_empty());
        assert_eq!(config.visual.mode, VisualMode::Particle);
        assert_eq!(config.visual.width, 1280);
        assert_eq!(config.visual.parameters.emission_rate.base, 120.0);
        assert_eq!(config.export.fps, 24);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn degenerate_band_edges_fall_back_to_log_bands() {
        let mut config = AppConfig::default();
        config.analysis.band_edges = Some(vec![100.0, 100.0]);
        config.sanitize();
        assert!(config.analysis.band_edges.is_none());

        config.analysis.band_edges = Some(vec![4000.0, 60.0, 250.0]);
        config.sanitize();
        assert_eq!(config.analysis.band_edges, Some(vec![60.0, 250.0, 4000.0]));
    }
}
