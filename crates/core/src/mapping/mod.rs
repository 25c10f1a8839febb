use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{AttackRelease, FrameFeatures},
    config::clamp_field,
    ConfigRangeError,
};

/// Audio feature a parameter reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    #[default]
    Envelope,
    Peak,
    Flux,
    Bass,
    Mid,
    Treble,
    Band(usize),
}

/// Shapes the interpolation factor of color parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCurve {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    Smoothstep,
}

impl ResponseCurve {
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::Smoothstep => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// The closed set of parameters a visual mode can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterId {
    PrimaryColor,
    SecondaryColor,
    FeatherRadius,
    EmissionRate,
    MovementSpeed,
    Amplitude,
    ParticleSize,
}

impl ParameterId {
    pub const COUNT: usize = 7;

    pub const ALL: [ParameterId; Self::COUNT] = [
        Self::PrimaryColor,
        Self::SecondaryColor,
        Self::FeatherRadius,
        Self::EmissionRate,
        Self::MovementSpeed,
        Self::Amplitude,
        Self::ParticleSize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::PrimaryColor => "primary_color",
            Self::SecondaryColor => "secondary_color",
            Self::FeatherRadius => "feather_radius",
            Self::EmissionRate => "emission_rate",
            Self::MovementSpeed => "movement_speed",
            Self::Amplitude => "amplitude",
            Self::ParticleSize => "particle_size",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Declared value range. Colors are clamped per channel.
    pub fn range(self) -> (f32, f32) {
        match self {
            Self::PrimaryColor | Self::SecondaryColor => (0.0, 1.0),
            // pixels
            Self::FeatherRadius => (0.0, 256.0),
            // particles per second
            Self::EmissionRate => (0.0, 20_000.0),
            // half the shorter frame side per second
            Self::MovementSpeed => (0.0, 8.0),
            Self::Amplitude => (0.0, 4.0),
            // pixels
            Self::ParticleSize => (0.5, 64.0),
        }
    }

    /// Allowed sensitivity magnitude: four times the parameter's span.
    pub fn sensitivity_limit(self) -> f32 {
        let (min, max) = self.range();
        (max - min) * 4.0
    }

    pub fn is_color(self) -> bool {
        matches!(self, Self::PrimaryColor | Self::SecondaryColor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    pub attack_ms: f32,
    pub release_ms: f32,
}

/// `base + sensitivity * feature`, clamped to the parameter's range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalarBinding {
    pub base: f32,
    pub sensitivity: f32,
    pub source: FeatureSource,
    /// Narrows the declared range, e.g. the feather radius bounds.
    pub range: Option<[f32; 2]>,
    pub smoothing: Option<SmoothingConfig>,
}

impl Default for ScalarBinding {
    fn default() -> Self {
        Self {
            base: 0.0,
            sensitivity: 0.0,
            source: FeatureSource::Envelope,
            range: None,
            smoothing: None,
        }
    }
}

/// Interpolates from `base` toward `target` by `sensitivity * feature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorBinding {
    pub base: [f32; 3],
    pub target: [f32; 3],
    pub sensitivity: f32,
    pub source: FeatureSource,
    pub curve: ResponseCurve,
    pub smoothing: Option<SmoothingConfig>,
}

impl Default for ColorBinding {
    fn default() -> Self {
        Self {
            base: [1.0, 1.0, 1.0],
            target: [1.0, 1.0, 1.0],
            sensitivity: 0.0,
            source: FeatureSource::Envelope,
            curve: ResponseCurve::Linear,
            smoothing: None,
        }
    }
}

/// Static, user-facing description of every parameter binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterConfig {
    pub primary_color: ColorBinding,
    pub secondary_color: ColorBinding,
    pub feather_radius: ScalarBinding,
    pub emission_rate: ScalarBinding,
    pub movement_speed: ScalarBinding,
    pub amplitude: ScalarBinding,
    pub particle_size: ScalarBinding,
}

impl Default for ParameterConfig {
    fn default() -> Self {
        Self {
            primary_color: ColorBinding {
                base: [0.125, 1.0, 1.0],
                target: [1.0, 0.0, 1.0],
                sensitivity: 1.0,
                source: FeatureSource::Envelope,
                curve: ResponseCurve::Linear,
                smoothing: None,
            },
            secondary_color: ColorBinding {
                base: [1.0, 0.0, 1.0],
                target: [1.0, 0.85, 0.2],
                sensitivity: 1.5,
                source: FeatureSource::Treble,
                curve: ResponseCurve::Smoothstep,
                smoothing: None,
            },
            feather_radius: ScalarBinding {
                base: 6.0,
                sensitivity: 24.0,
                source: FeatureSource::Envelope,
                range: Some([0.0, 64.0]),
                smoothing: Some(SmoothingConfig {
                    attack_ms: 120.0,
                    release_ms: 400.0,
                }),
            },
            emission_rate: ScalarBinding {
                base: 40.0,
                sensitivity: 1500.0,
                source: FeatureSource::Flux,
                ..ScalarBinding::default()
            },
            movement_speed: ScalarBinding {
                base: 0.35,
                sensitivity: 0.8,
                source: FeatureSource::Bass,
                ..ScalarBinding::default()
            },
            amplitude: ScalarBinding {
                base: 0.6,
                sensitivity: 0.8,
                source: FeatureSource::Envelope,
                ..ScalarBinding::default()
            },
            particle_size: ScalarBinding {
                base: 2.0,
                sensitivity: 3.0,
                source: FeatureSource::Treble,
                ..ScalarBinding::default()
            },
        }
    }
}

impl ParameterConfig {
    /// Clamps every binding into its declared bounds.
    pub fn sanitize(&mut self, issues: &mut Vec<ConfigRangeError>) {
        sanitize_color(ParameterId::PrimaryColor, &mut self.primary_color, issues);
        sanitize_color(ParameterId::SecondaryColor, &mut self.secondary_color, issues);
        sanitize_scalar(ParameterId::FeatherRadius, &mut self.feather_radius, issues);
        sanitize_scalar(ParameterId::EmissionRate, &mut self.emission_rate, issues);
        sanitize_scalar(ParameterId::MovementSpeed, &mut self.movement_speed, issues);
        sanitize_scalar(ParameterId::Amplitude, &mut self.amplitude, issues);
        sanitize_scalar(ParameterId::ParticleSize, &mut self.particle_size, issues);
    }
}

fn sanitize_smoothing(
    name: &str,
    smoothing: &mut Option<SmoothingConfig>,
    issues: &mut Vec<ConfigRangeError>,
) {
    if let Some(smoothing) = smoothing.as_mut() {
        clamp_field(&format!("{name}.smoothing.attack_ms"), &mut smoothing.attack_ms, 0.0, 10_000.0, issues);
        clamp_field(&format!("{name}.smoothing.release_ms"), &mut smoothing.release_ms, 0.0, 10_000.0, issues);
    }
}

fn sanitize_scalar(id: ParameterId, binding: &mut ScalarBinding, issues: &mut Vec<ConfigRangeError>) {
    let name = id.name();
    let (min, max) = id.range();
    if let Some([lo, hi]) = binding.range.as_mut() {
        clamp_field(&format!("{name}.range[0]"), lo, min, max, issues);
        clamp_field(&format!("{name}.range[1]"), hi, *lo, max, issues);
    }
    let (lo, hi) = binding.range.map(|[lo, hi]| (lo, hi)).unwrap_or((min, max));
    clamp_field(&format!("{name}.base"), &mut binding.base, lo, hi, issues);
    let limit = id.sensitivity_limit();
    clamp_field(&format!("{name}.sensitivity"), &mut binding.sensitivity, -limit, limit, issues);
    sanitize_smoothing(name, &mut binding.smoothing, issues);
}

fn sanitize_color(id: ParameterId, binding: &mut ColorBinding, issues: &mut Vec<ConfigRangeError>) {
    let name = id.name();
    for (channel, value) in binding.base.iter_mut().enumerate() {
        clamp_field(&format!("{name}.base[{channel}]"), value, 0.0, 1.0, issues);
    }
    for (channel, value) in binding.target.iter_mut().enumerate() {
        clamp_field(&format!("{name}.target[{channel}]"), value, 0.0, 1.0, issues);
    }
    let limit = id.sensitivity_limit();
    clamp_field(&format!("{name}.sensitivity"), &mut binding.sensitivity, -limit, limit, issues);
    sanitize_smoothing(name, &mut binding.smoothing, issues);
}

/// Value of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamValue {
    Scalar(f32),
    Color(Vec3),
}

/// Parameters consumed by the visual simulation for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualParameterSet {
    pub primary_color: Vec3,
    pub secondary_color: Vec3,
    pub feather_radius: f32,
    pub emission_rate: f32,
    pub movement_speed: f32,
    pub amplitude: f32,
    pub particle_size: f32,
}

impl VisualParameterSet {
    fn set(&mut self, id: ParameterId, value: ParamValue) {
        match (id, value) {
            (ParameterId::PrimaryColor, ParamValue::Color(c)) => self.primary_color = c,
            (ParameterId::SecondaryColor, ParamValue::Color(c)) => self.secondary_color = c,
            (ParameterId::FeatherRadius, ParamValue::Scalar(v)) => self.feather_radius = v,
            (ParameterId::EmissionRate, ParamValue::Scalar(v)) => self.emission_rate = v,
            (ParameterId::MovementSpeed, ParamValue::Scalar(v)) => self.movement_speed = v,
            (ParameterId::Amplitude, ParamValue::Scalar(v)) => self.amplitude = v,
            (ParameterId::ParticleSize, ParamValue::Scalar(v)) => self.particle_size = v,
            (id, value) => tracing::debug!(?id, ?value, "ignoring mismatched parameter kind"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Rule {
    Scalar { base: f32, sensitivity: f32, min: f32, max: f32 },
    Color { base: Vec3, target: Vec3, sensitivity: f32, curve: ResponseCurve },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedBinding {
    source: FeatureSource,
    rule: Rule,
    smoothing: Option<AttackRelease>,
}

/// Bindings resolved once at load time, indexed by [`ParameterId`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTable {
    entries: [ResolvedBinding; ParameterId::COUNT],
}

impl ParameterTable {
    /// Resolves the configuration, clamping anything out of range. Returned
    /// issues are also logged.
    pub fn resolve(config: &ParameterConfig) -> (Self, Vec<ConfigRangeError>) {
        let mut config = config.clone();
        let mut issues = Vec::new();
        config.sanitize(&mut issues);
        for issue in &issues {
            tracing::warn!(%issue, "parameter binding clamped");
        }

        let entries = ParameterId::ALL.map(|id| match id {
            ParameterId::PrimaryColor => resolve_color(&config.primary_color),
            ParameterId::SecondaryColor => resolve_color(&config.secondary_color),
            ParameterId::FeatherRadius => resolve_scalar(id, &config.feather_radius),
            ParameterId::EmissionRate => resolve_scalar(id, &config.emission_rate),
            ParameterId::MovementSpeed => resolve_scalar(id, &config.movement_speed),
            ParameterId::Amplitude => resolve_scalar(id, &config.amplitude),
            ParameterId::ParticleSize => resolve_scalar(id, &config.particle_size),
        });

        (Self { entries }, issues)
    }

    /// The configured base values with no audio modulation applied.
    pub fn base_values(&self) -> VisualParameterSet {
        let mut set = VisualParameterSet {
            primary_color: Vec3::ONE,
            secondary_color: Vec3::ONE,
            feather_radius: 0.0,
            emission_rate: 0.0,
            movement_speed: 0.0,
            amplitude: 0.0,
            particle_size: 0.0,
        };
        for id in ParameterId::ALL {
            let value = match self.entries[id.index()].rule {
                Rule::Scalar { base, .. } => ParamValue::Scalar(base),
                Rule::Color { base, .. } => ParamValue::Color(base),
            };
            set.set(id, value);
        }
        set
    }
}

fn resolve_scalar(id: ParameterId, binding: &ScalarBinding) -> ResolvedBinding {
    let (min, max) = binding
        .range
        .map(|[lo, hi]| (lo, hi))
        .unwrap_or_else(|| id.range());
    ResolvedBinding {
        source: binding.source,
        rule: Rule::Scalar {
            base: binding.base,
            sensitivity: binding.sensitivity,
            min,
            max,
        },
        smoothing: binding
            .smoothing
            .map(|s| AttackRelease::from_millis(s.attack_ms, s.release_ms)),
    }
}

fn resolve_color(binding: &ColorBinding) -> ResolvedBinding {
    ResolvedBinding {
        source: binding.source,
        rule: Rule::Color {
            base: Vec3::from_array(binding.base),
            target: Vec3::from_array(binding.target),
            sensitivity: binding.sensitivity,
            curve: binding.curve,
        },
        smoothing: binding
            .smoothing
            .map(|s| AttackRelease::from_millis(s.attack_ms, s.release_ms)),
    }
}

/// Applies the parameter table to each frame's features. The only state it
/// carries is the per-parameter modulation smoothing.
#[derive(Debug, Clone)]
pub struct ParameterMapper {
    table: ParameterTable,
    modulation: [f32; ParameterId::COUNT],
}

impl ParameterMapper {
    pub fn new(table: ParameterTable) -> Self {
        Self {
            table,
            modulation: [0.0; ParameterId::COUNT],
        }
    }

    pub fn from_config(config: &ParameterConfig) -> Self {
        Self::new(ParameterTable::resolve(config).0)
    }

    pub fn table(&self) -> &ParameterTable {
        &self.table
    }

    pub fn reset(&mut self) {
        self.modulation = [0.0; ParameterId::COUNT];
    }

    /// Maps one frame of features. `dt` drives any layered smoothing.
    pub fn map(&mut self, features: &FrameFeatures, dt: f32) -> VisualParameterSet {
        let mut set = self.table.base_values();
        for id in ParameterId::ALL {
            let entry = &self.table.entries[id.index()];
            let feature = features.feature(entry.source);
            let feature = if feature.is_finite() { feature } else { 0.0 };
            let sensitivity = match entry.rule {
                Rule::Scalar { sensitivity, .. } | Rule::Color { sensitivity, .. } => sensitivity,
            };

            let slot = &mut self.modulation[id.index()];
            let target = sensitivity * feature;
            *slot = match entry.smoothing {
                Some(smoothing) => smoothing.coefficients(dt).step(*slot, target),
                None => target,
            };
            let modulation = *slot;

            let value = match entry.rule {
                Rule::Scalar { base, min, max, .. } => {
                    ParamValue::Scalar((base + modulation).clamp(min, max))
                }
                Rule::Color {
                    base,
                    target,
                    curve,
                    ..
                } => {
                    let t = curve.apply(modulation);
                    ParamValue::Color(base.lerp(target, t).clamp(Vec3::ZERO, Vec3::ONE))
                }
            };
            set.set(id, value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_features() -> FrameFeatures {
        FrameFeatures {
            envelope: 0.9,
            peak: 1.0,
            flux: 0.4,
            spectrum: vec![0.8; 12],
            ..Default::default()
        }
    }

    fn zero_sensitivity() -> ParameterConfig {
        let mut config = ParameterConfig::default();
        config.primary_color.sensitivity = 0.0;
        config.secondary_color.sensitivity = 0.0;
        config.feather_radius.sensitivity = 0.0;
        config.emission_rate.sensitivity = 0.0;
        config.movement_speed.sensitivity = 0.0;
        config.amplitude.sensitivity = 0.0;
        config.particle_size.sensitivity = 0.0;
        config
    }

    #[test]
    fn zero_sensitivity_reproduces_base_exactly() {
        let config = zero_sensitivity();
        let mut mapper = ParameterMapper::from_config(&config);
        let frames = [
            FrameFeatures::default(),
            loud_features(),
            FrameFeatures {
                envelope: 1.0,
                flux: 1.0,
                spectrum: vec![1.0; 3],
                ..Default::default()
            },
        ];

        for frame in &frames {
            let set = mapper.map(frame, 1.0 / 30.0);
            assert_eq!(set.primary_color, Vec3::from_array(config.primary_color.base));
            assert_eq!(set.secondary_color, Vec3::from_array(config.secondary_color.base));
            assert_eq!(set.feather_radius, config.feather_radius.base);
            assert_eq!(set.emission_rate, config.emission_rate.base);
            assert_eq!(set.movement_speed, config.movement_speed.base);
            assert_eq!(set.amplitude, config.amplitude.base);
            assert_eq!(set.particle_size, config.particle_size.base);
            assert_eq!(set, mapper.table().base_values());
        }
    }

    #[test]
    fn scalar_outputs_are_clamped_to_range() {
        let mut config = ParameterConfig::default();
        config.amplitude.sensitivity = 16.0;
        let mut mapper = ParameterMapper::from_config(&config);
        let set = mapper.map(&loud_features(), 1.0 / 60.0);
        assert_eq!(set.amplitude, ParameterId::Amplitude.range().1);

        config.amplitude.sensitivity = -16.0;
        let mut mapper = ParameterMapper::from_config(&config);
        let set = mapper.map(&loud_features(), 1.0 / 60.0);
        assert_eq!(set.amplitude, 0.0);
    }

    #[test]
    fn out_of_range_configuration_is_clamped_not_propagated() {
        let mut config = ParameterConfig::default();
        config.emission_rate.sensitivity = -1.0e9;
        config.primary_color.base = [2.0, -1.0, 0.5];
        let (table, issues) = ParameterTable::resolve(&config);
        assert_eq!(issues.len(), 3);

        let base = table.base_values();
        assert_eq!(base.primary_color, Vec3::new(1.0, 0.0, 0.5));
        let mut mapper = ParameterMapper::new(table);
        let set = mapper.map(&loud_features(), 0.01);
        assert!(set.emission_rate >= 0.0);
    }

    #[test]
    fn colors_interpolate_toward_target() {
        let mut mapper = ParameterMapper::from_config(&ParameterConfig::default());
        let quiet = mapper.map(&FrameFeatures::default(), 0.02);
        let loud = mapper.map(
            &FrameFeatures {
                envelope: 1.0,
                ..Default::default()
            },
            0.02,
        );
        assert_eq!(quiet.primary_color, Vec3::new(0.125, 1.0, 1.0));
        assert_eq!(loud.primary_color, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn feather_reacts_more_slowly_than_color() {
        let mut mapper = ParameterMapper::from_config(&ParameterConfig::default());
        let frame = FrameFeatures {
            envelope: 1.0,
            ..Default::default()
        };
        let first = mapper.map(&frame, 1.0 / 60.0);
        assert_eq!(first.primary_color, Vec3::new(1.0, 0.0, 1.0));
        assert!(first.feather_radius < 6.0 + 24.0 * 0.5);

        let mut last = first;
        for _ in 0..120 {
            last = mapper.map(&frame, 1.0 / 60.0);
        }
        assert!(last.feather_radius > first.feather_radius);
        assert!((last.feather_radius - 30.0).abs() < 0.5);
    }

    #[test]
    fn response_curves_keep_endpoints() {
        for curve in [
            ResponseCurve::Linear,
            ResponseCurve::EaseIn,
            ResponseCurve::EaseOut,
            ResponseCurve::Smoothstep,
        ] {
            assert_eq!(curve.apply(0.0), 0.0);
            assert_eq!(curve.apply(1.0), 1.0);
            assert_eq!(curve.apply(7.0), 1.0);
        }
    }
}
