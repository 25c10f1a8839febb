use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{
    audio::SampleWindow, config::AnalysisConfig, mapping::FeatureSource, AudioConfig, AuroraError,
    Result,
};

/// Keeps `log10` away from zero; far below any configurable floor.
const MAGNITUDE_EPSILON: f32 = 1e-9;

/// Representation of the feature set for a single hop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameFeatures {
    pub hop_index: u64,
    /// Stream time in seconds at the end of the hop.
    pub timestamp: f64,
    /// Smoothed RMS level in `[0, 1]`.
    pub envelope: f32,
    /// Absolute peak of the window, unsmoothed.
    pub peak: f32,
    /// Smoothed positive spectral difference, normalised per band.
    pub flux: f32,
    /// Smoothed band magnitudes in `[0, 1]`.
    pub spectrum: Vec<f32>,
    /// Raw window samples, oldest first.
    pub samples: Vec<f32>,
}

impl FrameFeatures {
    /// Features of a stream that has not produced any audio yet.
    pub fn silent(band_count: usize, window_size: usize) -> Self {
        Self {
            spectrum: vec![0.0; band_count],
            samples: vec![0.0; window_size],
            ..Default::default()
        }
    }

    /// Resolves a mapping source against this frame. Unknown bands read as 0.
    pub fn feature(&self, source: FeatureSource) -> f32 {
        match source {
            FeatureSource::Envelope => self.envelope,
            FeatureSource::Peak => self.peak,
            FeatureSource::Flux => self.flux,
            FeatureSource::Bass => self.band_group(0),
            FeatureSource::Mid => self.band_group(1),
            FeatureSource::Treble => self.band_group(2),
            FeatureSource::Band(index) => self.spectrum.get(index).copied().unwrap_or(0.0),
        }
    }

    /// Mean of the lower, middle or upper third of the bands.
    fn band_group(&self, third: usize) -> f32 {
        let len = self.spectrum.len();
        if len == 0 {
            return 0.0;
        }
        let start = third * len / 3;
        let end = ((third + 1) * len / 3).max(start + 1).min(len);
        let slice = &self.spectrum[start.min(len - 1)..end];
        slice.iter().sum::<f32>() / slice.len() as f32
    }
}

/// Asymmetric one-pole smoothing: `attack` applies while the signal rises,
/// `release` while it falls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackRelease {
    attack_seconds: f32,
    release_seconds: f32,
}

impl AttackRelease {
    pub fn from_millis(attack_ms: f32, release_ms: f32) -> Self {
        Self {
            attack_seconds: attack_ms.max(0.0) / 1000.0,
            release_seconds: release_ms.max(0.0) / 1000.0,
        }
    }

    /// Per-step coefficients for a step of `dt` seconds.
    pub fn coefficients(&self, dt: f32) -> SmoothingCoefficients {
        SmoothingCoefficients {
            attack: one_pole(dt, self.attack_seconds),
            release: one_pole(dt, self.release_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingCoefficients {
    pub attack: f32,
    pub release: f32,
}

impl SmoothingCoefficients {
    pub fn step(&self, current: f32, target: f32) -> f32 {
        let coefficient = if target > current {
            self.attack
        } else {
            self.release
        };
        current + (target - current) * coefficient
    }
}

fn one_pole(dt: f32, tau: f32) -> f32 {
    if dt <= 0.0 {
        0.0
    } else if tau <= f32::EPSILON {
        1.0
    } else {
        1.0 - (-dt / tau).exp()
    }
}

/// Band layout over FFT bins. Each band averages the bins whose centre
/// frequency falls in `[lo, hi)`; a band too narrow to hold any bin reads
/// the bin nearest its centre.
#[derive(Debug, Clone, PartialEq)]
pub struct BandLayout {
    ranges: Vec<(usize, usize)>,
}

impl BandLayout {
    pub fn new(config: &AnalysisConfig, sample_rate: u32, window_size: usize) -> Self {
        let nyquist = sample_rate as f32 * 0.5;
        let edges = match config.band_edges.as_ref() {
            Some(edges) if edges.len() >= 2 => edges.clone(),
            _ => log_spaced_edges(config.band_count, config.min_hz, config.max_hz.min(nyquist)),
        };

        let bin_hz = sample_rate as f32 / window_size as f32;
        let last_bin = window_size / 2;
        let ranges = edges
            .windows(2)
            .map(|pair| {
                let (lo, hi) = (pair[0], pair[1]);
                let start = (lo / bin_hz).ceil() as usize;
                let end = ((hi / bin_hz).ceil() as usize).min(last_bin + 1);
                if start < end {
                    (start, end)
                } else {
                    let centre = (((lo + hi) * 0.5) / bin_hz).round() as usize;
                    let centre = centre.min(last_bin);
                    (centre, centre + 1)
                }
            })
            .collect();

        Self { ranges }
    }

    pub fn band_count(&self) -> usize {
        self.ranges.len()
    }

    fn aggregate(&self, magnitudes: &[f32], out: &mut [f32]) {
        for ((start, end), value) in self.ranges.iter().zip(out.iter_mut()) {
            let bins = &magnitudes[*start..*end];
            *value = bins.iter().sum::<f32>() / bins.len() as f32;
        }
    }
}

fn log_spaced_edges(count: usize, min_hz: f32, max_hz: f32) -> Vec<f32> {
    let count = count.max(1);
    let min_hz = min_hz.max(1.0);
    let max_hz = max_hz.max(min_hz * 1.001);
    let ratio = (max_hz / min_hz).ln();
    (0..=count)
        .map(|i| min_hz * (ratio * i as f32 / count as f32).exp())
        .collect()
}

/// Turns hop-sized audio into [`FrameFeatures`]. Owns the sample window and
/// every piece of smoothing state, so its output depends only on the samples
/// pushed so far.
pub struct FeatureExtractor {
    sample_rate: u32,
    window: SampleWindow,
    layout: BandLayout,
    coefficients: SmoothingCoefficients,
    floor_db: f32,
    flux_smoothing: f32,
    hann: Vec<f32>,
    coherent_gain: f32,
    envelope: f32,
    flux: f32,
    bands: Vec<f32>,
    raw_bands: Vec<f32>,
    previous_raw: Vec<f32>,
    magnitudes: Vec<f32>,
    hops: u64,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl FeatureExtractor {
    pub fn new(audio: &AudioConfig, analysis: &AnalysisConfig) -> Self {
        let window_size = audio.window_size;
        let layout = BandLayout::new(analysis, audio.sample_rate, window_size);
        let band_count = layout.band_count();
        let hann: Vec<f32> = (0..window_size).map(|i| hann_value(i, window_size)).collect();
        let coherent_gain = hann.iter().sum::<f32>().max(f32::EPSILON);
        let coefficients = AttackRelease::from_millis(analysis.attack_ms, analysis.release_ms)
            .coefficients(audio.hop_seconds() as f32);

        Self {
            sample_rate: audio.sample_rate,
            window: SampleWindow::new(window_size, audio.hop_size),
            layout,
            coefficients,
            floor_db: analysis.floor_db.min(-f32::EPSILON),
            flux_smoothing: analysis.flux_smoothing,
            hann,
            coherent_gain,
            envelope: 0.0,
            flux: 0.0,
            bands: vec![0.0; band_count],
            raw_bands: vec![0.0; band_count],
            previous_raw: vec![0.0; band_count],
            magnitudes: vec![0.0; window_size / 2 + 1],
            hops: 0,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn band_count(&self) -> usize {
        self.layout.band_count()
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn hop_size(&self) -> usize {
        self.window.hop_len()
    }

    /// Number of hops analysed so far.
    pub fn hops(&self) -> u64 {
        self.hops
    }

    /// Clears smoothing state and the window while keeping configuration.
    pub fn reset(&mut self) {
        self.window.clear();
        self.envelope = 0.0;
        self.flux = 0.0;
        self.bands.fill(0.0);
        self.raw_bands.fill(0.0);
        self.previous_raw.fill(0.0);
        self.hops = 0;
    }

    /// Pushes one hop of samples and analyses the resulting window.
    pub fn process_hop(&mut self, hop: &[f32]) -> Result<FrameFeatures> {
        self.window.push(hop);
        self.window.consume_hop()?;
        let samples = self.window.snapshot();

        let rms = compute_rms(&samples);
        let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        self.envelope = self
            .coefficients
            .step(self.envelope, (rms * std::f32::consts::SQRT_2).min(1.0));

        self.compute_magnitudes(&samples)?;
        self.layout.aggregate(&self.magnitudes, &mut self.raw_bands);
        let floor_db = self.floor_db;
        for value in self.raw_bands.iter_mut() {
            *value = normalise_db(*value, floor_db);
        }

        let mut flux = 0.0;
        for ((raw, previous), smoothed) in self
            .raw_bands
            .iter()
            .zip(self.previous_raw.iter_mut())
            .zip(self.bands.iter_mut())
        {
            flux += (raw - *previous).max(0.0);
            *previous = *raw;
            *smoothed = self.coefficients.step(*smoothed, *raw);
        }
        let flux = flux / self.raw_bands.len().max(1) as f32;
        self.flux = self.flux_smoothing * self.flux + (1.0 - self.flux_smoothing) * flux;

        self.hops += 1;
        let timestamp = self.window.samples_consumed() as f64 / self.sample_rate as f64;

        Ok(FrameFeatures {
            hop_index: self.hops - 1,
            timestamp,
            envelope: self.envelope,
            peak: peak.min(1.0),
            flux: self.flux,
            spectrum: self.bands.clone(),
            samples,
        })
    }

    fn compute_magnitudes(&mut self, samples: &[f32]) -> Result<()> {
        let len = samples.len();
        let scale = 2.0 / self.coherent_gain;
        let fft = prepare_fft(&mut self.fft_planner, &mut self.fft, len)?;

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * self.hann[index];
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        for (magnitude, bin) in self.magnitudes.iter_mut().zip(fft.spectrum.iter()) {
            *magnitude = bin.norm() * scale;
        }
        Ok(())
    }
}

fn prepare_fft<'a>(
    planner: &mut RealFftPlanner<f32>,
    slot: &'a mut Option<FftResources>,
    size: usize,
) -> Result<&'a mut FftResources> {
    let rebuild = slot.as_ref().map(|fft| fft.size != size).unwrap_or(true);

    if rebuild {
        let plan = planner.plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        *slot = Some(FftResources {
            size,
            plan,
            scratch,
            spectrum,
            input,
        });
    }

    slot.as_mut()
        .ok_or_else(|| AuroraError::msg("fft resources were not initialised"))
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("sample_rate", &self.sample_rate)
            .field("window", &self.window)
            .field("bands", &self.bands.len())
            .field("envelope", &self.envelope)
            .field("hops", &self.hops)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Maps a linear magnitude onto `[0, 1]` between `floor_db` and 0 dBFS.
fn normalise_db(magnitude: f32, floor_db: f32) -> f32 {
    let db = 20.0 * (magnitude + MAGNITUDE_EPSILON).log10();
    ((db - floor_db) / -floor_db).clamp(0.0, 1.0)
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_extractor() -> FeatureExtractor {
        FeatureExtractor::new(&AudioConfig::default(), &AnalysisConfig::default())
    }

    fn sine(freq: f32, sample_rate: u32, len: usize, offset: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * (i + offset) as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn silence_yields_exact_zeros() {
        let mut extractor = build_extractor();
        let hop = vec![0.0; extractor.hop_size()];
        for _ in 0..8 {
            let frame = extractor.process_hop(&hop).unwrap();
            assert_eq!(frame.envelope, 0.0);
            assert_eq!(frame.flux, 0.0);
            assert!(frame.spectrum.iter().all(|band| *band == 0.0));
            assert!(frame.spectrum.iter().all(|band| band.is_finite()));
        }
    }

    #[test]
    fn sine_lights_up_the_matching_band() {
        let mut extractor = build_extractor();
        let hop_size = extractor.hop_size();
        let mut frame = FrameFeatures::default();
        for hop in 0..16 {
            let block = sine(1000.0, 48_000, hop_size, hop * hop_size);
            frame = extractor.process_hop(&block).unwrap();
        }

        assert!(frame.envelope > 0.9, "envelope {}", frame.envelope);
        let (loudest, _) = frame
            .spectrum
            .iter()
            .enumerate()
            .fold((0, 0.0_f32), |best, (i, v)| if *v > best.1 { (i, *v) } else { best });
        let layout = BandLayout::new(&AnalysisConfig::default(), 48_000, 2048);
        let bin = (1000.0_f32 / (48_000.0 / 2048.0)).round() as usize;
        let (start, end) = layout.ranges[loudest];
        assert!(bin + 1 >= start && bin <= end, "band {loudest} covers {start}..{end}");
    }

    #[test]
    fn attack_is_faster_than_release() {
        let mut extractor = build_extractor();
        let hop_size = extractor.hop_size();
        let loud = sine(440.0, 48_000, hop_size, 0);
        let quiet = vec![0.0; hop_size];

        extractor.process_hop(&loud).unwrap();
        let risen = extractor.process_hop(&loud).unwrap().envelope;
        for _ in 0..2 {
            extractor.process_hop(&quiet).unwrap();
        }
        let fallen = extractor.process_hop(&quiet).unwrap().envelope;

        assert!(risen > 0.5);
        assert!(fallen > 0.0, "release should decay gradually");
    }

    #[test]
    fn identical_input_gives_identical_features() {
        let mut a = build_extractor();
        let mut b = build_extractor();
        let hop_size = a.hop_size();
        for hop in 0..6 {
            let block = sine(220.0 * (hop + 1) as f32, 48_000, hop_size, hop * hop_size);
            assert_eq!(a.process_hop(&block).unwrap(), b.process_hop(&block).unwrap());
        }
    }

    #[test]
    fn timestamps_follow_consumed_hops() {
        let mut extractor = build_extractor();
        let hop = vec![0.0; extractor.hop_size()];
        let first = extractor.process_hop(&hop).unwrap();
        let second = extractor.process_hop(&hop).unwrap();
        assert_eq!(first.hop_index, 0);
        assert!((first.timestamp - 1024.0 / 48_000.0).abs() < 1e-12);
        assert!(second.timestamp > first.timestamp);
    }

    #[test]
    fn explicit_band_edges_set_the_band_count() {
        let config = AnalysisConfig {
            band_edges: Some(vec![20.0, 250.0, 2000.0, 8000.0]),
            ..AnalysisConfig::default()
        };
        let extractor = FeatureExtractor::new(&AudioConfig::default(), &config);
        assert_eq!(extractor.band_count(), 3);
    }

    #[test]
    fn band_groups_average_thirds() {
        let frame = FrameFeatures {
            spectrum: vec![1.0, 1.0, 0.0, 0.0, 0.5, 0.5],
            ..Default::default()
        };
        assert_eq!(frame.feature(FeatureSource::Bass), 1.0);
        assert_eq!(frame.feature(FeatureSource::Mid), 0.0);
        assert_eq!(frame.feature(FeatureSource::Treble), 0.5);
        assert_eq!(frame.feature(FeatureSource::Band(99)), 0.0);
    }
}
