//! Frame scheduling. One [`Scheduler`] drives a [`FramePipeline`] (analysis,
//! mapping, simulation) from an audio source into a frame sink, under either
//! the live wall clock or the audio-driven export clock.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    audio::{AudioSource, Hop},
    mapping::ParameterMapper,
    record::{FrameSink, SinkReport},
    render::DrawFrame,
    scene::Scene,
    config::SAMPLE_RATE_RANGE,
    AppConfig, AudioMode, AuroraError, FeatureExtractor, FrameFeatures, Result, SchedulerFailure,
    VisualParameterSet,
};

mod clock;

pub use clock::{Clock, ExportClock, FrameTick, LiveClock, ManualTime, TimeSource, WallTime};

const ENVELOPE_TRACE_LEN: usize = 4096;

/// Analysis, mapping and simulation wired together for one run.
#[derive(Debug)]
pub struct FramePipeline {
    extractor: FeatureExtractor,
    mapper: ParameterMapper,
    scene: Scene,
    features: FrameFeatures,
    params: VisualParameterSet,
}

impl FramePipeline {
    /// Expects a sanitized configuration.
    pub(crate) fn new(config: &AppConfig) -> Self {
        let extractor = FeatureExtractor::new(&config.audio, &config.analysis);
        let mapper = ParameterMapper::from_config(&config.visual.parameters);
        let features = FrameFeatures::silent(extractor.band_count(), config.audio.window_size);
        let params = mapper.table().base_values();
        Self {
            extractor,
            mapper,
            scene: Scene::new(&config.visual),
            features,
            params,
        }
    }

    pub fn hop_size(&self) -> usize {
        self.extractor.hop_size()
    }

    pub fn samples_consumed(&self) -> u64 {
        self.extractor.window().samples_consumed()
    }

    /// Analyses one hop. The result becomes the input of the next frame.
    pub fn analyse(&mut self, hop: &[f32]) -> Result<&FrameFeatures> {
        self.features = self.extractor.process_hop(hop)?;
        Ok(&self.features)
    }

    pub fn features(&self) -> &FrameFeatures {
        &self.features
    }

    /// Parameters used for the most recent frame.
    pub fn parameters(&self) -> &VisualParameterSet {
        &self.params
    }

    /// Maps the latest features and advances the simulation by `dt`.
    pub fn render(&mut self, tick: FrameTick) -> DrawFrame {
        let dt = tick.dt as f32;
        self.params = self.mapper.map(&self.features, dt);
        self.scene
            .render(tick.index, tick.timestamp, &self.params, dt, &self.features)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Cloneable remote control for a running scheduler.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    shared: Arc<(Mutex<SchedulerState>, Condvar)>,
}

impl ControlHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new((Mutex::new(SchedulerState::Idle), Condvar::new())),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pause(&self) {
        self.transition(|state| (state == SchedulerState::Running).then_some(SchedulerState::Paused));
    }

    pub fn resume(&self) {
        self.transition(|state| (state == SchedulerState::Paused).then_some(SchedulerState::Running));
    }

    /// Requests cancellation. The run finishes its current frame, flushes the
    /// sink and returns.
    pub fn stop(&self) {
        self.transition(|_| Some(SchedulerState::Stopped));
    }

    fn transition(&self, next: impl FnOnce(SchedulerState) -> Option<SchedulerState>) {
        let (lock, signal) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = next(*state) {
            debug!(from = ?*state, to = ?next, "scheduler state change");
            *state = next;
            signal.notify_all();
        }
    }

    /// Idle -> Running. A stop requested before the run started wins.
    fn begin(&self) -> bool {
        self.transition(|state| (state == SchedulerState::Idle).then_some(SchedulerState::Running));
        self.state() == SchedulerState::Running
    }

    fn reset(&self) {
        self.transition(|_| Some(SchedulerState::Idle));
    }

    /// Blocks while paused. Returns whether the run should go on and whether
    /// it had been paused.
    fn checkpoint(&self) -> Checkpoint {
        let (lock, signal) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut paused = false;
        while *state == SchedulerState::Paused {
            paused = true;
            state = signal.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        match *state {
            SchedulerState::Stopped => Checkpoint::Stop,
            _ if paused => Checkpoint::Resumed,
            _ => Checkpoint::Continue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    Continue,
    Resumed,
    Stop,
}

/// Summary of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: AudioMode,
    pub frames_emitted: u64,
    /// Live frame slots skipped because production fell behind.
    pub frames_dropped: u64,
    pub hops_analysed: u64,
    /// Live frames that found less than one hop of fresh audio.
    pub underruns: u64,
    /// The run ended on a stop request rather than end of input.
    pub cancelled: bool,
    pub sink: SinkReport,
}

impl RunReport {
    fn new(mode: AudioMode) -> Self {
        Self {
            mode,
            frames_emitted: 0,
            frames_dropped: 0,
            hops_analysed: 0,
            underruns: 0,
            cancelled: false,
            sink: SinkReport::default(),
        }
    }
}

/// Envelope value of one analysed hop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    pub hop_index: u64,
    pub timestamp: f64,
    pub envelope: f32,
}

/// Bounded history of the most recent analysed hops.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeTrace {
    points: VecDeque<EnvelopePoint>,
}

impl EnvelopeTrace {
    fn record(&mut self, features: &FrameFeatures) {
        if self.points.len() == ENVELOPE_TRACE_LEN {
            self.points.pop_front();
        }
        self.points.push_back(EnvelopePoint {
            hop_index: features.hop_index,
            timestamp: features.timestamp,
            envelope: features.envelope,
        });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvelopePoint> + '_ {
        self.points.iter()
    }
}

/// Owns the configuration and the control state shared by both clocks.
#[derive(Debug)]
pub struct Scheduler {
    config: AppConfig,
    control: ControlHandle,
}

impl Scheduler {
    /// Takes ownership of the configuration and clamps every out-of-range
    /// value, logging each one.
    pub fn new(mut config: AppConfig) -> Self {
        for issue in config.sanitize() {
            warn!(%issue, "configuration value clamped");
        }
        Self {
            config,
            control: ControlHandle::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.control.state()
    }

    /// Returns a finished or cancelled scheduler to `Idle`.
    pub fn reset(&mut self) {
        self.control.reset();
    }

    /// The configuration for one run over a source at `sample_rate`.
    /// Analysis limits that depend on the Nyquist frequency are clamped again.
    fn run_config(&self, sample_rate: u32) -> Result<AppConfig> {
        let (min_rate, max_rate) = SAMPLE_RATE_RANGE;
        if !(min_rate..=max_rate).contains(&sample_rate) {
            return Err(AuroraError::InvalidInput("source sample rate is outside 8-192 kHz"));
        }
        let mut config = self.config.clone();
        config.audio.sample_rate = sample_rate;
        for issue in config.sanitize() {
            warn!(%issue, sample_rate, "configuration value clamped for source");
        }
        Ok(config)
    }

    /// Number of frames an export of `source` produces: the configured
    /// duration if set, else the whole track.
    pub fn export_frame_count(&self, source: &dyn AudioSource) -> Result<u64> {
        let fps = self.config.export.fps.max(1) as u64;
        if let Some(seconds) = self.config.export.duration_seconds {
            return Ok((seconds * fps as f64).ceil() as u64);
        }
        let samples = source
            .len_samples()
            .ok_or(AuroraError::InvalidInput("export needs a duration or a finite source"))?;
        let sample_rate = source.sample_rate().max(1) as u64;
        Ok((samples * fps).div_ceil(sample_rate))
    }

    /// Renders the source offline. Every frame slot is produced; audio that
    /// ends before the last slot is fatal.
    pub fn run_export(&mut self, source: &mut dyn AudioSource, mut sink: FrameSink) -> Result<RunReport> {
        let config = match self.run_config(source.sample_rate()) {
            Ok(config) => config,
            Err(err) => {
                sink.finish()?;
                return Err(err);
            }
        };
        let mut report = RunReport::new(AudioMode::Export);
        if !self.control.begin() {
            report.cancelled = true;
            report.sink = sink.finish()?;
            return Ok(report);
        }

        let mut pipeline = FramePipeline::new(&config);
        let mut clock = ExportClock::new(config.export.fps, None);

        let outcome = self.export_frames(&mut pipeline, &mut clock, source, &mut sink, &mut report);
        let sink_outcome = sink.finish();
        self.control.stop();

        if let Err(cause) = outcome {
            if let Err(err) = sink_outcome {
                warn!(%err, "sink failed while unwinding an export");
            }
            return Err(self.failure(AudioMode::Export, report.frames_emitted, cause));
        }
        report.sink = sink_outcome
            .map_err(|cause| self.failure(AudioMode::Export, report.frames_emitted, cause))?;
        info!(
            frames = report.frames_emitted,
            hops = report.hops_analysed,
            waits = report.sink.backpressure_waits,
            cancelled = report.cancelled,
            "export finished"
        );
        Ok(report)
    }

    fn export_frames(
        &self,
        pipeline: &mut FramePipeline,
        clock: &mut ExportClock,
        source: &mut dyn AudioSource,
        sink: &mut FrameSink,
        report: &mut RunReport,
    ) -> Result<()> {
        let total = self.export_frame_count(source)?;
        *clock = ExportClock::new(clock.fps(), Some(total));
        if source.is_seekable() {
            source.seek(0)?;
        }

        let fps = clock.fps() as u64;
        let sample_rate = source.sample_rate() as u64;
        let hop = pipeline.hop_size();
        info!(frames = total, fps, sample_rate, "export started");

        while clock.should_produce_frame() {
            if self.control.checkpoint() == Checkpoint::Stop {
                report.cancelled = true;
                info!(frame = clock.frames_elapsed(), "export cancelled");
                break;
            }

            let tick = clock.advance();
            // Audio up to this frame's timestamp, rounded up to a whole sample.
            let target = (tick.index * sample_rate).div_ceil(fps);
            while pipeline.samples_consumed() < target {
                match source.next_hop(hop)? {
                    Hop::Samples(samples) => {
                        pipeline.analyse(&samples)?;
                        report.hops_analysed += 1;
                    }
                    Hop::EndOfStream => {
                        return Err(AuroraError::ExportUnderrun {
                            frame_index: tick.index,
                            time_seconds: tick.timestamp,
                        })
                    }
                }
            }

            sink.submit(pipeline.render(tick))?;
            report.frames_emitted += 1;
        }
        Ok(())
    }

    /// Prepares a live run. Call [`LiveSession::tick`] per frame or hand the
    /// session to [`Scheduler::run_live`].
    pub fn live_session<S: AudioSource>(
        &self,
        source: S,
        sink: FrameSink,
        time: Box<dyn TimeSource>,
    ) -> Result<LiveSession<S>> {
        let config = match self.run_config(source.sample_rate()) {
            Ok(config) => config,
            Err(err) => {
                sink.finish()?;
                return Err(err);
            }
        };
        Ok(LiveSession {
            pipeline: FramePipeline::new(&config),
            clock: LiveClock::new(config.live.fps, time),
            source,
            sink,
            report: RunReport::new(AudioMode::Live),
            trace: EnvelopeTrace::default(),
        })
    }

    /// Plays the source against the wall clock until it ends or is stopped.
    pub fn run_live<S: AudioSource>(&mut self, mut session: LiveSession<S>) -> Result<RunReport> {
        if !self.control.begin() {
            session.report.cancelled = true;
            return session.finish();
        }
        info!(fps = self.config.live.fps, "live playback started");

        let outcome = loop {
            match self.control.checkpoint() {
                Checkpoint::Stop => {
                    session.report.cancelled = true;
                    break Ok(());
                }
                Checkpoint::Resumed => session.clock.rebase(),
                Checkpoint::Continue => {}
            }
            match session.tick() {
                Ok(LiveTick::Continue) => {}
                Ok(LiveTick::Ended) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        let frames = session.report.frames_emitted;
        self.control.stop();
        if let Err(cause) = outcome {
            if let Err(err) = session.finish() {
                warn!(%err, "sink failed while unwinding live playback");
            }
            return Err(self.failure(AudioMode::Live, frames, cause));
        }

        let report = session
            .finish()
            .map_err(|cause| self.failure(AudioMode::Live, frames, cause))?;
        info!(
            frames = report.frames_emitted,
            dropped = report.frames_dropped,
            underruns = report.underruns,
            "live playback finished"
        );
        Ok(report)
    }

    fn failure(&self, mode: AudioMode, frames_elapsed: u64, cause: AuroraError) -> AuroraError {
        tracing::error!(?mode, frames_elapsed, %cause, "scheduler failed");
        SchedulerFailure {
            mode,
            frames_elapsed,
            cause: Box::new(cause),
        }
        .into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveTick {
    Continue,
    Ended,
}

/// State of one live run.
#[derive(Debug)]
pub struct LiveSession<S: AudioSource> {
    pipeline: FramePipeline,
    clock: LiveClock,
    source: S,
    sink: FrameSink,
    report: RunReport,
    trace: EnvelopeTrace,
}

impl<S: AudioSource> LiveSession<S> {
    /// Waits for the next deadline, analyses the hops that had arrived by
    /// then and emits one frame from the newest features.
    pub fn tick(&mut self) -> Result<LiveTick> {
        self.clock.wait_for_deadline();

        let hop = self.pipeline.hop_size();
        // Audio that lands while this tick analyses waits for the next one.
        // The extra pull notices end of stream or an underrun.
        let limit = self.source.ready_hops(hop) as u64 + 1;
        let mut analysed = 0_u64;
        let mut ended = false;
        while analysed < limit {
            match self.source.next_hop(hop) {
                Ok(Hop::Samples(samples)) => {
                    let features = self.pipeline.analyse(&samples)?;
                    self.trace.record(features);
                    analysed += 1;
                }
                Ok(Hop::EndOfStream) => {
                    ended = true;
                    break;
                }
                Err(err) if err.is_recoverable() => {
                    if analysed == 0 {
                        self.report.underruns += 1;
                        debug!(%err, "no fresh audio for this frame");
                    }
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        self.report.hops_analysed += analysed;

        let tick = self.clock.advance();
        self.report.frames_dropped = self.clock.dropped();
        let frame = self.pipeline.render(tick);
        self.sink.submit(frame)?;
        self.report.frames_emitted += 1;

        Ok(if ended { LiveTick::Ended } else { LiveTick::Continue })
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn trace(&self) -> &EnvelopeTrace {
        &self.trace
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// Flushes the sink and returns the final report.
    pub fn finish(self) -> Result<RunReport> {
        let mut report = self.report;
        report.sink = self.sink.finish()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::{f32::consts::TAU, thread, time::Duration};

    use super::*;
    use crate::{
        audio::{LiveFeed, MemorySource},
        config::CenterImageConfig,
        record::{Encoder, MemoryEncoder, NullRenderer},
        render::Primitive,
        scene::VisualMode,
    };

    fn music(seconds: f64, sample_rate: u32) -> MemorySource {
        let len = (seconds * sample_rate as f64) as usize;
        let samples: Vec<f32> = (0..len)
            .map(|n| {
                let t = n as f32 / sample_rate as f32;
                let beat = if (t * 2.0).fract() < 0.1 { 0.6 } else { 0.1 };
                beat * (TAU * 110.0 * t).sin() + 0.2 * (TAU * 2_500.0 * t).sin()
            })
            .collect();
        MemorySource::new(samples, sample_rate)
    }

    fn export(config: AppConfig, source: &mut dyn AudioSource) -> (Result<RunReport>, MemoryEncoder) {
        let encoder = MemoryEncoder::new();
        let sink = FrameSink::export(encoder.clone(), config.export.queue_depth).unwrap();
        let mut scheduler = Scheduler::new(config);
        (scheduler.run_export(source, sink), encoder)
    }

    /// Stops the scheduler once it has encoded `after` frames.
    struct StopAfter {
        inner: MemoryEncoder,
        control: ControlHandle,
        after: usize,
        seen: usize,
    }

    impl Encoder for StopAfter {
        fn encode(&mut self, frame: &DrawFrame) -> Result<()> {
            self.inner.encode(frame)?;
            self.seen += 1;
            if self.seen == self.after {
                self.control.stop();
            }
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.inner.finish()
        }
    }

    #[test]
    fn export_is_deterministic() {
        let mut config = AppConfig::default();
        config.visual.mode = VisualMode::Particle;

        let (first, a) = export(config.clone(), &mut music(2.0, 48_000));
        let (second, b) = export(config, &mut music(2.0, 48_000));
        assert_eq!(first.unwrap().frames_emitted, 60);
        assert_eq!(second.unwrap().frames_emitted, 60);

        let a = serde_json::to_string(&a.frames()).unwrap();
        let b = serde_json::to_string(&b.frames()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn export_timestamps_come_from_the_frame_index() {
        let mut config = AppConfig::default();
        config.export.fps = 24;
        let (report, encoder) = export(config, &mut music(1.5, 44_100));
        let report = report.unwrap();
        assert_eq!(report.frames_emitted, 36);
        for (n, frame) in encoder.frames().iter().enumerate() {
            assert_eq!(frame.frame_index(), n as u64);
            assert_eq!(frame.timestamp(), n as f64 / 24.0);
        }
    }

    #[test]
    fn silent_export_without_emission_has_no_particles() {
        let mut config = AppConfig::default();
        config.export.fps = 30;
        config.visual.mode = VisualMode::Particle;
        config.visual.parameters.emission_rate.base = 0.0;
        config.visual.parameters.emission_rate.sensitivity = 0.0;

        let (report, encoder) = export(config, &mut MemorySource::silence(1.0, 48_000));
        assert_eq!(report.unwrap().frames_emitted, 30);
        let frames = encoder.frames();
        assert_eq!(frames.len(), 30);
        assert!(frames.iter().all(|frame| frame.particle_count() == 0));
        assert!(encoder.is_finished());
    }

    #[test]
    fn export_underrun_is_fatal_and_names_the_frame() {
        let mut config = AppConfig::default();
        config.export.fps = 30;
        config.export.duration_seconds = Some(2.0);

        let (outcome, encoder) = export(config, &mut MemorySource::silence(1.0, 48_000));
        let failure = match outcome.unwrap_err() {
            AuroraError::Scheduler(failure) => failure,
            other => panic!("expected a scheduler failure, got {other:?}"),
        };
        assert_eq!(failure.mode, AudioMode::Export);
        // 47 hops (48128 samples) cover frames up to 30; frame 31 needs 49600.
        assert!(matches!(
            *failure.cause,
            AuroraError::ExportUnderrun { frame_index: 31, .. }
        ));
        assert_eq!(failure.frames_elapsed, 31);
        assert_eq!(encoder.frames().len(), 31);
        assert!(encoder.is_finished());
    }

    #[test]
    fn export_without_length_is_rejected() {
        let scheduler = Scheduler::new(AppConfig::default());
        let (_writer, reader) = LiveFeed::channel(48_000, 1024);
        assert!(matches!(
            scheduler.export_frame_count(&reader),
            Err(AuroraError::InvalidInput(_))
        ));
    }

    #[test]
    fn out_of_range_config_is_clamped_before_running() {
        let mut config = AppConfig::default();
        config.audio.window_size = 0;
        config.export.fps = 30;
        config.visual.mode = VisualMode::Spectrum;
        config.visual.center_image = Some(CenterImageConfig {
            path: "cover.png".into(),
            size_ratio: -0.5,
            ..CenterImageConfig::default()
        });

        let encoder = MemoryEncoder::new();
        let sink = FrameSink::export(encoder.clone(), 4).unwrap();
        let mut scheduler = Scheduler::new(config);
        assert_eq!(scheduler.config().audio.window_size, 64);
        assert_eq!(scheduler.config().audio.hop_size, 64);

        let report = scheduler
            .run_export(&mut MemorySource::silence(0.5, 48_000), sink)
            .unwrap();
        assert_eq!(report.frames_emitted, 15);
        for frame in encoder.frames() {
            match frame.primitives().last() {
                Some(Primitive::MaskedImage {
                    inner_radius,
                    outer_radius,
                    ..
                }) => assert!(*inner_radius >= 0.0 && outer_radius >= inner_radius),
                other => panic!("expected the centre image last, got {other:?}"),
            }
        }
    }

    #[test]
    fn analysis_limits_follow_the_source_rate() {
        let mut config = AppConfig::default();
        config.analysis.max_hz = 20_000.0;
        config.export.duration_seconds = Some(0.4);

        let encoder = MemoryEncoder::new();
        let sink = FrameSink::export(encoder.clone(), 4).unwrap();
        let mut scheduler = Scheduler::new(config);
        // 20 kHz is valid at the default 48 kHz, not for a 22.05 kHz source.
        assert_eq!(scheduler.run_config(22_050).unwrap().analysis.max_hz, 11_025.0);
        let report = scheduler.run_export(&mut music(0.5, 22_050), sink).unwrap();
        assert_eq!(report.frames_emitted, 12);
        assert!(encoder.frames().iter().all(|f| f.timestamp().is_finite()));
    }

    #[test]
    fn sources_with_unusable_rates_are_rejected() {
        for rate in [0, 4_000, 384_000] {
            let encoder = MemoryEncoder::new();
            let sink = FrameSink::export(encoder.clone(), 4).unwrap();
            let mut scheduler = Scheduler::new(AppConfig::default());
            let outcome = scheduler.run_export(&mut MemorySource::new(vec![0.0; 4_800], rate), sink);
            assert!(matches!(outcome, Err(AuroraError::InvalidInput(_))), "{rate} Hz");
            assert!(encoder.frames().is_empty());
            assert!(encoder.is_finished());
        }

        let scheduler = Scheduler::new(AppConfig::default());
        let (_writer, reader) = LiveFeed::channel(0, 1024);
        let sink = FrameSink::live(NullRenderer, 2, Duration::from_millis(10)).unwrap();
        assert!(matches!(
            scheduler.live_session(reader, sink, Box::new(ManualTime::new())),
            Err(AuroraError::InvalidInput(_))
        ));
    }

    #[test]
    fn stopping_an_export_finalises_the_output() {
        let mut config = AppConfig::default();
        config.export.queue_depth = 1;
        let mut scheduler = Scheduler::new(config);
        let inner = MemoryEncoder::new();
        let encoder = StopAfter {
            inner: inner.clone(),
            control: scheduler.control(),
            after: 5,
            seen: 0,
        };
        let sink = FrameSink::export(encoder, 1).unwrap();

        let report = scheduler
            .run_export(&mut MemorySource::silence(10.0, 48_000), sink)
            .unwrap();
        assert!(report.cancelled);
        assert!(report.frames_emitted < 300);
        assert_eq!(report.sink.delivered, report.frames_emitted);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let indices: Vec<u64> = inner.frames().iter().map(DrawFrame::frame_index).collect();
        assert_eq!(indices, (0..report.frames_emitted).collect::<Vec<_>>());
        assert!(inner.is_finished());
    }

    #[test]
    fn pause_blocks_until_resume() {
        let control = ControlHandle::new();
        assert!(control.begin());
        control.pause();
        assert_eq!(control.state(), SchedulerState::Paused);

        let remote = control.clone();
        let resumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.resume();
        });
        assert_eq!(control.checkpoint(), Checkpoint::Resumed);
        resumer.join().unwrap();
        assert_eq!(control.checkpoint(), Checkpoint::Continue);

        control.stop();
        control.resume();
        assert_eq!(control.checkpoint(), Checkpoint::Stop);
    }

    #[test]
    fn live_stall_keeps_analysis_continuous() {
        let sample_rate = 48_000;
        let mut config = AppConfig::default();
        config.live.fps = 60;
        let scheduler = Scheduler::new(config);

        let (writer, reader) = LiveFeed::channel(sample_rate, 2 * sample_rate as usize);
        let time = ManualTime::new();
        let sink = FrameSink::live(NullRenderer, 2, Duration::from_millis(50)).unwrap();
        let mut session = scheduler.live_session(reader, sink, Box::new(time.clone())).unwrap();

        let tone = |n: usize| 0.5 * (TAU * 440.0 * n as f32 / sample_rate as f32).sin();
        let mut pushed = 0_usize;
        let mut acquire = |now: Duration| {
            let target = (now.as_secs_f64() * sample_rate as f64) as usize;
            let chunk: Vec<f32> = (pushed..target).map(tone).collect();
            writer.push(&chunk).unwrap();
            pushed = target;
        };

        for _ in 0..30 {
            acquire(time.elapsed());
            session.tick().unwrap();
        }

        // The frame loop stalls for 200ms while acquisition keeps going.
        time.advance(Duration::from_millis(200));
        acquire(time.elapsed());
        let before = session.report().frames_emitted;
        let hops_before = session.report().hops_analysed;
        session.tick().unwrap();
        assert_eq!(session.report().frames_emitted, before + 1);
        assert!(session.report().frames_dropped >= 10);
        assert!(session.report().hops_analysed - hops_before >= 8);

        for _ in 0..10 {
            acquire(time.elapsed());
            session.tick().unwrap();
        }

        let trace: Vec<EnvelopePoint> = session.trace().iter().copied().collect();
        assert_eq!(trace.len() as u64, session.report().hops_analysed);
        let hop_seconds = 1024.0 / sample_rate as f64;
        for (n, pair) in trace.windows(2).enumerate() {
            assert_eq!(pair[0].hop_index, n as u64);
            assert_eq!(pair[1].hop_index, pair[0].hop_index + 1);
            assert!((pair[1].timestamp - pair[0].timestamp - hop_seconds).abs() < 1e-9);
            if n >= 4 {
                assert!(
                    (pair[1].envelope - pair[0].envelope).abs() < 0.05,
                    "envelope jumped at hop {n}"
                );
            }
        }

        let report = session.finish().unwrap();
        assert_eq!(report.sink.delivered + report.sink.superseded, report.frames_emitted);
    }

    #[test]
    fn live_underrun_holds_the_previous_features() {
        let scheduler = Scheduler::new(AppConfig::default());
        let (_writer, reader) = LiveFeed::channel(48_000, 48_000);
        let sink = FrameSink::live(NullRenderer, 2, Duration::from_millis(50)).unwrap();
        let mut session = scheduler.live_session(reader, sink, Box::new(ManualTime::new())).unwrap();

        for _ in 0..3 {
            assert_eq!(session.tick().unwrap(), LiveTick::Continue);
        }
        assert_eq!(session.report().underruns, 3);
        assert_eq!(session.report().frames_emitted, 3);
        assert_eq!(session.pipeline().features().envelope, 0.0);
    }

    /// Streaming source that always has another hop by the time it is asked.
    struct Firehose {
        pulled: u64,
    }

    impl AudioSource for Firehose {
        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn next_hop(&mut self, hop: usize) -> Result<Hop> {
            self.pulled += 1;
            Ok(Hop::Samples(vec![0.1; hop]))
        }

        fn ready_hops(&self, _hop: usize) -> usize {
            2
        }
    }

    #[test]
    fn live_tick_analyses_a_bounded_number_of_hops() {
        let scheduler = Scheduler::new(AppConfig::default());
        let sink = FrameSink::live(NullRenderer, 2, Duration::from_millis(10)).unwrap();
        let source = Firehose { pulled: 0 };
        let mut session = scheduler.live_session(source, sink, Box::new(ManualTime::new())).unwrap();

        for _ in 0..4 {
            assert_eq!(session.tick().unwrap(), LiveTick::Continue);
        }
        assert_eq!(session.report().frames_emitted, 4);
        assert_eq!(session.report().hops_analysed, 12);
        assert_eq!(session.source.pulled, 12);
        session.finish().unwrap();
    }

    #[test]
    fn live_run_ends_with_its_input() {
        let mut scheduler = Scheduler::new(AppConfig::default());
        let (writer, reader) = LiveFeed::channel(48_000, 48_000);
        writer.push(&vec![0.25; 4_800]).unwrap();
        writer.close().unwrap();

        let sink = FrameSink::live(NullRenderer, 2, Duration::from_millis(50)).unwrap();
        let session = scheduler.live_session(reader, sink, Box::new(ManualTime::new())).unwrap();
        let report = scheduler.run_live(session).unwrap();

        assert_eq!(report.mode, AudioMode::Live);
        assert_eq!(report.hops_analysed, 5);
        assert_eq!(report.frames_emitted, 1);
        assert!(!report.cancelled);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
