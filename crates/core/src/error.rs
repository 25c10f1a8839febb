use std::fmt;

use crate::AudioMode;

/// Result alias that carries the custom [`AuroraError`] type.
pub type Result<T> = std::result::Result<T, AuroraError>;

/// Common error type for the core crate.
///
/// Variants are split into the recoverable kinds (absorbed at the stage that
/// raised them) and the fatal kinds that unwind to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum AuroraError {
    /// Free-form message, mostly used for poisoned locks and collaborator
    /// failures that carry no structured payload.
    #[error("{0}")]
    Message(String),
    /// A caller handed the pipeline data it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Live mode asked for a hop before enough samples arrived. Recoverable.
    #[error("audio underrun: {available} of {required} samples available")]
    Underrun { available: usize, required: usize },
    /// Export audio ran out before the requested duration. Fatal.
    #[error("export underrun at frame {frame_index}: audio ended before {time_seconds:.3}s")]
    ExportUnderrun { frame_index: u64, time_seconds: f64 },
    /// The live renderer missed its deadline. Recoverable, the frame is dropped.
    #[error("renderer timed out on frame {frame_index}")]
    SinkTimeout { frame_index: u64 },
    /// The encoder rejected a frame or the sink thread went away. Fatal.
    #[error("frame sink failed: {0}")]
    Sink(String),
    /// A configured value fell outside its declared bounds.
    #[error(transparent)]
    ConfigRange(#[from] ConfigRangeError),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("spectral transform failed: {0}")]
    Fft(#[from] realfft::FftError),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scheduler(#[from] SchedulerFailure),
}

impl AuroraError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Whether the error is absorbed where it happens instead of stopping a job.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Underrun { .. } | Self::SinkTimeout { .. } | Self::ConfigRange(_)
        )
    }
}

/// A configured value that had to be clamped into its declared range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("`{field}` = {value} is outside [{min}, {max}], clamped to {clamped}")]
pub struct ConfigRangeError {
    pub field: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub clamped: f64,
}

impl ConfigRangeError {
    /// Clamps `value` into `[min, max]`, recording a warning in `issues` when
    /// the value had to move. Non-finite values fall back to `min`.
    pub fn check(
        field: impl Into<String>,
        value: f64,
        min: f64,
        max: f64,
        issues: &mut Vec<ConfigRangeError>,
    ) -> f64 {
        let clamped = if value.is_finite() {
            value.clamp(min, max)
        } else {
            min
        };
        if clamped != value {
            issues.push(ConfigRangeError {
                field: field.into(),
                value,
                min,
                max,
                clamped,
            });
        }
        clamped
    }
}

/// Structured report handed back when a scheduler job stops on a fatal error.
#[derive(Debug, thiserror::Error)]
pub struct SchedulerFailure {
    pub mode: AudioMode,
    pub frames_elapsed: u64,
    #[source]
    pub cause: Box<AuroraError>,
}

impl fmt::Display for SchedulerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} job stopped after {} frames: {}",
            self.mode, self.frames_elapsed, self.cause
        )
    }
}
