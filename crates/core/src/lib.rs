//! Core library for the Aurora audio visualiser.
//!
//! Audio flows through a fixed chain of subsystems, one module each: a
//! source hands mono PCM hops to the feature extractor, the parameter mapper
//! turns features into bounded visual parameters, the active visual mode
//! turns parameters into draw primitives, and the scheduler paces the whole
//! chain against either the wall clock (live) or the audio itself (export)
//! before handing frames to a renderer or encoder.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod mapping;
pub mod record;
pub mod render;
pub mod scene;
pub mod timeline;

pub use analysis::{FeatureExtractor, FrameFeatures};
pub use audio::{AudioMode, AudioSource, Hop, LiveFeed, MemorySource, SampleWindow};
pub use config::{AppConfig, AudioConfig};
pub use error::{AuroraError, ConfigRangeError, Result, SchedulerFailure};
pub use mapping::{ParameterConfig, ParameterId, ParameterMapper, VisualParameterSet};
pub use record::{Encoder, FrameSink, JsonLinesEncoder, Renderer, SinkReport};
pub use render::{DrawFrame, Primitive, Viewport};
pub use scene::{Scene, VisualMode, VisualSimulation};
pub use timeline::{ControlHandle, RunReport, Scheduler, SchedulerState};
