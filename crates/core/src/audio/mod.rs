use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};

use crate::{AuroraError, Result};

/// Mode enum describes which timing regime drives the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioMode {
    /// Audio arrives continuously; frames may be skipped, audio never waits.
    Live,
    /// Audio is pre-decoded and pulled at a fixed virtual rate.
    Export,
}

/// Fixed-capacity ring of the most recent samples plus a hop cursor that
/// tracks how many pushed samples have not been analysed yet.
#[derive(Clone)]
pub struct SampleWindow {
    buffer: Vec<f32>,
    write: usize,
    hop_len: usize,
    fresh: usize,
    consumed: u64,
}

impl SampleWindow {
    /// Creates a silent window. `hop_len` is clamped to `1..=window_len`.
    pub fn new(window_len: usize, hop_len: usize) -> Self {
        let window_len = window_len.max(1);
        Self {
            buffer: vec![0.0; window_len],
            write: 0,
            hop_len: hop_len.clamp(1, window_len),
            fresh: 0,
            consumed: 0,
        }
    }

    pub fn window_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    /// Samples pushed but not yet consumed by a hop.
    pub fn available(&self) -> usize {
        self.fresh
    }

    /// Total samples consumed through [`SampleWindow::consume_hop`].
    pub fn samples_consumed(&self) -> u64 {
        self.consumed
    }

    /// Appends samples, overwriting the oldest once the window is full.
    pub fn push(&mut self, samples: &[f32]) {
        let len = self.buffer.len();
        let tail = &samples[samples.len().saturating_sub(len)..];
        for sample in tail {
            self.buffer[self.write] = *sample;
            self.write = (self.write + 1) % len;
        }
        self.fresh = (self.fresh + samples.len()).min(len);
    }

    /// Marks one hop as analysed.
    pub fn consume_hop(&mut self) -> Result<()> {
        if self.fresh < self.hop_len {
            return Err(AuroraError::Underrun {
                available: self.fresh,
                required: self.hop_len,
            });
        }
        self.fresh -= self.hop_len;
        self.consumed += self.hop_len as u64;
        Ok(())
    }

    /// Current window content, oldest sample first. Does not consume anything.
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.buffer.len());
        out.extend_from_slice(&self.buffer[self.write..]);
        out.extend_from_slice(&self.buffer[..self.write]);
        out
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write = 0;
        self.fresh = 0;
        self.consumed = 0;
    }
}

impl fmt::Debug for SampleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleWindow")
            .field("window_len", &self.buffer.len())
            .field("hop_len", &self.hop_len)
            .field("fresh", &self.fresh)
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// One pull from an [`AudioSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum Hop {
    Samples(Vec<f32>),
    EndOfStream,
}

/// Mono PCM provider. Decoding and device handling live behind this trait.
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    /// Returns exactly `hop` samples or [`Hop::EndOfStream`]. Streaming
    /// sources return [`AuroraError::Underrun`] when fewer than `hop` samples
    /// are buffered.
    fn next_hop(&mut self, hop: usize) -> Result<Hop>;

    /// Number of hops that can be pulled right now without underrunning.
    fn ready_hops(&self, hop: usize) -> usize;

    fn is_seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _sample: u64) -> Result<()> {
        Err(AuroraError::msg("audio source is not seekable"))
    }

    /// Total length for fully decoded sources.
    fn len_samples(&self) -> Option<u64> {
        None
    }
}

/// Fully decoded, seekable mono track held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    samples: Arc<[f32]>,
    sample_rate: u32,
    position: usize,
}

impl MemorySource {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            position: 0,
        }
    }

    /// Downmixes interleaved frames to mono by averaging channels.
    pub fn from_interleaved(data: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let mono: Vec<f32> = data
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Self::new(mono, sample_rate)
    }

    /// Silent track of the given length.
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let len = (seconds * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn position(&self) -> u64 {
        self.position as u64
    }
}

impl AudioSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The final partial hop is padded with silence.
    fn next_hop(&mut self, hop: usize) -> Result<Hop> {
        if self.position >= self.samples.len() {
            return Ok(Hop::EndOfStream);
        }
        let end = (self.position + hop).min(self.samples.len());
        let mut out = Vec::with_capacity(hop);
        out.extend_from_slice(&self.samples[self.position..end]);
        out.resize(hop, 0.0);
        self.position = end;
        Ok(Hop::Samples(out))
    }

    fn ready_hops(&self, hop: usize) -> usize {
        let remaining = self.samples.len().saturating_sub(self.position);
        remaining.div_ceil(hop.max(1))
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, sample: u64) -> Result<()> {
        self.position = (sample as usize).min(self.samples.len());
        Ok(())
    }

    fn len_samples(&self) -> Option<u64> {
        Some(self.samples.len() as u64)
    }
}

#[derive(Debug)]
struct FeedBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

/// Shared buffer between an acquisition thread (device callback or decode
/// loop) and the pipeline. Writes never wait for the reader: once the
/// buffer is full the oldest samples are discarded.
pub struct LiveFeed;

impl LiveFeed {
    pub fn channel(sample_rate: u32, capacity: usize) -> (LiveFeedWriter, LiveFeedReader) {
        let shared = Arc::new(Mutex::new(FeedBuffer {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dropped: 0,
            closed: false,
        }));
        (
            LiveFeedWriter {
                shared: shared.clone(),
            },
            LiveFeedReader {
                shared,
                sample_rate,
            },
        )
    }
}

/// Acquisition side of a [`LiveFeed`].
#[derive(Clone)]
pub struct LiveFeedWriter {
    shared: Arc<Mutex<FeedBuffer>>,
}

impl LiveFeedWriter {
    pub fn push(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut feed = lock_feed(&self.shared)?;
        feed.samples.extend(samples.iter().copied());
        let overflow = feed.samples.len().saturating_sub(feed.capacity);
        if overflow > 0 {
            feed.samples.drain(..overflow);
            feed.dropped += overflow as u64;
        }
        Ok(())
    }

    /// Signals that no more audio will arrive.
    pub fn close(&self) -> Result<()> {
        lock_feed(&self.shared)?.closed = true;
        Ok(())
    }
}

impl fmt::Debug for LiveFeedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFeedWriter").finish()
    }
}

/// Pipeline side of a [`LiveFeed`].
pub struct LiveFeedReader {
    shared: Arc<Mutex<FeedBuffer>>,
    sample_rate: u32,
}

impl LiveFeedReader {
    /// Samples discarded because the reader fell behind.
    pub fn dropped_samples(&self) -> Result<u64> {
        Ok(lock_feed(&self.shared)?.dropped)
    }
}

impl AudioSource for LiveFeedReader {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_hop(&mut self, hop: usize) -> Result<Hop> {
        let mut feed = lock_feed(&self.shared)?;
        let available = feed.samples.len();
        if available >= hop {
            return Ok(Hop::Samples(feed.samples.drain(..hop).collect()));
        }
        if feed.closed {
            if available == 0 {
                return Ok(Hop::EndOfStream);
            }
            let mut out: Vec<f32> = feed.samples.drain(..).collect();
            out.resize(hop, 0.0);
            return Ok(Hop::Samples(out));
        }
        Err(AuroraError::Underrun {
            available,
            required: hop,
        })
    }

    fn ready_hops(&self, hop: usize) -> usize {
        lock_feed(&self.shared)
            .map(|feed| {
                let hops = feed.samples.len() / hop.max(1);
                if feed.closed && feed.samples.len() % hop.max(1) != 0 {
                    hops + 1
                } else {
                    hops
                }
            })
            .unwrap_or(0)
    }
}

impl fmt::Debug for LiveFeedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFeedReader")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

fn lock_feed(shared: &Mutex<FeedBuffer>) -> Result<MutexGuard<'_, FeedBuffer>> {
    shared
        .lock()
        .map_err(|_| AuroraError::msg("live audio feed has been poisoned"))
}
