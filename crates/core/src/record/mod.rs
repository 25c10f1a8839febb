//! Frame sinks. A sink owns a worker thread that hands [`DrawFrame`]s either
//! to a live [`Renderer`] or to an export [`Encoder`].
//!
//! Live sinks keep only the newest frames: when the queue is full the oldest
//! queued frame is discarded. Export sinks never discard; the producer waits
//! for the encoder instead.

use std::{
    fmt,
    io::Write,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{render::DrawFrame, AudioMode, AuroraError, Result};

/// Live presentation target, typically a window surface.
pub trait Renderer: Send {
    /// Presents one frame. Returning [`AuroraError::SinkTimeout`] drops the
    /// frame without stopping the sink.
    fn present(&mut self, frame: &DrawFrame, timeout: Duration) -> Result<()>;
}

/// Offline output target. Frames arrive strictly in index order.
pub trait Encoder: Send {
    fn encode(&mut self, frame: &DrawFrame) -> Result<()>;

    /// Finalises the output. Called once, also after a cancelled export.
    fn finish(&mut self) -> Result<()>;
}

/// Writes each frame as one JSON document per line. A partially written file
/// stays readable up to the last complete line.
pub struct JsonLinesEncoder<W: Write + Send> {
    writer: W,
    frames: u64,
}

impl<W: Write + Send> JsonLinesEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, frames: 0 }
    }
}

impl<W: Write + Send> Encoder for JsonLinesEncoder<W> {
    fn encode(&mut self, frame: &DrawFrame) -> Result<()> {
        serde_json::to_writer(&mut self.writer, frame)?;
        self.writer.write_all(b"\n")?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        debug!(frames = self.frames, "json lines output flushed");
        Ok(())
    }
}

impl<W: Write + Send> fmt::Debug for JsonLinesEncoder<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesEncoder")
            .field("frames", &self.frames)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Collected {
    frames: Vec<DrawFrame>,
    finished: bool,
}

/// Keeps encoded frames in memory. Clones share the same storage, so a copy
/// kept by the caller can inspect what the sink thread wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryEncoder {
    inner: Arc<Mutex<Collected>>,
}

impl MemoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<DrawFrame> {
        self.inner
            .lock()
            .map(|collected| collected.frames.clone())
            .unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.inner
            .lock()
            .map(|collected| collected.finished)
            .unwrap_or(false)
    }
}

impl Encoder for MemoryEncoder {
    fn encode(&mut self, frame: &DrawFrame) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| AuroraError::msg("memory encoder lock poisoned"))?
            .frames
            .push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| AuroraError::msg("memory encoder lock poisoned"))?
            .finished = true;
        Ok(())
    }
}

/// Renderer that accepts every frame immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn present(&mut self, _frame: &DrawFrame, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Delivery counters for one sink lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReport {
    /// Frames presented or encoded.
    pub delivered: u64,
    /// Live frames whose presentation timed out.
    pub timed_out: u64,
    /// Live frames replaced in the queue by a newer one.
    pub superseded: u64,
    /// Export submissions that had to wait for queue space.
    pub backpressure_waits: u64,
}

/// Producer half of a sink plus the worker thread that drains it.
pub struct FrameSink {
    mode: AudioMode,
    sender: Option<Sender<DrawFrame>>,
    // Producer-side receiver, used to discard the oldest live frame.
    overflow: Option<Receiver<DrawFrame>>,
    worker: Option<JoinHandle<Result<SinkReport>>>,
    superseded: u64,
    backpressure_waits: u64,
}

impl FrameSink {
    pub fn live<R>(renderer: R, queue_depth: usize, render_timeout: Duration) -> Result<Self>
    where
        R: Renderer + 'static,
    {
        let (sender, receiver) = bounded(queue_depth.max(1));
        let overflow = Some(receiver.clone());
        let worker = thread::Builder::new()
            .name("aurora-present".into())
            .spawn(move || present_loop(renderer, receiver, render_timeout))?;
        Ok(Self::with_worker(AudioMode::Live, sender, overflow, worker))
    }

    pub fn export<E>(encoder: E, queue_depth: usize) -> Result<Self>
    where
        E: Encoder + 'static,
    {
        let (sender, receiver) = bounded(queue_depth.max(1));
        let worker = thread::Builder::new()
            .name("aurora-encode".into())
            .spawn(move || encode_loop(encoder, receiver))?;
        Ok(Self::with_worker(AudioMode::Export, sender, None, worker))
    }

    fn with_worker(
        mode: AudioMode,
        sender: Sender<DrawFrame>,
        overflow: Option<Receiver<DrawFrame>>,
        worker: JoinHandle<Result<SinkReport>>,
    ) -> Self {
        Self {
            mode,
            sender: Some(sender),
            overflow,
            worker: Some(worker),
            superseded: 0,
            backpressure_waits: 0,
        }
    }

    /// Queues a frame. Live sinks never block; export sinks block while the
    /// encoder is behind.
    pub fn submit(&mut self, frame: DrawFrame) -> Result<()> {
        // The live queue never disconnects while `overflow` holds a receiver.
        if self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            return Err(self.worker_failure());
        }
        let Some(sender) = self.sender.as_ref() else {
            return Err(AuroraError::Sink("sink already finished".into()));
        };

        let frame = match sender.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(frame)) => frame,
            Err(TrySendError::Disconnected(_)) => return Err(self.worker_failure()),
        };

        match &self.overflow {
            Some(overflow) => {
                if overflow.try_recv().is_ok() {
                    self.superseded += 1;
                }
                match sender.try_send(frame) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => {
                        self.superseded += 1;
                        Ok(())
                    }
                    Err(TrySendError::Disconnected(_)) => Err(self.worker_failure()),
                }
            }
            None => {
                self.backpressure_waits += 1;
                debug!(frame = frame.frame_index(), "encoder queue full, waiting");
                if sender.send(frame).is_err() {
                    return Err(self.worker_failure());
                }
                Ok(())
            }
        }
    }

    /// Closes the queue, lets the worker drain what is left and finalise its
    /// target, then reports.
    pub fn finish(mut self) -> Result<SinkReport> {
        self.sender.take();
        let mut report = self.join_worker()?;
        report.superseded += self.superseded;
        report.backpressure_waits = self.backpressure_waits;
        Ok(report)
    }

    fn join_worker(&mut self) -> Result<SinkReport> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| AuroraError::Sink("sink worker panicked".into()))?,
            None => Err(AuroraError::Sink("sink worker already joined".into())),
        }
    }

    fn worker_failure(&mut self) -> AuroraError {
        self.sender.take();
        self.overflow.take();
        match self.join_worker() {
            Ok(_) => AuroraError::Sink("sink worker exited early".into()),
            Err(err) => err,
        }
    }
}

impl fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSink")
            .field("mode", &self.mode)
            .field("queued", &self.sender.as_ref().map_or(0, Sender::len))
            .field("superseded", &self.superseded)
            .field("backpressure_waits", &self.backpressure_waits)
            .finish()
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if let Ok(Err(err)) = worker.join() {
                warn!(%err, "frame sink dropped with a failed worker");
            }
        }
    }
}

fn present_loop<R: Renderer>(
    mut renderer: R,
    frames: Receiver<DrawFrame>,
    timeout: Duration,
) -> Result<SinkReport> {
    let mut report = SinkReport::default();
    for frame in frames.iter() {
        match renderer.present(&frame, timeout) {
            Ok(()) => report.delivered += 1,
            Err(err @ AuroraError::SinkTimeout { .. }) => {
                report.timed_out += 1;
                warn!(frame = frame.frame_index(), %err, "frame dropped");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(report)
}

fn encode_loop<E: Encoder>(mut encoder: E, frames: Receiver<DrawFrame>) -> Result<SinkReport> {
    let mut report = SinkReport::default();
    for frame in frames.iter() {
        if let Err(err) = encoder.encode(&frame) {
            // Leave whatever was written in a finished state before bailing.
            if let Err(finish_err) = encoder.finish() {
                warn!(%finish_err, "encoder could not finalise after a failure");
            }
            return Err(err);
        }
        report.delivered += 1;
    }
    encoder.finish()?;
    Ok(report)
}
