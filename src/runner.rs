//! The frame loop.
//!
//! Single-threaded and blocking: read, detect, filter, hand to the sink, then
//! check for a stop request. The frame counter and the FPS meter belong to the
//! loop. Capture and display resources are owned by the caller and released by
//! their `Drop` impls whatever way the loop ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::detect::DetectionFilterPipeline;
use crate::ingest::FrameSource;
use crate::sink::{DetectionSink, SinkControl};

pub const DEFAULT_FPS_LOG_INTERVAL: u64 = 30;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The sink reported a quit key.
    KeyPress,
    /// Ctrl-C or another stop request.
    Interrupt,
    EndOfStream,
    /// A frame read failed. Logged, not retried.
    ReadFailure(String),
    /// `--max-frames` reached.
    FrameLimit,
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            StopReason::KeyPress => "quit key pressed".to_string(),
            StopReason::Interrupt => "interrupted".to_string(),
            StopReason::EndOfStream => "end of stream".to_string(),
            StopReason::ReadFailure(reason) => format!("frame read failed: {reason}"),
            StopReason::FrameLimit => "frame limit reached".to_string(),
        }
    }
}

/// Cooperative cancellation, checked once per iteration.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route Ctrl-C to this flag. Can only be installed once per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            flag.request();
        })
        .context("error setting Ctrl-C handler")
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Frames per second over windows of `interval` frames.
#[derive(Clone, Debug)]
pub struct FpsMeter {
    interval: u64,
    window_start: Instant,
    window_frames: u64,
}

impl FpsMeter {
    pub fn new(interval: u64) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: u64, start: Instant) -> Self {
        Self {
            interval,
            window_start: start,
            window_frames: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f32> {
        self.tick_at(Instant::now())
    }

    /// Count one frame. Returns the window's FPS when the window closes.
    pub fn tick_at(&mut self, now: Instant) -> Option<f32> {
        self.window_frames += 1;
        if self.interval == 0 || self.window_frames < self.interval {
            return None;
        }
        let elapsed = now
            .saturating_duration_since(self.window_start)
            .as_secs_f32()
            .max(f32::EPSILON);
        let fps = self.window_frames as f32 / elapsed;
        self.window_start = now;
        self.window_frames = 0;
        Some(fps)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub stop: StopReason,
    pub elapsed_secs: f32,
}

impl RunSummary {
    pub fn average_fps(&self) -> Option<f32> {
        (self.elapsed_secs > 0.0 && self.frames > 0).then(|| self.frames as f32 / self.elapsed_secs)
    }
}

pub struct Runner {
    stop: StopFlag,
    fps_log_interval: u64,
    max_frames: Option<u64>,
}

impl Runner {
    pub fn new(stop: StopFlag) -> Self {
        Self {
            stop,
            fps_log_interval: DEFAULT_FPS_LOG_INTERVAL,
            max_frames: None,
        }
    }

    pub fn with_fps_log_interval(mut self, interval: u64) -> Self {
        self.fps_log_interval = interval;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Run until a stop condition. Detector and sink errors abort the loop
    /// with `Err`; read failures end it with [`StopReason::ReadFailure`].
    pub fn run<S, K>(
        &self,
        source: &mut S,
        pipeline: &mut DetectionFilterPipeline,
        sink: &mut K,
    ) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
        K: DetectionSink + ?Sized,
    {
        let started = Instant::now();
        let mut meter = FpsMeter::starting_at(self.fps_log_interval, started);
        let mut frames: u64 = 0;
        let mut detections: u64 = 0;

        let stop = loop {
            if self.stop.is_requested() {
                break StopReason::Interrupt;
            }
            if self.max_frames.is_some_and(|max| frames >= max) {
                break StopReason::FrameLimit;
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break StopReason::EndOfStream,
                Err(err) => {
                    log::error!("{}", err);
                    break StopReason::ReadFailure(err.to_string());
                }
            };
            frames += 1;

            let found = pipeline
                .step(&frame)
                .with_context(|| format!("detection failed on frame {frames}"))?;
            detections += found.len() as u64;

            let control = sink
                .consume(frames, &frame, &found)
                .with_context(|| format!("output failed on frame {frames}"))?;

            if let Some(fps) = meter.tick() {
                log::info!(
                    "fps: {:.1} (frame {}, device {})",
                    fps,
                    frames,
                    pipeline.device().device
                );
            }
            if control == SinkControl::Stop {
                break StopReason::KeyPress;
            }
        };

        let summary = RunSummary {
            frames,
            detections,
            stop,
            elapsed_secs: started.elapsed().as_secs_f32(),
        };
        log::info!(
            "stopped after {} frames ({} detections): {}",
            summary.frames,
            summary.detections,
            summary.stop.describe()
        );
        Ok(summary)
    }
}
