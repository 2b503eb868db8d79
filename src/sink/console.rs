//! Text output of detections.
//!
//! Full detail prints one block per detection:
//!
//! ```text
//! Frame 12: 1 object(s) detected
//!   [1] cup (confidence: 82.00%)
//!       position: (10.0, 10.0) -> (50.0, 50.0)
//!       center: (30.0, 30.0)
//!       size: 40.0 x 40.0 px
//! ```
//!
//! Minimal detail prints one line per detection:
//!
//! ```text
//! frame=12 class=cup confidence=82.00% bbox=[10.0,10.0,50.0,50.0]
//! ```
//!
//! Frames without detections only produce a status line every
//! `status_interval` frames.

use std::io::Write;

use anyhow::{Context, Result};

use super::{DetectionSink, SinkControl};
use crate::detect::{DerivedMetrics, FilteredDetection, OutputDetail};
use crate::frame::Frame;

pub const DEFAULT_STATUS_INTERVAL: u64 = 30;

pub struct ConsoleSink<W: Write> {
    out: W,
    detail: OutputDetail,
    status_interval: u64,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, detail: OutputDetail) -> Self {
        Self {
            out,
            detail,
            status_interval: DEFAULT_STATUS_INTERVAL,
        }
    }

    /// `0` disables the status line.
    pub fn with_status_interval(mut self, interval: u64) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_full(&mut self, frame_index: u64, detections: &[FilteredDetection]) -> std::io::Result<()> {
        writeln!(
            self.out,
            "Frame {}: {} object(s) detected",
            frame_index,
            detections.len()
        )?;
        for (i, det) in detections.iter().enumerate() {
            let bbox = det.bbox();
            let metrics = det.metrics.unwrap_or_else(|| DerivedMetrics::of(bbox));
            writeln!(
                self.out,
                "  [{}] {} (confidence: {:.2}%)",
                i + 1,
                det.class_name(),
                det.confidence() * 100.0
            )?;
            writeln!(
                self.out,
                "      position: ({:.1}, {:.1}) -> ({:.1}, {:.1})",
                bbox.x1, bbox.y1, bbox.x2, bbox.y2
            )?;
            writeln!(
                self.out,
                "      center: ({:.1}, {:.1})",
                metrics.center.0, metrics.center.1
            )?;
            writeln!(
                self.out,
                "      size: {:.1} x {:.1} px",
                metrics.size.0, metrics.size.1
            )?;
        }
        Ok(())
    }

    fn write_minimal(&mut self, frame_index: u64, detections: &[FilteredDetection]) -> std::io::Result<()> {
        for det in detections {
            let bbox = det.bbox();
            writeln!(
                self.out,
                "frame={} class={} confidence={:.2}% bbox=[{:.1},{:.1},{:.1},{:.1}]",
                frame_index,
                det.class_name(),
                det.confidence() * 100.0,
                bbox.x1,
                bbox.y1,
                bbox.x2,
                bbox.y2
            )?;
        }
        Ok(())
    }
}

impl<W: Write> DetectionSink for ConsoleSink<W> {
    fn consume(
        &mut self,
        frame_index: u64,
        _frame: &Frame,
        detections: &[FilteredDetection],
    ) -> Result<SinkControl> {
        let written = if detections.is_empty() {
            if self.status_interval > 0 && frame_index % self.status_interval == 0 {
                writeln!(self.out, "Frame {}: no detections", frame_index)
            } else {
                Ok(())
            }
        } else {
            match self.detail {
                OutputDetail::Full => self.write_full(frame_index, detections),
                OutputDetail::Minimal => self.write_minimal(frame_index, detections),
            }
        };
        written
            .and_then(|()| self.out.flush())
            .context("failed to write detections to console")?;
        Ok(SinkControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, RawDetection};

    fn cup(metrics: bool) -> FilteredDetection {
        let bbox = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        FilteredDetection {
            metrics: metrics.then(|| DerivedMetrics::of(&bbox)),
            raw: RawDetection::new(41, "cup", 0.82, bbox),
        }
    }

    fn run(detail: OutputDetail, frames: &[(u64, Vec<FilteredDetection>)]) -> String {
        let frame = Frame::filled(1, 1, [0, 0, 0]).unwrap();
        let mut sink = ConsoleSink::new(Vec::new(), detail);
        for (index, dets) in frames {
            assert_eq!(sink.consume(*index, &frame, dets).unwrap(), SinkControl::Continue);
        }
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn full_detail_block() {
        let out = run(OutputDetail::Full, &[(1, vec![cup(true)])]);
        assert_eq!(
            out,
            "Frame 1: 1 object(s) detected\n\
             \x20 [1] cup (confidence: 82.00%)\n\
             \x20     position: (10.0, 10.0) -> (50.0, 50.0)\n\
             \x20     center: (30.0, 30.0)\n\
             \x20     size: 40.0 x 40.0 px\n"
        );
    }

    #[test]
    fn minimal_detail_line() {
        let out = run(OutputDetail::Minimal, &[(3, vec![cup(false)])]);
        assert_eq!(out, "frame=3 class=cup confidence=82.00% bbox=[10.0,10.0,50.0,50.0]\n");
    }

    #[test]
    fn minimal_detail_keeps_one_decimal() {
        let det = FilteredDetection {
            raw: RawDetection::new(2, "car", 0.5, BoundingBox::new(12.5, 3.25, 40.75, 9.0)),
            metrics: None,
        };
        let out = run(OutputDetail::Minimal, &[(1, vec![det])]);
        assert!(out.contains("bbox=[12.5,3.2,40.8,9.0]"), "{out}");
    }

    #[test]
    fn full_detail_derives_missing_metrics() {
        let out = run(OutputDetail::Full, &[(1, vec![cup(false)])]);
        assert!(out.contains("center: (30.0, 30.0)"));
    }

    #[test]
    fn status_line_only_on_interval() {
        let frames: Vec<(u64, Vec<FilteredDetection>)> = (1..=61).map(|i| (i, Vec::new())).collect();
        let out = run(OutputDetail::Full, &frames);
        assert_eq!(out, "Frame 30: no detections\nFrame 60: no detections\n");
    }

    #[test]
    fn zero_interval_is_silent() {
        let frame = Frame::filled(1, 1, [0, 0, 0]).unwrap();
        let mut sink = ConsoleSink::new(Vec::new(), OutputDetail::Full).with_status_interval(0);
        sink.consume(30, &frame, &[]).unwrap();
        assert!(sink.into_inner().is_empty());
    }
}
