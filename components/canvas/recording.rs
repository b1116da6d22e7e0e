/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Deferred paint recording. Draw calls accumulate here without touching the
//! backing store, so a frame's worth of work can be rastered in one batch.

use euclid::default::{Rect, Size2D};
use pixels::Color;
use serde::{Deserialize, Serialize};

/// A recorded drawing operation. The set is deliberately small; anything the
/// bridge cannot express as a recorded op goes through the direct
/// `write_pixels` path instead.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum DrawOp {
    /// Replace the whole surface with a color.
    Clear(Color),
    /// Source-over fill of an axis-aligned rectangle.
    FillRect(Rect<f32>, Color),
}

impl DrawOp {
    /// The region the op may touch, clamped to the surface.
    pub fn bounds(&self, surface: Size2D<u32>) -> Rect<f32> {
        let surface = Rect::from_size(surface.to_f32());
        match *self {
            DrawOp::Clear(..) => surface,
            DrawOp::FillRect(rect, ..) => rect.intersection(&surface).unwrap_or(Rect::zero()),
        }
    }
}

/// An immutable, finished sequence of recorded operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PaintRecord {
    ops: Vec<DrawOp>,
}

impl PaintRecord {
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordingError {
    /// `record` or `finish` called without a live recording. A programming
    /// error in the caller; asserts in debug builds.
    InvalidState,
}

/// Accumulates operations between `start` and `finish`.
#[derive(Default)]
pub struct PaintRecorder {
    ops: Option<Vec<DrawOp>>,
}

impl PaintRecorder {
    pub fn new() -> PaintRecorder {
        PaintRecorder::default()
    }

    /// Begins a new empty recording, discarding any uncommitted one.
    pub fn start(&mut self) {
        self.ops = Some(Vec::new());
    }

    pub fn record(&mut self, op: DrawOp) -> Result<(), RecordingError> {
        match self.ops.as_mut() {
            Some(ops) => {
                ops.push(op);
                Ok(())
            },
            None => {
                debug_assert!(false, "record() without start()");
                Err(RecordingError::InvalidState)
            },
        }
    }

    /// Ends the recording and returns it. The recorder is empty afterwards;
    /// a second `finish` without an intervening `start` fails.
    pub fn finish(&mut self) -> Result<PaintRecord, RecordingError> {
        match self.ops.take() {
            Some(ops) => Ok(PaintRecord { ops }),
            None => {
                debug_assert!(false, "finish() without start()");
                Err(RecordingError::InvalidState)
            },
        }
    }
}

#[cfg(test)]
mod test {
    use euclid::default::Point2D;

    use super::*;

    #[test]
    fn test_finish_returns_recorded_ops_in_order() {
        let mut recorder = PaintRecorder::new();
        recorder.start();
        recorder.record(DrawOp::Clear(Color::WHITE)).unwrap();
        recorder
            .record(DrawOp::FillRect(
                Rect::new(Point2D::new(1.0, 1.0), Size2D::new(2.0, 2.0)),
                Color::BLACK,
            ))
            .unwrap();
        let record = recorder.finish().unwrap();
        assert_eq!(record.ops().len(), 2);
        assert_eq!(record.ops()[0], DrawOp::Clear(Color::WHITE));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_finish_without_start_is_invalid_state() {
        let mut recorder = PaintRecorder::new();
        recorder.start();
        recorder.finish().unwrap();
        assert_eq!(recorder.finish(), Err(RecordingError::InvalidState));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "finish() without start()")]
    fn test_finish_without_start_asserts_in_debug() {
        let mut recorder = PaintRecorder::new();
        recorder.start();
        let _ = recorder.finish();
        let _ = recorder.finish();
    }

    #[test]
    fn test_start_discards_uncommitted_recording() {
        let mut recorder = PaintRecorder::new();
        recorder.start();
        recorder.record(DrawOp::Clear(Color::BLACK)).unwrap();
        recorder.start();
        assert!(recorder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_clear_bounds_cover_surface() {
        let bounds = DrawOp::Clear(Color::BLACK).bounds(Size2D::new(10, 20));
        assert_eq!(bounds, Rect::from_size(Size2D::new(10.0, 20.0)));
    }

    #[test]
    fn test_fill_rect_bounds_clamped() {
        let op = DrawOp::FillRect(
            Rect::new(Point2D::new(5.0, 5.0), Size2D::new(100.0, 100.0)),
            Color::BLACK,
        );
        let bounds = op.bounds(Size2D::new(10, 10));
        assert_eq!(
            bounds,
            Rect::new(Point2D::new(5.0, 5.0), Size2D::new(5.0, 5.0))
        );
    }
}
