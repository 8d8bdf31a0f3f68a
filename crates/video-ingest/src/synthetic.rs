//! In-process synthetic source used by tests and camera-free demo runs.

use chrono::Utc;

use crate::types::{CaptureError, Frame, FrameFormat, FrameSource};

/// Generates a moving gradient pattern instead of reading hardware.
///
/// An endless source never signals end-of-stream. A finite clip behaves like
/// a recorded file: when exhausted it rewinds and retries exactly once per
/// read if `loop_on_eof` is set, otherwise it surfaces `EndOfStream`.
pub struct SyntheticSource {
    width: i32,
    height: i32,
    clip_len: Option<u64>,
    loop_on_eof: bool,
    cursor: u64,
    produced: u64,
}

impl SyntheticSource {
    pub fn endless(size: (i32, i32)) -> Self {
        Self {
            width: size.0,
            height: size.1,
            clip_len: None,
            loop_on_eof: false,
            cursor: 0,
            produced: 0,
        }
    }

    pub fn clip(frames: u64, size: (i32, i32), loop_on_eof: bool) -> Self {
        Self {
            width: size.0,
            height: size.1,
            clip_len: Some(frames),
            loop_on_eof,
            cursor: 0,
            produced: 0,
        }
    }

    fn generate(&mut self, index: u64) -> Frame {
        let width = self.width.max(1) as usize;
        let height = self.height.max(1) as usize;
        let mut data = Vec::with_capacity(width * height * 3);
        let phase = (index % 256) as usize;
        for y in 0..height {
            for x in 0..width {
                let g = ((x + y + phase) % 256) as u8;
                data.push(g / 2);
                data.push(g);
                data.push(255 - g);
            }
        }
        self.produced = self.produced.wrapping_add(1);
        Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let Some(len) = self.clip_len else {
            let index = self.cursor;
            self.cursor = self.cursor.wrapping_add(1);
            return Ok(self.generate(index));
        };

        if self.cursor >= len {
            if !self.loop_on_eof || len == 0 {
                return Err(CaptureError::EndOfStream);
            }
            tracing::debug!("synthetic clip exhausted after {len} frames; rewinding");
            self.cursor = 0;
        }

        let index = self.cursor;
        self.cursor += 1;
        Ok(self.generate(index))
    }

    fn dimensions(&self) -> (i32, i32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_clip_surfaces_end_of_stream() {
        let mut source = SyntheticSource::clip(3, (8, 8), false);
        for _ in 0..3 {
            assert!(source.read().is_ok());
        }
        assert!(matches!(source.read(), Err(CaptureError::EndOfStream)));
        // Subsequent reads keep reporting end-of-stream.
        assert!(matches!(source.read(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn loopable_clip_rewinds_once_per_read() {
        let mut source = SyntheticSource::clip(2, (8, 8), true);
        for _ in 0..7 {
            assert!(source.read().is_ok());
        }
        assert_eq!(source.produced, 7);
    }

    #[test]
    fn empty_loopable_clip_still_ends() {
        let mut source = SyntheticSource::clip(0, (8, 8), true);
        assert!(matches!(source.read(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn frames_match_requested_dimensions() {
        let mut source = SyntheticSource::endless((16, 9));
        let frame = source.read().expect("synthetic read");
        assert_eq!((frame.width, frame.height), (16, 9));
        assert_eq!(frame.data.len(), 16 * 9 * 3);
        assert_eq!(frame.format, FrameFormat::Bgr8);
    }
}
