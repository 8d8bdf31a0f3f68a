//! OpenCV-backed camera and video-file capture.

use anyhow::anyhow;
use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};

use crate::types::{CaptureError, Frame, FrameFormat, FrameSource};

/// Exclusive handle on an OpenCV capture device or file.
///
/// Device feeds surface read failures directly; file-backed feeds are treated
/// as loopable and seek back to the first frame once before reporting
/// end-of-stream.
pub struct CameraSource {
    cap: VideoCapture,
    target: (i32, i32),
    loopable: bool,
    frame: Mat,
    scratch: Mat,
}

impl CameraSource {
    pub fn open(uri: &str, target_size: (i32, i32)) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(uri)?;
        let loopable = parse_device_index(uri).is_none();
        if !loopable {
            configure_camera(&mut cap, target_size, 30.0);
        }
        Ok(Self {
            cap,
            target: target_size,
            loopable,
            frame: Mat::default(),
            scratch: Mat::default(),
        })
    }

    fn grab(&mut self) -> Result<bool, CaptureError> {
        let ok = self.cap.read(&mut self.frame).map_err(cv_err)?;
        if !ok {
            return Ok(false);
        }
        let size = self.frame.size().map_err(cv_err)?;
        Ok(size.width > 0 && size.height > 0)
    }
}

impl FrameSource for CameraSource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let mut got = self.grab()?;
        if !got {
            if !self.loopable {
                return Err(CaptureError::Read(anyhow!("camera returned no frame")));
            }
            // Recorded clip exhausted: rewind and retry exactly once.
            tracing::debug!("video source exhausted; seeking to first frame");
            self.cap
                .set(videoio::CAP_PROP_POS_FRAMES, 0.0)
                .map_err(cv_err)?;
            got = self.grab()?;
            if !got {
                return Err(CaptureError::EndOfStream);
            }
        }

        let (target_w, target_h) = self.target;
        let size = self.frame.size().map_err(cv_err)?;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(cv_err)?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working.data_bytes().map_err(cv_err)?.to_vec();

        Ok(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }

    fn dimensions(&self) -> (i32, i32) {
        self.target
    }
}

fn cv_err(err: opencv::Error) -> CaptureError {
    CaptureError::Read(err.into())
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap
                        .is_opened()
                        .map_err(|e| CaptureError::Read(e.into()))?
                    {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "failed to open device #{index} with backend {backend}: {err}"
                    );
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap
                    .is_opened()
                    .map_err(|e| CaptureError::Read(e.into()))?
                {
                    return Ok(cap);
                }
            }
            Err(err) => {
                tracing::warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply common capture settings (resolution, fps, preferred pixel format).
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    let mut fourcc_set = false;
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
            fourcc_set = true;
        }
    }
    if !fourcc_set {
        if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
