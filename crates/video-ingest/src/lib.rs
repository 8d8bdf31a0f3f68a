//! Frame acquisition for the larva monitor.
//!
//! A [`FrameSource`] is an exclusively-owned, blocking handle on one video
//! feed. The crate ships a synthetic generator for tests and demos; real
//! camera/file capture via OpenCV sits behind the `capture-opencv` feature.

#[cfg(feature = "capture-opencv")]
mod camera;
mod synthetic;
mod types;

#[cfg(feature = "capture-opencv")]
pub use camera::CameraSource;
pub use synthetic::SyntheticSource;
pub use types::{shared, CaptureError, Frame, FrameFormat, FrameSource, SharedSource};

/// Open the source named by `uri`.
///
/// `synthetic:` yields an endless generated feed and `synthetic:<frames>` a
/// loopable generated clip; anything else is handed to the OpenCV backend
/// when compiled in.
pub fn open_source(uri: &str, target_size: (i32, i32)) -> Result<Box<dyn FrameSource>, CaptureError> {
    if let Some(rest) = uri.strip_prefix("synthetic") {
        let spec = rest.strip_prefix(':').unwrap_or("");
        if spec.is_empty() {
            return Ok(Box::new(SyntheticSource::endless(target_size)));
        }
        let frames = spec.parse::<u64>().map_err(|_| CaptureError::Open {
            uri: uri.to_string(),
        })?;
        return Ok(Box::new(SyntheticSource::clip(frames, target_size, true)));
    }

    #[cfg(feature = "capture-opencv")]
    {
        return Ok(Box::new(CameraSource::open(uri, target_size)?));
    }

    #[cfg(not(feature = "capture-opencv"))]
    {
        tracing::error!(
            "source {uri:?} requires the `capture-opencv` feature; \
             rebuild with --features capture-opencv or use a synthetic: source"
        );
        Err(CaptureError::Open {
            uri: uri.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_uri_opens_endless_source() {
        let mut source = open_source("synthetic:", (4, 4)).expect("open synthetic");
        assert_eq!(source.dimensions(), (4, 4));
        assert!(source.read().is_ok());
    }

    #[test]
    fn synthetic_clip_uri_parses_frame_count() {
        assert!(open_source("synthetic:12", (4, 4)).is_ok());
        assert!(open_source("synthetic:not-a-number", (4, 4)).is_err());
    }
}
