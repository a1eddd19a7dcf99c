//! Capture Layer
//!
//! Camera streams are hardware locks: a stream is acquired immediately before
//! a still is taken and its tracks are stopped on every exit path. The actual
//! device backend lives with the capture UI and is plugged in through
//! [`CameraSource`].

pub mod frame;

use tracing::{debug, warn};

use crate::error::{EquiError, Result};
use frame::CapturedFrame;

/// An open camera stream
pub trait MediaStream: Send {
    /// Grab the current frame
    fn grab_frame(&mut self) -> Result<CapturedFrame>;

    /// Stop every track and release the device. Must be idempotent.
    fn stop_tracks(&mut self);
}

/// Something that can open a camera stream
pub trait CameraSource: Send + Sync {
    /// Open a stream; permission and hardware problems map to
    /// [`EquiError::CameraAccess`]
    fn open(&self) -> Result<Box<dyn MediaStream>>;
}

/// Owns an open stream and stops its tracks when dropped
pub struct ScopedStream {
    stream: Option<Box<dyn MediaStream>>,
}

impl ScopedStream {
    /// Open a stream from the source
    pub fn acquire(source: &dyn CameraSource) -> Result<Self> {
        let stream = source.open()?;
        debug!("Camera stream acquired");
        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Grab a frame from the held stream
    pub fn grab_frame(&mut self) -> Result<CapturedFrame> {
        match self.stream.as_mut() {
            Some(stream) => stream.grab_frame(),
            None => Err(EquiError::CameraAccess("stream already released".to_string())),
        }
    }

    /// Release early, e.g. when the user cancels. In-flight analysis of an
    /// already grabbed frame is unaffected.
    pub fn release(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
            debug!("Camera stream released");
        }
    }
}

impl Drop for ScopedStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Take a single still: acquire, grab, release
pub fn capture_still(source: &dyn CameraSource) -> Result<CapturedFrame> {
    let mut stream = ScopedStream::acquire(source)?;
    let frame = stream.grab_frame();
    if let Err(e) = &frame {
        warn!("Frame capture failed: {}", e);
    }
    frame
}
