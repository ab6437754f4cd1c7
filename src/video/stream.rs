//! Camera stream ownership.
//!
//! `MediaStreamController` is the single owner of the active camera stream.
//! Every path that leaves live view goes through [`MediaStreamController::stop`],
//! and [`MediaStreamController::start`] always stops the previous stream first,
//! so at most one stream's tracks are ever running.

use image::RgbaImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),
    #[cfg(feature = "gstreamer")]
    #[error("No camera device found: {0}")]
    NoDevice(String),
    #[error("Camera backend error: {0}")]
    Backend(String),
}

/// Anything a still frame can be pulled from.
pub trait VideoSource {
    /// Native resolution of the source, `(0, 0)` until the first frame is ready.
    fn native_size(&self) -> (u32, u32);

    /// Latest decoded frame at native resolution.
    fn current_frame(&self) -> Option<RgbaImage>;
}

/// A running camera stream made of one or more hardware tracks.
pub trait CameraStream: VideoSource {
    /// Number of tracks that are still running
    fn live_tracks(&self) -> usize;

    /// Halt every track. Calling this on a stopped stream does nothing.
    fn stop(&mut self);

    fn is_active(&self) -> bool {
        self.live_tracks() > 0
    }
}

/// Something that can hand out camera streams.
pub trait CameraDevice {
    /// Open a user-facing (selfie) stream
    fn open(&mut self) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// Owns the camera stream for one capture session
pub struct MediaStreamController {
    device: Box<dyn CameraDevice>,
    stream: Option<Box<dyn CameraStream>>,
}

impl MediaStreamController {
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        Self {
            device,
            stream: None,
        }
    }

    /// Acquire a user-facing stream, releasing any previous one first
    pub fn start(&mut self) -> Result<(), CameraError> {
        self.stop();

        log::info!("Requesting user-facing camera stream");
        let stream = self.device.open().map_err(|e| {
            log::error!("Camera unavailable: {}", e);
            e
        })?;

        log::info!("Camera stream active ({} tracks)", stream.live_tracks());
        self.stream = Some(stream);
        Ok(())
    }

    /// Halt every track of the current stream, if any
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            log::info!("Stopping camera stream");
            stream.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.is_active())
    }

    /// The live stream, for composing stills
    pub fn stream(&self) -> Option<&dyn CameraStream> {
        self.stream.as_deref()
    }
}

impl Drop for MediaStreamController {
    fn drop(&mut self) {
        self.stop();
    }
}
