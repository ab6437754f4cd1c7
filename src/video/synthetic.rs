//! In-process test-pattern camera.
//!
//! Stands in for real hardware when no camera is attached and in tests.
//! A [`CameraProbe`] shares the device's bookkeeping so callers can check
//! how many tracks are running and flip the source between ready and
//! not-ready.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::stream::{CameraDevice, CameraError, CameraStream, VideoSource};

/// Colour of the marker block in the top-left quarter of the test pattern
pub const MARKER: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Gradient background with a solid marker in the top-left quarter.
///
/// The marker makes a horizontal flip easy to spot.
pub fn test_pattern(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if x < width / 4 && y < height / 4 {
            MARKER
        } else {
            let r = (x * 200 / width.max(1)) as u8;
            let g = (y * 200 / height.max(1)) as u8;
            Rgba([r, g, 96, 255])
        }
    })
}

#[derive(Debug)]
struct Shared {
    live_tracks: AtomicUsize,
    opened: AtomicUsize,
    ready: AtomicBool,
    unplugged: AtomicBool,
}

/// Observer for a [`SyntheticCamera`]
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct CameraProbe {
    shared: Arc<Shared>,
}

#[cfg(test)]
impl CameraProbe {
    /// Tracks currently running across every stream the device handed out
    pub fn live_tracks(&self) -> usize {
        self.shared.live_tracks.load(Ordering::SeqCst)
    }

    /// How many streams have been opened so far
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Drop every running stream's tracks as if the device was pulled out.
    /// Streams keep their last frame; the next open reconnects.
    pub fn unplug(&self) {
        self.shared.unplugged.store(true, Ordering::SeqCst);
    }

    /// Make the source report real dimensions (or 0x0 when `false`)
    pub fn set_ready(&self, ready: bool) {
        self.shared.ready.store(ready, Ordering::SeqCst);
    }
}

/// Test-pattern camera device
pub struct SyntheticCamera {
    frame: Arc<RgbaImage>,
    tracks: usize,
    deny: bool,
    shared: Arc<Shared>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_frame(test_pattern(width, height))
    }

    /// Serve a fixed frame instead of the default pattern
    pub fn with_frame(frame: RgbaImage) -> Self {
        Self {
            frame: Arc::new(frame),
            tracks: 1,
            deny: false,
            shared: Arc::new(Shared {
                live_tracks: AtomicUsize::new(0),
                opened: AtomicUsize::new(0),
                ready: AtomicBool::new(true),
                unplugged: AtomicBool::new(false),
            }),
        }
    }

    #[cfg(test)]
    pub fn with_tracks(mut self, tracks: usize) -> Self {
        self.tracks = tracks.max(1);
        self
    }

    /// Refuse every open as if the user denied camera permission
    #[cfg(test)]
    pub fn denied(mut self) -> Self {
        self.deny = true;
        self
    }

    /// Start streams that report 0x0 until the probe marks them ready
    #[cfg(test)]
    pub fn not_ready(self) -> Self {
        self.shared.ready.store(false, Ordering::SeqCst);
        self
    }

    #[cfg(test)]
    pub fn probe(&self) -> CameraProbe {
        CameraProbe {
            shared: self.shared.clone(),
        }
    }
}

impl CameraDevice for SyntheticCamera {
    fn open(&mut self) -> Result<Box<dyn CameraStream>, CameraError> {
        if self.deny {
            return Err(CameraError::PermissionDenied(
                "camera access was not granted".into(),
            ));
        }

        log::debug!("Opening synthetic camera");
        self.shared.unplugged.store(false, Ordering::SeqCst);
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        self.shared.live_tracks.fetch_add(self.tracks, Ordering::SeqCst);

        Ok(Box::new(SyntheticStream {
            frame: self.frame.clone(),
            running: self.tracks,
            shared: self.shared.clone(),
        }))
    }
}

struct SyntheticStream {
    frame: Arc<RgbaImage>,
    running: usize,
    shared: Arc<Shared>,
}

impl SyntheticStream {
    fn ready(&self) -> bool {
        self.running > 0 && self.shared.ready.load(Ordering::SeqCst)
    }
}

impl VideoSource for SyntheticStream {
    fn native_size(&self) -> (u32, u32) {
        if self.ready() {
            self.frame.dimensions()
        } else {
            (0, 0)
        }
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        self.ready().then(|| self.frame.as_ref().clone())
    }
}

impl CameraStream for SyntheticStream {
    fn live_tracks(&self) -> usize {
        if self.shared.unplugged.load(Ordering::SeqCst) {
            0
        } else {
            self.running
        }
    }

    fn stop(&mut self) {
        if self.running > 0 {
            self.shared
                .live_tracks
                .fetch_sub(self.running, Ordering::SeqCst);
            self.running = 0;
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}
