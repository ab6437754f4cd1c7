//! Camera acquisition.

#[cfg(feature = "gstreamer")]
pub mod pipeline;
pub mod stream;
pub mod synthetic;

pub use stream::{CameraDevice, CameraError, CameraStream, MediaStreamController, VideoSource};
pub use synthetic::SyntheticCamera;

use crate::config::CameraSelection;

/// Open the camera device named by the configuration
pub fn open_device(selection: &CameraSelection) -> Box<dyn CameraDevice> {
    match selection {
        CameraSelection::Synthetic => {
            log::info!("Using synthetic test-pattern camera");
            Box::new(SyntheticCamera::new(1280, 720))
        }
        #[cfg(feature = "gstreamer")]
        CameraSelection::Auto => Box::new(pipeline::GstCamera::new(None)),
        #[cfg(feature = "gstreamer")]
        CameraSelection::Device(path) => Box::new(pipeline::GstCamera::new(Some(path.clone()))),
        #[cfg(not(feature = "gstreamer"))]
        other => {
            log::warn!(
                "Camera {:?} needs the `gstreamer` feature, falling back to the test pattern",
                other
            );
            Box::new(SyntheticCamera::new(1280, 720))
        }
    }
}
