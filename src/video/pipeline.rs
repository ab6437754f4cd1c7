//! GStreamer pipeline for live camera capture.
//!
//! `v4l2src` (or `autovideosrc`) → `videoconvert` → RGBA `appsink`. The sink
//! keeps only the newest frame; stills are copied out of it on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbaImage;
use thiserror::Error;

use super::stream::{CameraDevice, CameraError, CameraStream, VideoSource};

/// How long to wait for the camera to reach PLAYING before giving up
const START_TIMEOUT_SECS: u64 = 3;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("GStreamer error: {0}")]
    Gstreamer(#[from] gst::glib::Error),
    #[error("GStreamer bool error: {0}")]
    GstreamerBool(#[from] gst::glib::BoolError),
    #[error("Failed to create element: {0}")]
    ElementCreation(String),
    #[error("Camera refused access: {0}")]
    NotAuthorized(String),
    #[error("Camera not found: {0}")]
    NotFound(String),
    #[error("State change failed")]
    StateChange,
}

impl From<PipelineError> for CameraError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotAuthorized(msg) => CameraError::PermissionDenied(msg),
            PipelineError::NotFound(msg) => CameraError::NoDevice(msg),
            other => CameraError::Backend(other.to_string()),
        }
    }
}

type FrameSlot = Arc<Mutex<Option<RgbaImage>>>;

/// Failure reported on the bus, shared with the streaming thread
#[derive(Default)]
struct Health {
    failed: AtomicBool,
    error: Mutex<Option<PipelineError>>,
}

impl Health {
    fn fail(&self, error: Option<PipelineError>) {
        self.failed.store(true, Ordering::SeqCst);
        if let (Some(error), Ok(mut slot)) = (error, self.error.lock()) {
            slot.get_or_insert(error);
        }
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn take_error(&self) -> Option<PipelineError> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Camera device backed by GStreamer
pub struct GstCamera {
    /// Device node for `v4l2src`; `None` uses `autovideosrc`
    device: Option<String>,
}

impl GstCamera {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl CameraDevice for GstCamera {
    fn open(&mut self) -> Result<Box<dyn CameraStream>, CameraError> {
        let pipeline = VideoPipeline::new(self.device.as_deref())?.play()?;
        Ok(Box::new(pipeline))
    }
}

/// A running capture pipeline
pub struct VideoPipeline {
    pipeline: gst::Pipeline,
    latest: FrameSlot,
    health: Arc<Health>,
    running: bool,
}

impl VideoPipeline {
    /// Build the capture pipeline without starting it
    pub fn new(device: Option<&str>) -> Result<Self, PipelineError> {
        gst::init()?;

        let pipeline = gst::Pipeline::new();

        // Source: camera
        let source = match device {
            Some(path) => gst::ElementFactory::make("v4l2src")
                .property("device", path)
                .build()
                .map_err(|_| PipelineError::ElementCreation("v4l2src".into()))?,
            None => gst::ElementFactory::make("autovideosrc")
                .build()
                .map_err(|_| PipelineError::ElementCreation("autovideosrc".into()))?,
        };

        // Video convert to RGBA
        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|_| PipelineError::ElementCreation("videoconvert".into()))?;

        // Sink: keep only the newest frame
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .build();
        let sink = gst_app::AppSink::builder()
            .caps(&caps)
            .max_buffers(1)
            .drop(true)
            .build();

        pipeline.add_many([&source, &convert, sink.upcast_ref()])?;
        gst::Element::link_many([&source, &convert, sink.upcast_ref()])?;

        let latest: FrameSlot = Arc::new(Mutex::new(None));
        let slot = latest.clone();
        sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    match frame_from_sample(&sample) {
                        Some(frame) => {
                            if let Ok(mut latest) = slot.lock() {
                                *latest = Some(frame);
                            }
                        }
                        None => log::warn!("Dropping camera sample without usable caps"),
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let health = Arc::new(Health::default());
        if let Some(bus) = pipeline.bus() {
            let health = health.clone();
            let slot = latest.clone();
            bus.set_sync_handler(move |_, msg| {
                let failure = match msg.view() {
                    gst::MessageView::Error(err) => Some(Some(classify(err.error()))),
                    gst::MessageView::Eos(_) => {
                        log::warn!("Camera stream ended");
                        Some(None)
                    }
                    _ => None,
                };
                if let Some(error) = failure {
                    health.fail(error);
                    // No stale frames once the source is gone
                    if let Ok(mut latest) = slot.lock() {
                        *latest = None;
                    }
                }
                gst::BusSyncReply::Drop
            });
        }

        Ok(Self {
            pipeline,
            latest,
            health,
            running: false,
        })
    }

    /// Start the pipeline and wait for the camera to come up
    pub fn play(mut self) -> Result<Self, PipelineError> {
        log::info!("Starting camera pipeline");
        let started = self
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| PipelineError::StateChange)
            .and_then(|_| {
                let (result, _, _) = self
                    .pipeline
                    .state(gst::ClockTime::from_seconds(START_TIMEOUT_SECS));
                result.map(|_| ()).map_err(|_| PipelineError::StateChange)
            });

        // The bus carries the actual reason when the source fails to open
        if let Some(err) = self.health.take_error() {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(err);
        }
        if let Err(e) = started {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(e);
        }
        if self.health.is_failed() {
            let _ = self.pipeline.set_state(gst::State::Null);
            return Err(PipelineError::NotFound("camera stream ended while starting".into()));
        }

        self.running = true;
        Ok(self)
    }

    /// Playing and no error or end-of-stream seen since
    fn is_live(&self) -> bool {
        self.running && !self.health.is_failed()
    }
}

fn classify(error: gst::glib::Error) -> PipelineError {
    let text = error.to_string();
    log::error!("Camera pipeline error: {}", text);
    if error.matches(gst::ResourceError::NotAuthorized) {
        PipelineError::NotAuthorized(text)
    } else if error.matches(gst::ResourceError::NotFound)
        || error.matches(gst::ResourceError::OpenRead)
    {
        PipelineError::NotFound(text)
    } else {
        PipelineError::Gstreamer(error)
    }
}

impl VideoSource for VideoPipeline {
    fn native_size(&self) -> (u32, u32) {
        if !self.is_live() {
            return (0, 0);
        }
        self.latest
            .lock()
            .ok()
            .and_then(|latest| latest.as_ref().map(|f| f.dimensions()))
            .unwrap_or((0, 0))
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        if !self.is_live() {
            return None;
        }
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }
}

impl CameraStream for VideoPipeline {
    fn live_tracks(&self) -> usize {
        usize::from(self.is_live())
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        log::info!("Stopping camera pipeline");
        if self.pipeline.set_state(gst::State::Null).is_err() {
            log::warn!("Camera pipeline did not reach NULL cleanly");
        }
        self.running = false;
        if let Ok(mut latest) = self.latest.lock() {
            *latest = None;
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Copy an RGBA sample into a tightly packed image
fn frame_from_sample(sample: &gst::Sample) -> Option<RgbaImage> {
    let info = gst_video::VideoInfo::from_caps(sample.caps()?).ok()?;
    let (width, height) = (info.width(), info.height());
    let stride = usize::try_from(*info.stride().first()?).ok()?;
    let row = width as usize * 4;

    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        pixels.extend_from_slice(data.get(start..start + row)?);
    }
    RgbaImage::from_raw(width, height, pixels)
}
