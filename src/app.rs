//! Application context - bridges the hardware-free state machine with the
//! camera, compositor and backend.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::BackendApi;
use crate::compose::{CapturedImage, ComposeError, FrameCompositor, WatermarkLoader};
use crate::state::{CaptureCommand, CaptureError, CaptureEvent, CaptureState, CaptureStateMachine};
use crate::video::{CameraDevice, MediaStreamController};

/// Messages sent from async tasks to the main loop
#[derive(Debug, Clone)]
pub enum AppMessage {
    /// Process a capture event through the state machine
    Event(CaptureEvent),
}

/// Sender that can dispatch messages to the main loop from any thread
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<AppMessage>,
}

impl MessageSender {
    pub fn send(&self, msg: AppMessage) {
        let _ = self.tx.send(msg);
    }
}

/// Application context - holds the capture session and executes its commands
pub struct AppContext {
    /// The hardware-free state machine
    pub state_machine: RefCell<CaptureStateMachine>,
    /// Sole owner of the camera stream
    camera: RefCell<MediaStreamController>,
    compositor: FrameCompositor,
    api: Arc<dyn BackendApi>,
    /// Tokio runtime for async operations
    pub runtime: Arc<tokio::runtime::Runtime>,
    /// Sender for dispatching messages to the main loop
    pub message_tx: MessageSender,
    watermark_loader: RefCell<WatermarkLoader>,
    /// Outcome of the last compose, picked up by `capture`
    compose_outcome: Cell<Option<Result<(), CaptureError>>>,
}

impl AppContext {
    pub fn new(
        runtime: Arc<tokio::runtime::Runtime>,
        device: Box<dyn CameraDevice>,
        api: Arc<dyn BackendApi>,
        mirror: bool,
    ) -> (Rc<Self>, mpsc::UnboundedReceiver<AppMessage>) {
        Self::with_compositor(runtime, device, api, mirror, FrameCompositor::default())
    }

    pub fn with_compositor(
        runtime: Arc<tokio::runtime::Runtime>,
        device: Box<dyn CameraDevice>,
        api: Arc<dyn BackendApi>,
        mirror: bool,
        compositor: FrameCompositor,
    ) -> (Rc<Self>, mpsc::UnboundedReceiver<AppMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let ctx = Rc::new(Self {
            state_machine: RefCell::new(CaptureStateMachine::new(mirror)),
            camera: RefCell::new(MediaStreamController::new(device)),
            compositor,
            api,
            runtime,
            message_tx: MessageSender { tx },
            watermark_loader: RefCell::new(WatermarkLoader::new()),
            compose_outcome: Cell::new(None),
        });

        (ctx, rx)
    }

    /// Send an event to the state machine (from any thread)
    pub fn send_event(&self, event: CaptureEvent) {
        self.message_tx.send(AppMessage::Event(event));
    }

    /// Route a message received from the channel
    pub fn handle_message(&self, msg: AppMessage) {
        match msg {
            AppMessage::Event(event) => {
                self.process_event(event);
            }
        }
    }

    /// Process an event and execute resulting commands
    pub fn process_event(&self, event: CaptureEvent) -> Vec<CaptureCommand> {
        // Borrow ends here; commands may feed events straight back in
        let commands = self.state_machine.borrow_mut().process(event);

        for cmd in &commands {
            self.execute_command(cmd.clone());
        }

        commands
    }

    /// Start the session: acquire the camera
    pub fn mount(&self) -> Result<(), CaptureError> {
        self.process_event(CaptureEvent::Mount);
        match &self.state_machine.borrow().error {
            Some(err @ CaptureError::CameraUnavailable(_)) => Err(err.clone()),
            _ => Ok(()),
        }
    }

    /// Take a still from the live stream.
    ///
    /// Ignored outside live view or without a running camera. Fails with
    /// [`CaptureError::SourceNotReady`] if the camera has not delivered a
    /// frame yet, in which case live view stays as it was. A stream that
    /// died since it started fails with [`CaptureError::CameraUnavailable`].
    pub fn capture(&self) -> Result<(), CaptureError> {
        self.compose_outcome.set(None);
        self.process_event(CaptureEvent::Capture);
        self.compose_outcome.take().unwrap_or(Ok(()))
    }

    pub fn retake(&self) {
        self.process_event(CaptureEvent::Retake);
    }

    pub fn confirm(&self) {
        self.process_event(CaptureEvent::Confirm);
    }

    pub fn toggle_mirror(&self) {
        self.process_event(CaptureEvent::ToggleMirror);
    }

    /// Release the camera and abandon pending work. Safe to call twice.
    pub fn teardown(&self) {
        self.process_event(CaptureEvent::Teardown);
    }

    pub fn state(&self) -> CaptureState {
        self.state_machine.borrow().state
    }

    pub fn preview(&self) -> Option<CapturedImage> {
        self.state_machine.borrow().preview.clone()
    }

    pub fn camera_active(&self) -> bool {
        self.camera.borrow().is_active()
    }

    /// One-line summary of the session for the console
    pub fn status(&self) -> String {
        let sm = self.state_machine.borrow();
        let mut line = match sm.state {
            CaptureState::Live => format!(
                "live (camera {:?}, mirror {})",
                sm.camera,
                if sm.mirror { "on" } else { "off" }
            ),
            CaptureState::Previewing => match &sm.preview {
                Some(image) if sm.is_uploading() => {
                    format!("uploading {}x{} photo", image.width, image.height)
                }
                Some(image) => format!(
                    "previewing {}x{} photo ({} bytes)",
                    image.width,
                    image.height,
                    image.bytes.len()
                ),
                None => "previewing".to_string(),
            },
        };
        if let Some(watermark) = &sm.watermark {
            let ready = if watermark.is_loaded() { "ready" } else { "pending" };
            line.push_str(&format!(", watermark {}", ready));
        }
        if let Some(err) = &sm.error {
            line.push_str(&format!(" - {}", err));
        }
        line
    }

    /// Execute a command from the state machine
    fn execute_command(&self, cmd: CaptureCommand) {
        match cmd {
            CaptureCommand::StartCamera => {
                let result = self.camera.borrow_mut().start();
                match result {
                    Ok(()) => {
                        self.process_event(CaptureEvent::CameraStarted);
                    }
                    Err(e) => {
                        self.process_event(CaptureEvent::CameraFailed {
                            error: e.to_string(),
                        });
                    }
                }
            }

            CaptureCommand::StopCamera => {
                self.camera.borrow_mut().stop();
            }

            CaptureCommand::Compose { options } => {
                let result = {
                    let camera = self.camera.borrow();
                    match camera.stream() {
                        Some(stream) if stream.is_active() => {
                            Some(self.compositor.compose(stream, &options))
                        }
                        Some(_) => None,
                        None => Some(Err(ComposeError::SourceNotReady)),
                    }
                };

                // The stream died under us (unplugged, pipeline error)
                let Some(result) = result else {
                    let error = "camera stream ended".to_string();
                    log::error!("Camera lost before capture");
                    self.compose_outcome
                        .set(Some(Err(CaptureError::CameraUnavailable(error.clone()))));
                    self.process_event(CaptureEvent::CameraFailed { error });
                    return;
                };

                let (event, outcome) = match result {
                    Ok(image) => (CaptureEvent::Captured { image }, Ok(())),
                    Err(ComposeError::SourceNotReady) => {
                        log::warn!("Capture requested before the camera is ready");
                        (CaptureEvent::SourceNotReady, Err(CaptureError::SourceNotReady))
                    }
                    Err(e) => {
                        log::error!("Failed to compose still: {}", e);
                        let error = e.to_string();
                        (
                            CaptureEvent::ComposeFailed {
                                error: error.clone(),
                            },
                            Err(CaptureError::ComposeFailed(error)),
                        )
                    }
                };
                self.compose_outcome.set(Some(outcome));
                self.process_event(event);
            }

            CaptureCommand::Upload { ticket, image } => {
                let tx = self.message_tx.clone();
                let upload = self.api.upload_photo(image);

                self.runtime.spawn(async move {
                    match upload.await {
                        Ok(()) => {
                            tx.send(AppMessage::Event(CaptureEvent::UploadSucceeded { ticket }));
                        }
                        Err(e) => {
                            log::error!("Upload failed: {}", e);
                            tx.send(AppMessage::Event(CaptureEvent::UploadFailed {
                                ticket,
                                error: e.to_string(),
                            }));
                        }
                    }
                });
            }

            CaptureCommand::LoadWatermark { url, generation } => {
                let tx = self.message_tx.clone();
                self.watermark_loader.borrow_mut().load(
                    &self.runtime,
                    self.api.clone(),
                    url,
                    move |result| {
                        let event = match result {
                            Ok(image) => CaptureEvent::WatermarkLoaded { generation, image },
                            Err(e) => CaptureEvent::WatermarkFailed {
                                generation,
                                error: e.to_string(),
                            },
                        };
                        tx.send(AppMessage::Event(event));
                    },
                );
            }

            CaptureCommand::CancelWatermark => {
                self.watermark_loader.borrow_mut().cancel();
            }

            CaptureCommand::ScheduleErrorClear { id } => {
                let tx = self.message_tx.clone();
                self.runtime.spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        crate::config::ERROR_DISPLAY_DURATION_MS,
                    ))
                    .await;
                    tx.send(AppMessage::Event(CaptureEvent::ClearError { id }));
                });
            }

            CaptureCommand::UpdateUI => {
                // Rendered by the main loop after the event is processed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;
    use crate::compose::Corner;
    use crate::video::synthetic::{test_pattern, CameraProbe, SyntheticCamera, MARKER};
    use image::{Rgba, RgbaImage};

    const W: u32 = 320;
    const H: u32 = 240;
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    struct Harness {
        ctx: Rc<AppContext>,
        rx: mpsc::UnboundedReceiver<AppMessage>,
        api: Arc<FakeApi>,
        probe: CameraProbe,
    }

    impl Harness {
        fn new(camera: SyntheticCamera, api: FakeApi) -> Self {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            Self::with_runtime(runtime, camera, api)
        }

        /// Timers only advance when the runtime is otherwise idle
        fn paused(camera: SyntheticCamera, api: FakeApi) -> Self {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            Self::with_runtime(runtime, camera, api)
        }

        fn with_runtime(
            runtime: tokio::runtime::Runtime,
            camera: SyntheticCamera,
            api: FakeApi,
        ) -> Self {
            let runtime = Arc::new(runtime);
            let probe = camera.probe();
            let api = Arc::new(api);
            let compositor = FrameCompositor {
                watermark_size: 40,
                margin: 8,
                corner: Corner::BottomRight,
            };
            let (ctx, rx) =
                AppContext::with_compositor(runtime, Box::new(camera), api.clone(), true, compositor);
            Self { ctx, rx, api, probe }
        }

        fn mounted() -> Self {
            let h = Self::new(SyntheticCamera::new(W, H), FakeApi::new());
            h.ctx.mount().unwrap();
            h
        }

        /// Wait for the next message from a background task and handle it
        fn pump(&mut self) {
            let msg = self.ctx.runtime.block_on(self.rx.recv()).expect("message");
            self.ctx.handle_message(msg);
        }
    }

    fn decode(image: &CapturedImage) -> RgbaImage {
        image::load_from_memory(&image.bytes).unwrap().to_rgba8()
    }

    #[test]
    fn test_mount_starts_one_stream() {
        let h = Harness::mounted();
        assert!(h.ctx.camera_active());
        assert!(h.ctx.state_machine.borrow().can_capture());
        assert_eq!(h.probe.live_tracks(), 1);

        // Mounting again does not open a second stream
        h.ctx.mount().unwrap();
        assert_eq!(h.probe.opened(), 1);
    }

    #[test]
    fn test_capture_then_confirm() {
        let mut h = Harness::mounted();

        h.ctx.capture().unwrap();
        assert_eq!(h.ctx.state(), CaptureState::Previewing);
        assert_eq!(h.probe.live_tracks(), 0);
        assert!(!h.ctx.camera_active());

        let preview = h.ctx.preview().unwrap();
        assert_eq!((preview.width, preview.height), (W, H));

        h.ctx.confirm();
        assert!(h.ctx.state_machine.borrow().is_uploading());
        h.pump();

        assert_eq!(h.ctx.state(), CaptureState::Live);
        assert!(h.ctx.preview().is_none());
        assert_eq!(h.probe.live_tracks(), 1);
        assert_eq!(h.probe.opened(), 2);
        assert_eq!(h.api.uploaded(), vec![preview]);
        assert_eq!(h.ctx.state_machine.borrow().uploads_completed, 1);
    }

    #[test]
    fn test_failed_upload_keeps_preview() {
        let mut h = Harness::mounted();
        h.api.push_upload_outcome(Err("503 Service Unavailable"));

        h.ctx.capture().unwrap();
        let preview = h.ctx.preview().unwrap();
        h.ctx.confirm();
        h.pump();

        assert_eq!(h.ctx.state(), CaptureState::Previewing);
        assert_eq!(h.ctx.preview(), Some(preview.clone()));
        assert_eq!(h.probe.live_tracks(), 0);
        assert!(matches!(
            h.ctx.state_machine.borrow().error,
            Some(CaptureError::UploadFailed(_))
        ));
        assert!(h.ctx.status().contains("Upload failed"));

        // Retrying submits the same image
        h.ctx.confirm();
        h.pump();
        assert_eq!(h.ctx.state(), CaptureState::Live);
        assert_eq!(h.api.uploaded(), vec![preview.clone(), preview]);
    }

    #[test]
    fn test_retake_restarts_camera() {
        let h = Harness::mounted();
        h.ctx.capture().unwrap();
        h.ctx.retake();

        assert_eq!(h.ctx.state(), CaptureState::Live);
        assert!(h.ctx.preview().is_none());
        assert_eq!(h.probe.live_tracks(), 1);
        assert_eq!(h.probe.opened(), 2);
        assert!(h.api.uploaded().is_empty());
    }

    #[test]
    fn test_late_upload_after_retake_is_ignored() {
        let mut h = Harness::mounted();
        h.ctx.capture().unwrap();
        h.ctx.confirm();
        h.ctx.retake();

        h.pump();
        assert_eq!(h.ctx.state(), CaptureState::Live);
        assert_eq!(h.ctx.state_machine.borrow().uploads_completed, 0);
        // Still exactly one stream
        assert_eq!(h.probe.live_tracks(), 1);
        assert_eq!(h.probe.opened(), 2);
    }

    #[test]
    fn test_capture_before_first_frame() {
        let h = Harness::new(SyntheticCamera::new(W, H).not_ready(), FakeApi::new());
        h.ctx.mount().unwrap();

        assert_eq!(h.ctx.capture(), Err(CaptureError::SourceNotReady));
        assert_eq!(h.ctx.state(), CaptureState::Live);
        assert!(h.ctx.camera_active());
        assert!(h.ctx.state_machine.borrow().error.is_none());

        h.probe.set_ready(true);
        assert_eq!(h.ctx.capture(), Ok(()));
        assert_eq!(h.ctx.state(), CaptureState::Previewing);
    }

    #[test]
    fn test_camera_denied() {
        let h = Harness::new(SyntheticCamera::new(W, H).denied(), FakeApi::new());

        assert!(matches!(h.ctx.mount(), Err(CaptureError::CameraUnavailable(_))));
        assert!(!h.ctx.camera_active());

        // Capture is disabled, not an error
        assert_eq!(h.ctx.capture(), Ok(()));
        assert_eq!(h.ctx.state(), CaptureState::Live);
        assert!(h.ctx.preview().is_none());
    }

    #[test]
    fn test_mirrored_capture_with_watermark() {
        let logo = RgbaImage::from_pixel(60, 30, BLUE);
        let mut h = Harness::new(SyntheticCamera::new(W, H), FakeApi::new().with_logo(logo));
        h.ctx.mount().unwrap();

        h.ctx.send_event(CaptureEvent::SettingsLoaded {
            page_title: "TMTSelfie".into(),
            logo_url: Some("http://localhost:8000/static/logo.png".into()),
        });
        h.pump(); // settings
        h.pump(); // watermark
        assert_eq!(h.api.fetched(), vec!["http://localhost:8000/static/logo.png".to_string()]);
        assert!(h.ctx.status().contains("watermark ready"));

        h.ctx.capture().unwrap();
        let pixels = decode(&h.ctx.preview().unwrap());

        // Frame is mirrored
        assert_eq!(*pixels.get_pixel(W - 1, 0), MARKER);
        assert_ne!(*pixels.get_pixel(0, 0), MARKER);

        // Logo sits upright in the bottom-right corner
        let (x, y) = (W - 8 - 40, H - 8 - 20);
        assert_eq!(*pixels.get_pixel(x, y), BLUE);
        assert_eq!(*pixels.get_pixel(x + 39, y + 19), BLUE);
        assert_ne!(*pixels.get_pixel(x - 1, y), BLUE);
    }

    #[test]
    fn test_failed_watermark_composes_without_logo() {
        let mut h = Harness::new(SyntheticCamera::new(W, H), FakeApi::new());
        h.ctx.mount().unwrap();
        h.ctx.toggle_mirror();

        h.ctx.process_event(CaptureEvent::SettingsLoaded {
            page_title: String::new(),
            logo_url: Some("http://localhost:8000/missing.png".into()),
        });
        h.pump();
        assert!(h.ctx.state_machine.borrow().error.is_none());

        h.ctx.capture().unwrap();
        assert_eq!(decode(&h.ctx.preview().unwrap()), test_pattern(W, H));
    }

    #[test]
    fn test_error_clears_after_display_time() {
        let mut h = Harness::paused(SyntheticCamera::new(W, H), FakeApi::new());
        h.ctx.mount().unwrap();
        h.api.push_upload_outcome(Err("first"));
        h.api.push_upload_outcome(Err("second"));

        h.ctx.capture().unwrap();
        h.ctx.confirm();
        h.pump();
        assert!(matches!(
            h.ctx.state_machine.borrow().error,
            Some(CaptureError::UploadFailed(ref e)) if e.contains("first")
        ));

        // Retry shortly before the first error's timer runs out
        let almost =
            std::time::Duration::from_millis(crate::config::ERROR_DISPLAY_DURATION_MS - 1000);
        h.ctx.runtime.block_on(async { tokio::time::sleep(almost).await });
        h.ctx.confirm();
        h.pump();
        assert!(matches!(
            h.ctx.state_machine.borrow().error,
            Some(CaptureError::UploadFailed(ref e)) if e.contains("second")
        ));

        // The first timer fires and leaves the newer error alone
        h.pump();
        assert!(matches!(
            h.ctx.state_machine.borrow().error,
            Some(CaptureError::UploadFailed(ref e)) if e.contains("second")
        ));

        // The second timer clears it
        h.pump();
        assert!(h.ctx.state_machine.borrow().error.is_none());
        assert_eq!(h.ctx.state(), CaptureState::Previewing);
        assert!(h.ctx.preview().is_some());
    }

    #[test]
    fn test_unplugged_camera_is_not_captured() {
        let h = Harness::mounted();
        h.probe.unplug();

        assert!(matches!(h.ctx.capture(), Err(CaptureError::CameraUnavailable(_))));
        assert_eq!(h.ctx.state(), CaptureState::Live);
        assert!(h.ctx.preview().is_none());
        assert!(!h.ctx.state_machine.borrow().can_capture());
        assert!(h.ctx.status().contains("Camera unavailable"));

        // Mounting again reopens the camera
        h.ctx.mount().unwrap();
        assert_eq!(h.probe.opened(), 2);
        assert_eq!(h.probe.live_tracks(), 1);
        assert_eq!(h.ctx.capture(), Ok(()));
        assert_eq!(h.ctx.state(), CaptureState::Previewing);
    }

    #[test]
    fn test_teardown_releases_camera() {
        let h = Harness::mounted();
        h.ctx.process_event(CaptureEvent::SettingsLoaded {
            page_title: String::new(),
            logo_url: Some("http://localhost:8000/logo.png".into()),
        });

        h.ctx.teardown();
        assert_eq!(h.probe.live_tracks(), 0);
        assert!(!h.ctx.camera_active());

        h.ctx.teardown();
        h.ctx.retake();
        h.ctx.mount().unwrap();
        assert_eq!(h.probe.live_tracks(), 0);
    }

    #[test]
    fn test_teardown_while_previewing() {
        let h = Harness::mounted();
        h.ctx.capture().unwrap();
        h.ctx.teardown();
        assert_eq!(h.probe.live_tracks(), 0);
        assert_eq!(h.probe.opened(), 1);
    }
}
