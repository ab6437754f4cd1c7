//! Hardware-free capture session state machine.
//!
//! This module contains the pure Rust state machine that can be tested
//! without a camera or network. The application context executes the
//! commands it emits and feeds the outcomes back in as events.

use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;

use crate::compose::{CapturedImage, ComposeOptions, LoadState, WatermarkAsset};

/// Capture session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Camera running, waiting for the subject to pose
    Live,
    /// Still captured, waiting for confirm or retake
    Previewing,
}

/// What the state machine believes about the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    Stopped,
    Active,
    /// Permission denied or no device; capture is disabled
    Unavailable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("Camera is still starting up")]
    SourceNotReady,
    #[error("Watermark could not be loaded: {0}")]
    WatermarkLoadFailed(String),
    #[error("Upload failed: {0}")]
    UploadFailed(String),
    #[error("Could not compose photo: {0}")]
    ComposeFailed(String),
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    // Lifecycle
    Mount,
    Teardown,

    // User actions
    Capture,
    Retake,
    Confirm,
    ToggleMirror,

    // Camera / compositor outcomes
    CameraStarted,
    CameraFailed { error: String },
    Captured { image: CapturedImage },
    SourceNotReady,
    ComposeFailed { error: String },

    // Backend responses
    UploadSucceeded { ticket: u64 },
    UploadFailed { ticket: u64, error: String },
    SettingsLoaded { page_title: String, logo_url: Option<String> },
    WatermarkLoaded { generation: u64, image: Arc<RgbaImage> },
    WatermarkFailed { generation: u64, error: String },

    // Internal
    /// Error display timer fired; only the most recent timer clears
    ClearError { id: u64 },
}

/// Commands emitted by the state machine for the application layer to execute
#[derive(Debug, Clone)]
pub enum CaptureCommand {
    /// (Re)start the camera stream
    StartCamera,
    /// Stop every camera track
    StopCamera,
    /// Compose a still from the live stream
    Compose { options: ComposeOptions },
    /// Submit the previewed still
    Upload { ticket: u64, image: CapturedImage },
    /// Fetch the logo in the background
    LoadWatermark { url: String, generation: u64 },
    /// Abort any in-flight logo fetch
    CancelWatermark,
    /// Schedule error clear after timeout
    ScheduleErrorClear { id: u64 },
    /// Update UI to reflect new state
    UpdateUI,
}

/// The capture session state machine
#[derive(Debug)]
pub struct CaptureStateMachine {
    pub state: CaptureState,
    pub camera: CameraStatus,
    pub mirror: bool,
    /// Composed still, present only while previewing
    pub preview: Option<CapturedImage>,
    pub watermark: Option<WatermarkAsset>,
    pub page_title: String,
    pub error: Option<CaptureError>,
    pub uploads_completed: u32,
    upload_ticket: Option<u64>,
    next_ticket: u64,
    watermark_generation: u64,
    error_clear_id: u64,
    closed: bool,
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CaptureStateMachine {
    pub fn new(mirror: bool) -> Self {
        Self {
            state: CaptureState::Live,
            camera: CameraStatus::Stopped,
            mirror,
            preview: None,
            watermark: None,
            page_title: String::new(),
            error: None,
            uploads_completed: 0,
            upload_ticket: None,
            next_ticket: 0,
            watermark_generation: 0,
            error_clear_id: 0,
            closed: false,
        }
    }

    /// Capture is enabled only on a live, running camera
    pub fn can_capture(&self) -> bool {
        !self.closed && self.state == CaptureState::Live && self.camera == CameraStatus::Active
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_ticket.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_current_upload(&self, ticket: u64) -> bool {
        !self.closed && self.state == CaptureState::Previewing && self.upload_ticket == Some(ticket)
    }

    fn is_current_watermark(&self, generation: u64) -> bool {
        !self.closed && self.watermark.is_some() && generation == self.watermark_generation
    }

    /// Drop transient errors; a missing camera stays visible
    fn clear_transient_error(&mut self) {
        if !matches!(self.error, Some(CaptureError::CameraUnavailable(_))) {
            self.error = None;
        }
    }

    /// Show `error` until the timer scheduled here fires
    fn set_timed_error(&mut self, error: CaptureError, commands: &mut Vec<CaptureCommand>) {
        self.error = Some(error);
        self.error_clear_id += 1;
        commands.push(CaptureCommand::ScheduleErrorClear {
            id: self.error_clear_id,
        });
    }

    /// Process an event and return commands to execute
    pub fn process(&mut self, event: CaptureEvent) -> Vec<CaptureCommand> {
        let mut commands = Vec::new();

        if self.closed {
            log::debug!("Session closed, ignoring {:?}", event_name(&event));
            return commands;
        }

        match event {
            CaptureEvent::Mount => {
                if self.state == CaptureState::Live && self.camera != CameraStatus::Active {
                    commands.push(CaptureCommand::StartCamera);
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::Teardown => {
                self.closed = true;
                self.camera = CameraStatus::Stopped;
                // Any logo that resolves from now on is stale
                self.watermark_generation += 1;
                commands.push(CaptureCommand::StopCamera);
                commands.push(CaptureCommand::CancelWatermark);
            }

            CaptureEvent::CameraStarted => {
                if self.state == CaptureState::Live {
                    self.camera = CameraStatus::Active;
                    if matches!(self.error, Some(CaptureError::CameraUnavailable(_))) {
                        self.error = None;
                    }
                } else {
                    commands.push(CaptureCommand::StopCamera);
                }
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::CameraFailed { error } => {
                if self.state == CaptureState::Live {
                    self.camera = CameraStatus::Unavailable;
                    self.error = Some(CaptureError::CameraUnavailable(error));
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::Capture => {
                if self.can_capture() {
                    commands.push(CaptureCommand::Compose {
                        options: ComposeOptions {
                            mirror: self.mirror,
                            watermark: self.watermark.clone(),
                        },
                    });
                }
            }

            CaptureEvent::Captured { image } => {
                if self.can_capture() {
                    self.state = CaptureState::Previewing;
                    self.camera = CameraStatus::Stopped;
                    self.preview = Some(image);
                    self.clear_transient_error();
                    // Release the camera before anything touches the network
                    commands.push(CaptureCommand::StopCamera);
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::SourceNotReady => {
                log::debug!("Capture requested before the camera delivered a frame");
            }

            CaptureEvent::ComposeFailed { error } => {
                if self.state == CaptureState::Live {
                    self.set_timed_error(CaptureError::ComposeFailed(error), &mut commands);
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::Retake => {
                if self.state == CaptureState::Previewing {
                    self.state = CaptureState::Live;
                    self.preview = None;
                    self.upload_ticket = None;
                    self.clear_transient_error();
                    commands.push(CaptureCommand::StartCamera);
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::Confirm => {
                if self.state == CaptureState::Previewing && !self.is_uploading() {
                    if let Some(ref image) = self.preview {
                        self.next_ticket += 1;
                        let ticket = self.next_ticket;
                        self.upload_ticket = Some(ticket);
                        let image = image.clone();
                        self.clear_transient_error();
                        commands.push(CaptureCommand::Upload { ticket, image });
                        commands.push(CaptureCommand::UpdateUI);
                    }
                }
            }

            CaptureEvent::UploadSucceeded { ticket } => {
                if self.is_current_upload(ticket) {
                    self.state = CaptureState::Live;
                    self.preview = None;
                    self.upload_ticket = None;
                    self.uploads_completed += 1;
                    commands.push(CaptureCommand::StartCamera);
                    commands.push(CaptureCommand::UpdateUI);
                } else {
                    log::debug!("Ignoring stale upload result (ticket {})", ticket);
                }
            }

            CaptureEvent::UploadFailed { ticket, error } => {
                if self.is_current_upload(ticket) {
                    self.upload_ticket = None;
                    self.set_timed_error(CaptureError::UploadFailed(error), &mut commands);
                    commands.push(CaptureCommand::UpdateUI);
                } else {
                    log::debug!("Ignoring stale upload failure (ticket {}): {}", ticket, error);
                }
            }

            CaptureEvent::ToggleMirror => {
                if self.state == CaptureState::Live {
                    self.mirror = !self.mirror;
                    commands.push(CaptureCommand::UpdateUI);
                }
            }

            CaptureEvent::SettingsLoaded {
                page_title,
                logo_url,
            } => {
                self.page_title = page_title;

                let unchanged = match (&self.watermark, &logo_url) {
                    (Some(current), Some(url)) => {
                        current.source == *url && !matches!(current.state, LoadState::Failed)
                    }
                    (None, None) => true,
                    _ => false,
                };

                if !unchanged {
                    self.watermark_generation += 1;
                    match logo_url {
                        Some(url) => {
                            self.watermark = Some(WatermarkAsset::unloaded(url.clone()));
                            commands.push(CaptureCommand::LoadWatermark {
                                url,
                                generation: self.watermark_generation,
                            });
                        }
                        None => {
                            self.watermark = None;
                            commands.push(CaptureCommand::CancelWatermark);
                        }
                    }
                }
                commands.push(CaptureCommand::UpdateUI);
            }

            CaptureEvent::WatermarkLoaded { generation, image } => {
                if self.is_current_watermark(generation) {
                    if let Some(ref mut watermark) = self.watermark {
                        log::info!(
                            "Watermark {} ready ({}x{})",
                            watermark.source,
                            image.width(),
                            image.height()
                        );
                        watermark.state = LoadState::Loaded(image);
                    }
                } else {
                    log::debug!("Ignoring stale watermark (generation {})", generation);
                }
            }

            CaptureEvent::WatermarkFailed { generation, error } => {
                if self.is_current_watermark(generation) {
                    if let Some(ref mut watermark) = self.watermark {
                        let failure = CaptureError::WatermarkLoadFailed(error);
                        log::warn!("{} ({})", failure, watermark.source);
                        watermark.state = LoadState::Failed;
                    }
                }
            }

            CaptureEvent::ClearError { id } => {
                if id == self.error_clear_id {
                    self.clear_transient_error();
                    commands.push(CaptureCommand::UpdateUI);
                } else {
                    log::debug!("Ignoring superseded error clear ({})", id);
                }
            }
        }

        commands
    }
}

fn event_name(event: &CaptureEvent) -> &'static str {
    match event {
        CaptureEvent::Mount => "Mount",
        CaptureEvent::Teardown => "Teardown",
        CaptureEvent::Capture => "Capture",
        CaptureEvent::Retake => "Retake",
        CaptureEvent::Confirm => "Confirm",
        CaptureEvent::ToggleMirror => "ToggleMirror",
        CaptureEvent::CameraStarted => "CameraStarted",
        CaptureEvent::CameraFailed { .. } => "CameraFailed",
        CaptureEvent::Captured { .. } => "Captured",
        CaptureEvent::SourceNotReady => "SourceNotReady",
        CaptureEvent::ComposeFailed { .. } => "ComposeFailed",
        CaptureEvent::UploadSucceeded { .. } => "UploadSucceeded",
        CaptureEvent::UploadFailed { .. } => "UploadFailed",
        CaptureEvent::SettingsLoaded { .. } => "SettingsLoaded",
        CaptureEvent::WatermarkLoaded { .. } => "WatermarkLoaded",
        CaptureEvent::WatermarkFailed { .. } => "WatermarkFailed",
        CaptureEvent::ClearError { .. } => "ClearError",
    }
}
