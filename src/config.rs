//! Configuration for the photo booth kiosk.
//!
//! Defaults live in constants; `KioskConfig` overrides them from the
//! environment.

use std::time::Duration;

/// Default base URL for HTTP API calls
pub const API_BASE: &str = "http://localhost:8000";

/// Edge length of the square box the watermark logo is fitted into
pub const WATERMARK_SIZE: u32 = 120;

/// Distance between the watermark and the frame edges
pub const WATERMARK_MARGIN: u32 = 24;

/// Error message display duration in milliseconds
pub const ERROR_DISPLAY_DURATION_MS: u64 = 5000;

/// Lifetime of an admin access token (2.5 hours)
pub const AUTH_TOKEN_TTL: Duration = Duration::from_secs(150 * 60);

/// Default settings poll interval in seconds
pub const SETTINGS_REFRESH_SECS: u64 = 60;

/// Multipart field name for uploaded photos
pub const UPLOAD_FIELD: &str = "file";

/// File name reported for uploaded photos
pub const UPLOAD_FILE_NAME: &str = "selfie.png";

/// Which camera backend to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSelection {
    /// Let the platform pick the default camera
    Auto,
    /// Built-in test pattern, no hardware needed
    Synthetic,
    /// A specific device node, e.g. `/dev/video0`
    Device(String),
}

impl CameraSelection {
    fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "auto" => CameraSelection::Auto,
            "synthetic" | "test" => CameraSelection::Synthetic,
            path => CameraSelection::Device(path.to_string()),
        }
    }
}

/// Admin credentials used to fetch settings behind auth
#[derive(Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct KioskConfig {
    pub api_base: String,
    pub camera: CameraSelection,
    /// Mirror flag the capture session starts with
    pub mirror: bool,
    pub admin: Option<AdminCredentials>,
    pub settings_refresh: Duration,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            api_base: API_BASE.to_string(),
            camera: CameraSelection::Auto,
            mirror: true,
            admin: None,
            settings_refresh: Duration::from_secs(SETTINGS_REFRESH_SECS),
        }
    }
}

impl KioskConfig {
    /// Load configuration from `PHOTOBOOTH_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base) = lookup("PHOTOBOOTH_API_BASE") {
            match url::Url::parse(base.trim()) {
                Ok(_) => config.api_base = base.trim().trim_end_matches('/').to_string(),
                Err(e) => log::warn!("Ignoring invalid PHOTOBOOTH_API_BASE {:?}: {}", base, e),
            }
        }

        if let Some(camera) = lookup("PHOTOBOOTH_CAMERA") {
            config.camera = CameraSelection::parse(&camera);
        }

        if let Some(mirror) = lookup("PHOTOBOOTH_MIRROR") {
            match parse_bool(&mirror) {
                Some(value) => config.mirror = value,
                None => log::warn!("Ignoring invalid PHOTOBOOTH_MIRROR value: {}", mirror),
            }
        }

        if let (Some(username), Some(password)) = (
            lookup("PHOTOBOOTH_ADMIN_USER"),
            lookup("PHOTOBOOTH_ADMIN_PASSWORD"),
        ) {
            if !username.is_empty() {
                config.admin = Some(AdminCredentials { username, password });
            }
        }

        if let Some(secs) = lookup("PHOTOBOOTH_SETTINGS_REFRESH_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.settings_refresh = Duration::from_secs(secs),
                _ => log::warn!("Ignoring invalid PHOTOBOOTH_SETTINGS_REFRESH_SECS value: {}", secs),
            }
        }

        config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Build the login URL
pub fn login_url(base: &str) -> String {
    format!("{}/api/auth/login", base)
}

/// Build the settings URL
pub fn settings_url(base: &str) -> String {
    format!("{}/api/admin/settings", base)
}

/// Build the photo upload URL
pub fn upload_url(base: &str) -> String {
    format!("{}/api/photos/upload", base)
}

/// Build full URL for an asset path returned by the backend
pub fn asset_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}{}", base.trim_end_matches('/'), path)
}
