//! API clients for the photo booth backend.

pub mod auth;
pub mod http;

pub use auth::AuthSession;
pub use http::{ApiClient, ApiError, KioskSettings};

use futures_util::future::BoxFuture;

use crate::compose::CapturedImage;

/// The backend calls the capture session depends on.
///
/// Futures are `'static` so they can be spawned onto the runtime.
pub trait BackendApi: Send + Sync {
    /// Submit a confirmed still
    fn upload_photo(&self, image: CapturedImage) -> BoxFuture<'static, Result<(), ApiError>>;

    /// Download raw image bytes (logo)
    fn fetch_image(&self, url: String) -> BoxFuture<'static, Result<Vec<u8>, ApiError>>;
}
