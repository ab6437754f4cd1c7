//! Watermark (business logo) asset and its background loader.

use std::sync::Arc;

use futures_util::future::{abortable, AbortHandle, Aborted};
use image::RgbaImage;
use thiserror::Error;

use crate::api::{ApiError, BackendApi};

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("Failed to fetch watermark: {0}")]
    Fetch(#[from] ApiError),
    #[error("Failed to decode watermark: {0}")]
    Decode(#[from] image::ImageError),
}

/// Load progress of a watermark image
#[derive(Debug, Clone)]
pub enum LoadState {
    Unloaded,
    Loaded(Arc<RgbaImage>),
    Failed,
}

/// A logo to stamp onto captured stills
#[derive(Debug, Clone)]
pub struct WatermarkAsset {
    pub source: String,
    pub state: LoadState,
}

impl WatermarkAsset {
    pub fn unloaded(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            state: LoadState::Unloaded,
        }
    }

    pub fn loaded(source: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            source: source.into(),
            state: LoadState::Loaded(Arc::new(image)),
        }
    }

    /// The decoded logo, if it finished loading
    pub fn image(&self) -> Option<&RgbaImage> {
        match &self.state {
            LoadState::Loaded(image) => Some(image),
            LoadState::Unloaded | LoadState::Failed => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.image().is_some()
    }
}

/// Fetch and decode a logo
pub async fn fetch_watermark(
    api: Arc<dyn BackendApi>,
    url: String,
) -> Result<Arc<RgbaImage>, WatermarkError> {
    let bytes = api.fetch_image(url).await?;
    let image = image::load_from_memory(&bytes)?.to_rgba8();
    log::debug!("Decoded watermark {}x{}", image.width(), image.height());
    Ok(Arc::new(image))
}

/// Runs at most one watermark fetch at a time.
///
/// Starting a new load or calling [`WatermarkLoader::cancel`] aborts the one
/// in flight; an aborted load never reports back.
#[derive(Default)]
pub struct WatermarkLoader {
    in_flight: Option<AbortHandle>,
}

impl WatermarkLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<F>(
        &mut self,
        runtime: &tokio::runtime::Runtime,
        api: Arc<dyn BackendApi>,
        url: String,
        on_done: F,
    ) where
        F: FnOnce(Result<Arc<RgbaImage>, WatermarkError>) + Send + 'static,
    {
        self.cancel();

        log::info!("Loading watermark from {}", url);
        let (task, handle) = abortable(fetch_watermark(api, url.clone()));
        self.in_flight = Some(handle);

        runtime.spawn(async move {
            match task.await {
                Ok(result) => on_done(result),
                Err(Aborted) => log::debug!("Watermark load from {} cancelled", url),
            }
        });
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

impl Drop for WatermarkLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_asset_states() {
        let asset = WatermarkAsset::unloaded("http://x/logo.png");
        assert!(!asset.is_loaded());

        let asset = WatermarkAsset::loaded("http://x/logo.png", RgbaImage::new(2, 2));
        assert!(asset.is_loaded());
        assert_eq!(asset.image().unwrap().dimensions(), (2, 2));

        let failed = WatermarkAsset {
            state: LoadState::Failed,
            ..asset
        };
        assert!(failed.image().is_none());
    }

    #[test]
    fn test_load_reports_decoded_image() {
        let rt = runtime();
        let api = Arc::new(FakeApi::new().with_logo(RgbaImage::new(5, 3)));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut loader = WatermarkLoader::new();
        loader.load(&rt, api, "http://x/logo.png".into(), move |result| {
            let _ = tx.send(result.map(|img| img.dimensions()).map_err(|e| e.to_string()));
        });

        assert_eq!(rt.block_on(rx.recv()), Some(Ok((5, 3))));
    }

    #[test]
    fn test_undecodable_logo_fails() {
        let rt = runtime();
        let api = Arc::new(FakeApi::new().with_image_bytes(b"not an image".to_vec()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut loader = WatermarkLoader::new();
        loader.load(&rt, api, "http://x/logo.png".into(), move |result| {
            let _ = tx.send(matches!(result, Err(WatermarkError::Decode(_))));
        });

        assert_eq!(rt.block_on(rx.recv()), Some(true));
    }

    #[test]
    fn test_cancelled_load_never_reports() {
        let rt = runtime();
        let api = Arc::new(FakeApi::new().with_logo(RgbaImage::new(5, 3)));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        let mut loader = WatermarkLoader::new();
        loader.load(&rt, api, "http://x/logo.png".into(), move |_| {
            let _ = tx.send(());
        });
        loader.cancel();

        // The aborted task drops the callback (and its sender) without calling it
        assert_eq!(rt.block_on(rx.recv()), None);
    }
}
